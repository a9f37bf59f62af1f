use crate::config::BackendConfig;
use crate::errors::GatewayError;
use async_trait::async_trait;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::{Method, StatusCode, Version};
use hyper::body::Bytes;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Failure to get any HTTP response out of the backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// One outbound call. `path` is relative to the backend base URL and may
/// carry a query string.
#[derive(Clone, Debug)]
pub struct BackendRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Bytes>,
}

impl BackendRequest {
    pub fn post_json(path: impl Into<String>, body: &serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(Bytes::from(body.to_string())),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// Fully collected backend response.
#[derive(Clone, Debug)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, TransportError>;
}

/// Sends `request` and gives up once `deadline` elapses. The in-flight call
/// is dropped, and with it the underlying connection attempt.
pub async fn send_with_deadline(
    backend: &dyn Backend,
    request: BackendRequest,
    deadline: Duration,
) -> Result<BackendResponse, TransportError> {
    tokio::time::timeout(deadline, backend.send(request))
        .await
        .map_err(|_| TransportError::Timeout(deadline))?
}

/// First `max_chars` characters of a body, for logs and error details.
pub fn body_preview(body: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(body);
    let cut = text.char_indices().nth(max_chars).map(|(idx, _)| idx);
    match cut {
        Some(idx) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}

/// Backend reached over HTTP(S) with reqwest.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, GatewayError> {
        // 3xx responses are classified like any other answer, never followed
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::HttpClientError(e.to_string()))?;

        let bearer_token = config.bearer_token();
        if bearer_token.is_some() {
            tracing::info!(env = %config.token_env, "attaching bearer token to backend calls");
        }

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            bearer_token,
        })
    }

    /// Joins a relative path (and optional query) onto the base URL,
    /// keeping any path prefix the base URL carries.
    fn url_for(&self, path_and_query: &str) -> Url {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(query);
        url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, TransportError> {
        let url = self.url_for(&request.path);
        if url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }

        let mut builder = self.client.request(request.method, url);
        if let Some(body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body);
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(BackendResponse {
            status,
            version,
            headers,
            body,
        })
    }
}
