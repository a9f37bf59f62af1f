use crate::backend::{Backend, BackendRequest, send_with_deadline};
use crate::errors::Result;
use http::request::Parts;
use hyper::body::Bytes;
use hyper::{Method, Response};
use shared::headers::{add_via_header, normalize_relayed_headers};
use std::sync::Arc;
use std::time::Duration;

/// Forwards requests outside the gateway's own endpoints to the backend
/// unchanged: same method, path and query, JSON body for anything but
/// GET/HEAD.
pub struct Passthrough {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl Passthrough {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn forward(&self, parts: &Parts, body: Bytes) -> Result<Response<Bytes>> {
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let body = match parts.method {
            Method::GET | Method::HEAD => None,
            _ if body.is_empty() => None,
            _ => Some(body),
        };

        tracing::info!(method = %parts.method, path, "forwarding to backend");

        let request = BackendRequest {
            method: parts.method.clone(),
            path: path.to_string(),
            body,
        };
        let upstream = send_with_deadline(self.backend.as_ref(), request, self.timeout).await?;

        tracing::info!(path, status = %upstream.status, "backend responded");

        let mut headers = upstream.headers;
        normalize_relayed_headers(&mut headers, upstream.version);
        add_via_header(&mut headers, upstream.version, "inference-gateway");

        let mut response = Response::new(upstream.body);
        *response.status_mut() = upstream.status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
