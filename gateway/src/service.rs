use crate::backend::Backend;
use crate::config::Config;
use crate::errors::{GatewayError, Result};
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::normalizer::{InboundRequest, Normalizer, inbound_from_json};
use crate::passthrough::Passthrough;
use crate::poller::Poller;
use crate::resolver::{Resolution, Resolver};
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use shared::headers::apply_cors;
use shared::http::{into_boxed, json_response};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

/// Everything needed to answer one inbound request. Built once at startup
/// and shared read-only between connections.
pub struct Gateway {
    normalizer: Normalizer,
    resolver: Resolver,
    poller: Poller,
    passthrough: Option<Passthrough>,
    path: String,
    target: Url,
    expose_upstream_detail: bool,
}

impl Gateway {
    pub fn new(config: &Config, backend: Arc<dyn Backend>) -> Self {
        let passthrough = config
            .passthrough
            .enabled
            .then(|| Passthrough::new(backend.clone(), config.backend.attempt_timeout()));

        Self {
            normalizer: Normalizer::new(
                config.normalizer.clone(),
                config.resolution.encodings.clone(),
            ),
            resolver: Resolver::new(backend.clone(), config),
            poller: Poller::new(backend, config),
            passthrough,
            path: config.gateway.path.clone(),
            target: config.backend.base_url.clone(),
            expose_upstream_detail: config.diagnostics.expose_upstream_detail,
        }
    }

    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();

        let (endpoint, result) = match (&parts.method, path) {
            (&Method::OPTIONS, _) => ("preflight", Ok(empty_response(StatusCode::NO_CONTENT))),
            (&Method::POST, p) if p == self.path => ("chat", self.chat(&body).await),
            (&Method::GET, p) if p == self.path => (
                "liveness",
                Ok(json_response(StatusCode::OK, &json!({"status": "ok"}))),
            ),
            (&Method::GET, "/health") => ("health", Ok(self.health())),
            (&Method::GET, "/") => ("status_page", Ok(self.status_page())),
            _ => match &self.passthrough {
                Some(passthrough) => ("passthrough", passthrough.forward(&parts, body).await),
                None => (
                    "not_found",
                    Ok(shared::http::make_error_response(StatusCode::NOT_FOUND)),
                ),
            },
        };

        let response = result.unwrap_or_else(|err| self.error_response(err));
        finish(endpoint, started, response)
    }

    /// Rejects a request before routing, e.g. when its body could not be read.
    pub fn reject(&self, err: GatewayError) -> Response<Bytes> {
        finish("rejected", Instant::now(), self.error_response(err))
    }

    async fn chat(&self, body: &Bytes) -> Result<Response<Bytes>> {
        let inbound = parse_inbound(body)?;
        let normalized = self.normalizer.normalize(&inbound);

        match self.resolver.resolve(&normalized).await? {
            Resolution::Immediate {
                status,
                body,
                route,
                encoding,
            } => {
                tracing::info!(
                    route = %route,
                    encoding = encoding.as_str(),
                    status = %status,
                    "backend answered directly"
                );
                Ok(json_body_response(status, body))
            }
            Resolution::Queued {
                handle,
                route,
                encoding,
            } => {
                tracing::info!(
                    route = %route,
                    encoding = encoding.as_str(),
                    session = %handle,
                    "backend queued the job, polling for result"
                );
                let resolved = self.poller.poll(&handle).await?;
                Ok(json_body_response(resolved.status, resolved.body))
            }
        }
    }

    fn health(&self) -> Response<Bytes> {
        json_response(
            StatusCode::OK,
            &json!({"status": "online", "target": self.target.as_str()}),
        )
    }

    fn status_page(&self) -> Response<Bytes> {
        let html = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Inference Gateway</title></head>\n<body>\n\
             <h1>Inference Gateway</h1>\n<p>Status: online</p>\n<p>Backend: {}</p>\n\
             <p>POST requests to <code>{}</code> are forwarded to the backend.</p>\n</body>\n</html>\n",
            escape_html(self.target.as_str()),
            escape_html(&self.path),
        );

        let mut response = Response::new(Bytes::from(html));
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response
    }

    fn error_response(&self, err: GatewayError) -> Response<Bytes> {
        let status = err.status_code();
        if status.is_server_error() {
            tracing::error!(error = %err, kind = err.kind(), "request failed");
        } else {
            tracing::warn!(error = %err, kind = err.kind(), "request rejected");
        }
        err.to_response(self.expose_upstream_detail)
    }
}

/// Parses a client body. Blank bodies count as `{}`; anything else must be JSON.
fn parse_inbound(body: &[u8]) -> Result<InboundRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(InboundRequest::new());
    }

    serde_json::from_slice(body)
        .map(inbound_from_json)
        .map_err(|e| GatewayError::InvalidRequestBody(e.to_string()))
}

fn json_body_response(status: StatusCode, body: Bytes) -> Response<Bytes> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn finish(
    endpoint: &'static str,
    started: Instant,
    mut response: Response<Bytes>,
) -> Response<Bytes> {
    apply_cors(response.headers_mut());

    shared::histogram!(
        REQUEST_DURATION,
        "status" => response.status().as_u16().to_string(),
        "endpoint" => endpoint
    )
    .record(started.elapsed().as_secs_f64());

    response
}

/// Tracks a request in the inflight gauge for as long as it is alive,
/// including when the client goes away mid-request.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        shared::gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        shared::gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

pub struct GatewayService {
    gateway: Arc<Gateway>,
    max_body_bytes: usize,
}

impl GatewayService {
    pub fn new(gateway: Arc<Gateway>, max_body_bytes: usize) -> Self {
        Self {
            gateway,
            max_body_bytes,
        }
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let gateway = self.gateway.clone();
        let limit = self.max_body_bytes;

        Box::pin(async move {
            let _inflight = InflightGuard::new();
            let (parts, body) = req.into_parts();

            let response = match Limited::new(body, limit).collect().await {
                Ok(collected) => {
                    gateway
                        .handle(Request::from_parts(parts, collected.to_bytes()))
                        .await
                }
                Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                    gateway.reject(GatewayError::PayloadTooLarge(limit))
                }
                Err(e) => gateway.reject(GatewayError::RequestBodyError(e.to_string())),
            };

            Ok(into_boxed(response))
        })
    }
}
