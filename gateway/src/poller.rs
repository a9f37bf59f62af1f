use crate::backend::{
    Backend, BackendRequest, BackendResponse, TransportError, body_preview, send_with_deadline,
};
use crate::config::{Config, MarkerConfig};
use crate::errors::{GatewayError, Result};
use crate::metrics_defs::POLL_ATTEMPTS;
use crate::session::SessionHandle;
use crate::signals;
use hyper::StatusCode;
use hyper::body::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Classification of a single status-route call.
#[derive(Clone, Debug, PartialEq)]
pub enum PollResult {
    Resolved { status: StatusCode, body: Bytes },
    StillPending,
    TransportError(TransportError),
}

impl PollResult {
    pub fn label(&self) -> &'static str {
        match self {
            PollResult::Resolved { .. } => "resolved",
            PollResult::StillPending => "pending",
            PollResult::TransportError(_) => "transport_error",
        }
    }
}

/// Terminal result of a queued job.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub status: StatusCode,
    pub body: Bytes,
    /// Status route that produced the result
    pub route: String,
    /// 1-based attempt on which the result appeared
    pub attempt: u32,
}

/// Everything but RFC 3986 unreserved characters, so a handle is safe both
/// as a path segment and as a query value.
const HANDLE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Status path for `route` with `{session}` replaced by the percent-encoded handle.
pub fn status_path(route: &str, handle: &SessionHandle) -> String {
    let encoded = utf8_percent_encode(handle.as_str(), HANDLE_ENCODE_SET).to_string();
    route.replace("{session}", &encoded)
}

/// Last `data:` line of an event-stream body that parses as JSON.
fn last_event(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?;
    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str(data.trim()).ok())
        .last()
}

pub struct Poller {
    backend: Arc<dyn Backend>,
    routes: Vec<String>,
    max_attempts: u32,
    interval: Duration,
    attempt_timeout: Duration,
    markers: MarkerConfig,
    preview_chars: usize,
}

impl Poller {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            routes: config.resolution.poll_routes.clone(),
            max_attempts: config.poll.max_attempts,
            interval: config.poll.interval(),
            attempt_timeout: config.backend.attempt_timeout(),
            markers: config.markers.clone(),
            preview_chars: config.diagnostics.body_preview_chars,
        }
    }

    /// Polls every status route once per attempt until one resolves or the
    /// attempt budget runs out. The delay between attempts only suspends the
    /// calling task.
    pub async fn poll(&self, handle: &SessionHandle) -> Result<Resolved> {
        let mut last_outcome = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.interval).await;
            }

            for route in &self.routes {
                let path = status_path(route, handle);
                let result = send_with_deadline(
                    self.backend.as_ref(),
                    BackendRequest::get(path.clone()),
                    self.attempt_timeout,
                )
                .await;

                let preview = result
                    .as_ref()
                    .map(|r| body_preview(&r.body, self.preview_chars))
                    .ok();

                let poll_result = self.classify(result);
                shared::counter!(POLL_ATTEMPTS, "result" => poll_result.label()).increment(1);

                match poll_result {
                    PollResult::Resolved { status, body } => {
                        tracing::info!(
                            session = %handle,
                            route = %path,
                            attempt,
                            "queued job resolved"
                        );
                        return Ok(Resolved {
                            status,
                            body,
                            route: path,
                            attempt,
                        });
                    }
                    PollResult::StillPending => {
                        tracing::debug!(
                            session = %handle,
                            route = %path,
                            attempt,
                            body = preview.as_deref().unwrap_or_default(),
                            "queued job still pending"
                        );
                        last_outcome = Some(format!("{path}: pending"));
                    }
                    PollResult::TransportError(e) => {
                        tracing::warn!(
                            session = %handle,
                            route = %path,
                            attempt,
                            error = %e,
                            "poll call failed"
                        );
                        last_outcome = Some(format!("{path}: {e}"));
                    }
                }
            }
        }

        tracing::warn!(
            session = %handle,
            attempts = self.max_attempts,
            "poll budget exhausted"
        );
        Err(GatewayError::PollTimeout {
            handle: handle.to_string(),
            attempts: self.max_attempts,
            last_outcome,
        })
    }

    /// Only a 2xx body that parses and carries a result signal resolves;
    /// everything else that came back over the wire is still pending.
    pub fn classify(
        &self,
        result: std::result::Result<BackendResponse, TransportError>,
    ) -> PollResult {
        let response = match result {
            Ok(response) => response,
            Err(e) => return PollResult::TransportError(e),
        };

        if !response.status.is_success() {
            return PollResult::StillPending;
        }

        let (json, from_stream) = match serde_json::from_slice::<Value>(&response.body) {
            Ok(json) => (json, false),
            Err(_) => match last_event(&response.body) {
                Some(json) => (json, true),
                None => return PollResult::StillPending,
            },
        };

        if !signals::has_result_signal(&json, &self.markers) {
            return PollResult::StillPending;
        }

        // Event-stream bodies are handed back as the JSON event that resolved
        let body = if from_stream {
            Bytes::from(json.to_string())
        } else {
            response.body
        };

        PollResult::Resolved {
            status: response.status,
            body,
        }
    }
}
