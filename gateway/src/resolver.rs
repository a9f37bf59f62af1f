//! Delivers normalized payloads to the backend's candidate routes.
//!
//! Routes form the outer loop and encodings the inner one, both in the
//! configured order. The first definitive answer wins:
//! - a parsed 2xx/3xx body short-circuits as an immediate result
//! - a queue marker (or an unparseable 2xx/3xx body) hands off to polling
//! - rejections and transport failures move on to the next candidate
//!
//! When no primary candidate answers, the queue route gets exactly one try
//! before the search is declared exhausted.

use crate::backend::{
    Backend, BackendRequest, BackendResponse, TransportError, body_preview, send_with_deadline,
};
use crate::config::{Config, Encoding, MarkerConfig};
use crate::errors::{GatewayError, Result};
use crate::metrics_defs::BACKEND_ATTEMPTS;
use crate::normalizer::{CandidatePayload, Normalized};
use crate::session::SessionHandle;
use crate::signals;
use hyper::StatusCode;
use hyper::body::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Classification of a single (route, payload) attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendOutcome {
    ImmediateSuccess { status: StatusCode, body: Bytes },
    Queued(SessionHandle),
    RouteRejected(StatusCode),
    TransportError(TransportError),
}

impl BackendOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BackendOutcome::ImmediateSuccess { .. } => "success",
            BackendOutcome::Queued(_) => "queued",
            BackendOutcome::RouteRejected(_) => "rejected",
            BackendOutcome::TransportError(_) => "transport_error",
        }
    }
}

/// Diagnostic record of one attempt, surfaced in error details.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttemptSummary {
    pub route: String,
    pub encoding: Encoding,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Where the candidate search ended up.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Immediate {
        status: StatusCode,
        body: Bytes,
        route: String,
        encoding: Encoding,
    },
    Queued {
        handle: SessionHandle,
        route: String,
        encoding: Encoding,
    },
}

pub struct Resolver {
    backend: Arc<dyn Backend>,
    submission_routes: Vec<String>,
    queue_route: Option<String>,
    markers: MarkerConfig,
    attempt_timeout: Duration,
    preview_chars: usize,
}

impl Resolver {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            submission_routes: config.resolution.submission_routes.clone(),
            queue_route: config.resolution.queue_route.clone(),
            markers: config.markers.clone(),
            attempt_timeout: config.backend.attempt_timeout(),
            preview_chars: config.diagnostics.body_preview_chars,
        }
    }

    pub async fn resolve(&self, normalized: &Normalized) -> Result<Resolution> {
        let mut attempts = Vec::new();

        for route in &self.submission_routes {
            for payload in &normalized.payloads {
                let outcome = self
                    .attempt(route, payload, &normalized.session, &mut attempts)
                    .await;
                if let Some(resolution) = settle(outcome, route, payload.encoding()) {
                    return Ok(resolution);
                }
            }
        }

        // Queue submission expects the positional shape; fall back to
        // whatever was configured first.
        let queue_payload = normalized
            .payload(Encoding::Positional)
            .or_else(|| normalized.payloads.first());

        if let (Some(route), Some(payload)) = (&self.queue_route, queue_payload) {
            tracing::debug!(route = %route, "primary candidates exhausted, trying queue route");
            let outcome = self
                .attempt(route, payload, &normalized.session, &mut attempts)
                .await;
            if let Some(resolution) = settle(outcome, route, payload.encoding()) {
                return Ok(resolution);
            }
        }

        tracing::warn!(
            attempts = attempts.len(),
            "all backend candidates exhausted"
        );
        Err(GatewayError::CandidatesExhausted(attempts))
    }

    async fn attempt(
        &self,
        route: &str,
        payload: &CandidatePayload,
        session: &SessionHandle,
        attempts: &mut Vec<AttemptSummary>,
    ) -> BackendOutcome {
        let encoding = payload.encoding();
        let request = BackendRequest::post_json(route, payload.body());
        let result = send_with_deadline(self.backend.as_ref(), request, self.attempt_timeout).await;

        let status = result.as_ref().ok().map(|r| r.status);
        let detail = match &result {
            Ok(response) => body_preview(&response.body, self.preview_chars),
            Err(e) => e.to_string(),
        };

        let outcome = self.classify(result, session);

        match &outcome {
            BackendOutcome::TransportError(e) => tracing::warn!(
                route = %route,
                encoding = encoding.as_str(),
                error = %e,
                "backend attempt failed"
            ),
            _ => tracing::info!(
                route = %route,
                encoding = encoding.as_str(),
                status = ?status.map(|s| s.as_u16()),
                outcome = outcome.label(),
                body = %detail,
                "backend attempt"
            ),
        }

        shared::counter!(
            BACKEND_ATTEMPTS,
            "encoding" => encoding.as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);

        attempts.push(AttemptSummary {
            route: route.to_string(),
            encoding,
            outcome: outcome.label(),
            status: status.map(|s| s.as_u16()),
            detail: Some(detail),
        });

        outcome
    }

    /// Applies the classification rules to one backend result. `fallback`
    /// is the request's own session handle, used when the backend queues a
    /// job without naming it.
    pub fn classify(
        &self,
        result: std::result::Result<BackendResponse, TransportError>,
        fallback: &SessionHandle,
    ) -> BackendOutcome {
        let response = match result {
            Ok(response) => response,
            Err(e) => return BackendOutcome::TransportError(e),
        };

        if !(200..400).contains(&response.status.as_u16()) {
            return BackendOutcome::RouteRejected(response.status);
        }

        match serde_json::from_slice::<serde_json::Value>(&response.body) {
            Ok(json) if signals::is_queued(&json, &self.markers) => {
                let handle = signals::marker_handle(&json, &self.markers)
                    .map(SessionHandle::from)
                    .unwrap_or_else(|| fallback.clone());
                BackendOutcome::Queued(handle)
            }
            Ok(_) => BackendOutcome::ImmediateSuccess {
                status: response.status,
                body: response.body,
            },
            // Accepted, but not a result we can hand back: treat as queued
            Err(_) => BackendOutcome::Queued(fallback.clone()),
        }
    }
}

fn settle(outcome: BackendOutcome, route: &str, encoding: Encoding) -> Option<Resolution> {
    match outcome {
        BackendOutcome::ImmediateSuccess { status, body } => Some(Resolution::Immediate {
            status,
            body,
            route: route.to_string(),
            encoding,
        }),
        BackendOutcome::Queued(handle) => Some(Resolution::Queued {
            handle,
            route: route.to_string(),
            encoding,
        }),
        BackendOutcome::RouteRejected(_) | BackendOutcome::TransportError(_) => None,
    }
}
