use crate::backend::TransportError;
use crate::config::ValidationError;
use crate::resolver::AttemptSummary;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde_json::{Value, json};
use shared::http::json_response;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that can occur while serving a gateway request
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No backend candidate succeeded after {} attempts", .0.len())]
    CandidatesExhausted(Vec<AttemptSummary>),

    #[error("Backend job {handle} did not resolve after {attempts} poll attempts")]
    PollTimeout {
        handle: String,
        attempts: u32,
        last_outcome: Option<String>,
    },

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Request body is not valid JSON: {0}")]
    InvalidRequestBody(String),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(#[from] TransportError),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::CandidatesExhausted(_)
            | GatewayError::PollTimeout { .. }
            | GatewayError::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::InvalidRequestBody(_) | GatewayError::RequestBodyError(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::HttpClientError(_)
            | GatewayError::InvalidConfig(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name for the `error` field of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::CandidatesExhausted(_) => "candidates_exhausted",
            GatewayError::PollTimeout { .. } => "poll_timeout",
            GatewayError::PayloadTooLarge(_) => "payload_too_large",
            GatewayError::InvalidRequestBody(_) => "invalid_request_body",
            GatewayError::RequestBodyError(_) => "request_body_error",
            GatewayError::BackendUnreachable(_) => "backend_unreachable",
            GatewayError::HttpClientError(_)
            | GatewayError::InvalidConfig(_)
            | GatewayError::Io(_) => "internal_error",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            GatewayError::CandidatesExhausted(attempts) => serde_json::to_value(attempts).ok(),
            GatewayError::PollTimeout {
                handle,
                attempts,
                last_outcome,
            } => Some(json!({
                "session": handle,
                "attempts": attempts,
                "last_outcome": last_outcome,
            })),
            GatewayError::BackendUnreachable(e) => Some(json!(e.to_string())),
            _ => None,
        }
    }

    /// Structured JSON error body. Upstream detail is only attached when
    /// `expose_detail` is set.
    pub fn to_response(&self, expose_detail: bool) -> Response<Bytes> {
        let mut body = json!({
            "success": false,
            "error": self.kind(),
            "message": self.to_string(),
        });

        if expose_detail && let Some(details) = self.details() {
            body["details"] = details;
        }

        json_response(self.status_code(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Encoding;

    fn body_of(response: &Response<Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn test_terminal_failures_are_distinguishable() {
        let exhausted = GatewayError::CandidatesExhausted(vec![]);
        let timeout = GatewayError::PollTimeout {
            handle: "h1".to_string(),
            attempts: 3,
            last_outcome: None,
        };
        let unreachable = GatewayError::BackendUnreachable(TransportError::Request(
            "connection refused".to_string(),
        ));

        for err in [&exhausted, &timeout, &unreachable] {
            assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        }
        assert_ne!(exhausted.kind(), timeout.kind());
        assert_ne!(timeout.kind(), unreachable.kind());
        assert_ne!(exhausted.kind(), unreachable.kind());
    }

    #[test]
    fn test_client_and_internal_errors() {
        assert_eq!(
            GatewayError::InvalidRequestBody("eof".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::PayloadTooLarge(10).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::HttpClientError("tls backend unavailable".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_details_gated() {
        let err = GatewayError::CandidatesExhausted(vec![AttemptSummary {
            route: "/run/predict".to_string(),
            encoding: Encoding::Keyed,
            outcome: "rejected",
            status: Some(404),
            detail: Some("Not Found".to_string()),
        }]);

        let response = err.to_response(true);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_of(&response);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "candidates_exhausted");
        assert_eq!(body["details"][0]["route"], "/run/predict");
        assert_eq!(body["details"][0]["status"], 404);

        let body = body_of(&err.to_response(false));
        assert_eq!(body["error"], "candidates_exhausted");
        assert!(body.get("details").is_none());
    }
}
