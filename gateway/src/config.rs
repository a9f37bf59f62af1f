use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("At least one submission route is required")]
    NoSubmissionRoutes,

    #[error("At least one poll route is required")]
    NoPollRoutes,

    #[error("Route must start with '/': {0}")]
    InvalidRoute(String),

    #[error("Gateway path is reserved or invalid: {0}")]
    InvalidGatewayPath(String),

    #[error("At least one payload encoding is required")]
    NoEncodings,

    #[error("Duplicate payload encoding: {0}")]
    DuplicateEncoding(&'static str),

    #[error("Poll max_attempts must be at least 1")]
    InvalidPollAttempts,

    #[error("Backend attempt timeout must be greater than 0")]
    InvalidAttemptTimeout,
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Optional admin listener serving /health and /ready
    #[serde(default)]
    pub admin_listener: Option<Listener>,
    pub backend: BackendConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Ordered candidate routes and encodings tried against the backend
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub markers: MarkerConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub passthrough: PassthroughConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin) = &self.admin_listener {
            admin.validate()?;
        }

        if self.backend.attempt_timeout_ms == 0 {
            return Err(ValidationError::InvalidAttemptTimeout);
        }

        self.gateway.validate()?;
        self.resolution.validate()?;

        if self.poll.max_attempts == 0 {
            return Err(ValidationError::InvalidPollAttempts);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Remote inference backend
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Base URL every candidate route is resolved against
    ///
    /// Note: Uses the `url::Url` type so invalid URLs are rejected during
    /// config deserialization.
    pub base_url: Url,
    /// Environment variable holding an optional bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Deadline for a single outbound call, including reading the body
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl BackendConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reads the bearer token from the environment. A missing or empty
    /// variable means no Authorization header is sent.
    pub fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

fn default_token_env() -> String {
    "HF_TOKEN".to_string()
}

fn default_attempt_timeout_ms() -> u64 {
    12_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Inbound surface of the gateway
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Path accepting the client's POST (and the GET liveness probe)
    #[serde(default = "default_gateway_path")]
    pub path: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            path: default_gateway_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl GatewayConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.path.starts_with('/') || self.path == "/" || self.path == "/health" {
            return Err(ValidationError::InvalidGatewayPath(self.path.clone()));
        }
        Ok(())
    }
}

fn default_gateway_path() -> String {
    "/api/chat".to_string()
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

/// Wire encoding of a candidate payload
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Named fields: text, history, optional image/audio
    Keyed,
    /// Positional `data` array with a function index and session hash
    Positional,
}

impl Encoding {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Encoding::Keyed => "keyed",
            Encoding::Positional => "positional",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ResolutionConfig {
    /// Submission routes, cheapest / most likely first
    pub submission_routes: Vec<String>,
    /// Payload encodings tried for every route, in order
    #[serde(default = "default_encodings")]
    pub encodings: Vec<Encoding>,
    /// Route tried once when no primary candidate succeeded or queued
    #[serde(default)]
    pub queue_route: Option<String>,
    /// Status routes; `{session}` is replaced by the session handle
    pub poll_routes: Vec<String>,
}

impl ResolutionConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.submission_routes.is_empty() {
            return Err(ValidationError::NoSubmissionRoutes);
        }
        if self.poll_routes.is_empty() {
            return Err(ValidationError::NoPollRoutes);
        }

        for route in self
            .submission_routes
            .iter()
            .chain(self.poll_routes.iter())
            .chain(self.queue_route.iter())
        {
            if !route.starts_with('/') {
                return Err(ValidationError::InvalidRoute(route.clone()));
            }
        }

        if self.encodings.is_empty() {
            return Err(ValidationError::NoEncodings);
        }
        let mut seen = HashSet::new();
        for encoding in &self.encodings {
            if !seen.insert(encoding) {
                return Err(ValidationError::DuplicateEncoding(encoding.as_str()));
            }
        }

        Ok(())
    }
}

fn default_encodings() -> Vec<Encoding> {
    vec![Encoding::Keyed, Encoding::Positional]
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PollConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay slept before every attempt after the first
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_max_attempts() -> u32 {
    20
}

fn default_interval_ms() -> u64 {
    800
}

/// Field names used to tell a queued job apart from a direct result.
///
/// Note: these are guesses about the backend's envelope, kept in config so
/// they can follow the backend without code changes.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MarkerConfig {
    /// Presence of any of these (without a result field) means "queued"
    #[serde(default = "default_queued_fields")]
    pub queued_fields: Vec<String>,
    /// A non-empty value in any of these means "result available"
    #[serde(default = "default_result_fields")]
    pub result_fields: Vec<String>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            queued_fields: default_queued_fields(),
            result_fields: default_result_fields(),
        }
    }
}

fn default_queued_fields() -> Vec<String> {
    ["event_id", "session_hash", "hash", "job_id"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_result_fields() -> Vec<String> {
    vec!["result".to_string(), "output".to_string()]
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NormalizerConfig {
    /// Function index used by the positional encoding unless the client sets one
    #[serde(default)]
    pub fn_index: i64,
    /// Number of null placeholders following the text in the positional array
    #[serde(default = "default_placeholder_slots")]
    pub placeholder_slots: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            fn_index: 0,
            placeholder_slots: default_placeholder_slots(),
        }
    }
}

fn default_placeholder_slots() -> usize {
    2
}

/// Forwarding of requests outside the gateway path straight to the backend
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PassthroughConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DiagnosticsConfig {
    /// Characters of backend body kept in logs and error details
    #[serde(default = "default_body_preview_chars")]
    pub body_preview_chars: usize,
    /// Include per-attempt upstream detail in client error bodies
    #[serde(default = "default_expose_upstream_detail")]
    pub expose_upstream_detail: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            body_preview_chars: default_body_preview_chars(),
            expose_upstream_detail: default_expose_upstream_detail(),
        }
    }
}

fn default_body_preview_chars() -> usize {
    600
}

fn default_expose_upstream_detail() -> bool {
    cfg!(debug_assertions)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_YAML: &str = r#"
listener:
    host: "0.0.0.0"
    port: 10000
admin_listener:
    host: "127.0.0.1"
    port: 10001
backend:
    base_url: "https://example.hf.space"
    attempt_timeout_ms: 15000
resolution:
    submission_routes:
        - /run/predict
        - /api/predict
    encodings: [positional, keyed]
    queue_route: /queue/join
    poll_routes:
        - "/queue/data?session_hash={session}"
poll:
    max_attempts: 25
    interval_ms: 700
markers:
    queued_fields: [event_id]
"#;

    #[test]
    fn test_parse_valid_config() {
        let config: Config = serde_yaml::from_str(VALID_YAML).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 10000);
        assert_eq!(config.admin_listener.as_ref().unwrap().port, 10001);
        assert_eq!(config.backend.base_url.as_str(), "https://example.hf.space/");
        assert_eq!(config.backend.token_env, "HF_TOKEN");
        assert_eq!(config.backend.attempt_timeout(), Duration::from_secs(15));
        assert_eq!(config.resolution.submission_routes.len(), 2);
        assert_eq!(
            config.resolution.encodings,
            vec![Encoding::Positional, Encoding::Keyed]
        );
        assert_eq!(config.resolution.queue_route.as_deref(), Some("/queue/join"));
        assert_eq!(config.poll.max_attempts, 25);
        assert_eq!(config.poll.interval(), Duration::from_millis(700));
        assert_eq!(config.markers.queued_fields, vec!["event_id".to_string()]);
        // Unset sections fall back to defaults
        assert_eq!(config.markers.result_fields, vec!["result", "output"]);
        assert_eq!(config.gateway.path, "/api/chat");
        assert_eq!(config.gateway.max_body_bytes, 50 * 1024 * 1024);
        assert_eq!(config.normalizer.fn_index, 0);
        assert!(config.passthrough.enabled);
    }

    #[test]
    fn test_default_encodings() {
        let config: Config = serde_yaml::from_str(
            r#"
listener: {host: "0.0.0.0", port: 3000}
backend: {base_url: "http://127.0.0.1:7860"}
resolution:
    submission_routes: [/run/predict]
    poll_routes: [/queue/status]
"#,
        )
        .unwrap();
        assert_eq!(
            config.resolution.encodings,
            vec![Encoding::Keyed, Encoding::Positional]
        );
        assert!(config.admin_listener.is_none());
        assert_eq!(config.backend.attempt_timeout_ms, 12_000);
        assert_eq!(config.poll.max_attempts, 20);
    }

    #[test]
    fn test_validation_errors() {
        let base_config: Config = serde_yaml::from_str(VALID_YAML).unwrap();

        let mut config = base_config.clone();
        config.listener.port = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidPort
        ));

        let mut config = base_config.clone();
        config.resolution.submission_routes.clear();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::NoSubmissionRoutes
        ));

        let mut config = base_config.clone();
        config.resolution.poll_routes.clear();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::NoPollRoutes
        ));

        let mut config = base_config.clone();
        config.resolution.queue_route = Some("queue/join".to_string());
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidRoute(_)
        ));

        let mut config = base_config.clone();
        config.resolution.encodings = vec![Encoding::Keyed, Encoding::Keyed];
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::DuplicateEncoding("keyed")
        ));

        let mut config = base_config.clone();
        config.resolution.encodings.clear();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::NoEncodings
        ));

        let mut config = base_config.clone();
        config.poll.max_attempts = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidPollAttempts
        ));

        let mut config = base_config.clone();
        config.gateway.path = "/health".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidGatewayPath(_)
        ));

        let mut config = base_config;
        config.backend.attempt_timeout_ms = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidAttemptTimeout
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
backend: {base_url: "not-a-url"}
resolution: {submission_routes: [/a], poll_routes: [/b]}
"#
            )
            .is_err()
        );

        // Missing required section
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
backend: {base_url: "http://127.0.0.1"}
"#
            )
            .is_err()
        );

        assert!(serde_yaml::from_str::<Encoding>("form_data").is_err());
        assert_eq!(
            serde_yaml::from_str::<Encoding>("positional").unwrap(),
            Encoding::Positional
        );
    }
}
