use gateway::config::Config as GatewayConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub inference_gateway: GatewayConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Hosting platforms hand out the listen port through `PORT`.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> Result<(), ConfigError> {
        if let Some(raw) = port {
            let port = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(raw.to_string()))?;
            self.inference_gateway.listener.port = port;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("PORT is not a valid port number: {0}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    const GATEWAY_YAML: &str = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            inference_gateway:
                listener:
                    host: 0.0.0.0
                    port: 7860
                backend:
                    base_url: https://example.hf.space
                resolution:
                    submission_routes: [/run/predict, /api/predict]
                    queue_route: /queue/join
                    poll_routes: ["/queue/status/{session}"]
            "#;

    #[test]
    fn gateway_config() {
        let tmp = write_tmp_file(GATEWAY_YAML);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert!(config.common.logging.is_none());

        let gateway = config.inference_gateway;
        assert_eq!(gateway.listener.port, 7860);
        assert_eq!(gateway.backend.base_url.as_str(), "https://example.hf.space/");
        assert_eq!(gateway.gateway.path, "/api/chat");
        assert_eq!(gateway.poll.max_attempts, 20);
        gateway.validate().expect("valid config");
    }

    #[test]
    fn port_override() {
        let tmp = write_tmp_file(GATEWAY_YAML);
        let mut config = Config::from_file(tmp.path()).expect("load config");

        config.apply_port_override(None).unwrap();
        assert_eq!(config.inference_gateway.listener.port, 7860);

        config.apply_port_override(Some("8080")).unwrap();
        assert_eq!(config.inference_gateway.listener.port, 8080);

        let err = config.apply_port_override(Some("eighty")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(_)));
    }

    #[test]
    fn example_config_is_valid() {
        let path = std::path::Path::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/config.example.yaml"
        ));
        let config = Config::from_file(path).expect("load example config");
        assert!(config.common.metrics.is_none());
        let gateway = config.inference_gateway;
        gateway.validate().expect("valid example config");
        assert_eq!(gateway.resolution.poll_routes.len(), 2);
        assert!(!gateway.diagnostics.expose_upstream_detail);
    }

    #[test]
    fn missing_file_and_bad_yaml() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/gateway.yaml"));
        assert!(matches!(err, Err(ConfigError::LoadError(_))));

        let tmp = write_tmp_file("inference_gateway: [not, a, map]");
        let err = Config::from_file(tmp.path());
        assert!(matches!(err, Err(ConfigError::ParseError(_))));
    }
}
