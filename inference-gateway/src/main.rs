use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use gateway::config::ValidationError;
use gateway::errors::GatewayError;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod config;

const METRICS_PREFIX: &str = "inference_gateway";

#[derive(Parser)]
#[command(version, about = "HTTP gateway in front of an inference backend")]
enum CliCommand {
    /// Serve the gateway
    Run(ConfigArgs),
    /// Load and validate a config file, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("could not set up statsd exporter: {0}")]
    Statsd(String),
    #[error("a metrics recorder is already installed")]
    RecorderAlreadySet,
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

fn main() -> Result<(), StartupError> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::CheckConfig(args) => {
            let config = load_config(&args.config)?;
            config.inference_gateway.validate()?;
            println!("{}: ok", args.config.display());
            Ok(())
        }
        CliCommand::Run(args) => {
            let config = load_config(&args.config)?;
            let _sentry = init_logging(config.common.logging.as_ref());
            if let Some(metrics) = &config.common.metrics {
                init_metrics(metrics)?;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(gateway::run(config.inference_gateway))?;
            Ok(())
        }
    }
}

fn load_config(path: &std::path::Path) -> Result<Config, ConfigError> {
    let mut config = Config::from_file(path)?;
    config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
    Ok(config)
}

/// Installs the tracing subscriber. When a Sentry DSN is configured, events
/// are also reported to Sentry for as long as the returned guard lives.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: logging.environment.clone().map(Into::into),
                ..Default::default()
            },
        ))
    });

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    if guard.is_some() {
        tracing::info!("sentry reporting enabled");
    }
    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), StartupError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| StartupError::Statsd(e.to_string()))?;

    metrics::set_global_recorder(recorder).map_err(|_| StartupError::RecorderAlreadySet)?;
    shared::describe_all!(gateway::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
