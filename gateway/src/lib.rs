pub mod backend;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod normalizer;
pub mod passthrough;
pub mod poller;
pub mod resolver;
pub mod service;
pub mod session;
pub mod signals;

#[cfg(test)]
mod testutils;

use crate::backend::{Backend, HttpBackend};
use crate::config::Config;
use crate::errors::GatewayError;
use crate::service::{Gateway, GatewayService};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

pub async fn run(config: Config) -> Result<(), GatewayError> {
    config.validate()?;

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config.backend)?);
    let gateway = Arc::new(Gateway::new(&config, backend));
    let service = GatewayService::new(gateway, config.gateway.max_body_bytes);

    tracing::info!(
        backend = %config.backend.base_url,
        path = %config.gateway.path,
        submission_routes = config.resolution.submission_routes.len(),
        poll_routes = config.resolution.poll_routes.len(),
        "starting inference gateway"
    );

    let gateway_task = run_http_service(&config.listener.host, config.listener.port, service);

    match &config.admin_listener {
        Some(admin) => {
            let admin_service = AdminService::<_, GatewayError>::new(|| true);
            let admin_task = run_http_service(&admin.host, admin.port, admin_service);
            tokio::try_join!(gateway_task, admin_task)?;
        }
        None => gateway_task.await?,
    }

    Ok(())
}
