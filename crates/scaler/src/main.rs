//! Capacity Scaler - rule and forecast driven capacity controller
//!
//! Runs the control loop against a logging effector and exposes health,
//! readiness, Prometheus metrics and controller stats over HTTP.

use anyhow::Result;
use chrono::Utc;
use scaler_lib::{health::HealthRegistry, CapacityController, ControlLoop};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod effector;
mod seed;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting capacity-scaler");

    let config = config::ScalerConfig::load()?;
    info!(node_name = %config.node_name, api_port = config.api_port, "Scaler configured");

    let controller = Arc::new(CapacityController::new(
        config.controller_config(),
        Arc::new(effector::LoggingEffector),
    ));

    if let Some(path) = &config.seed_file {
        seed::Seed::load(path)?.apply(&controller, Utc::now())?;
        let stats = controller.get_stats();
        info!(
            seed_file = %path.display(),
            targets = stats.targets,
            rules = stats.rules,
            policies = stats.policies,
            resources = stats.resources,
            "Controller seeded"
        );
    }

    let health_registry = HealthRegistry::new();
    let control_loop = ControlLoop::new(controller.clone(), health_registry.clone());

    let app_state = Arc::new(api::AppState::new(health_registry, controller));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Readiness flips once every job is running
    control_loop.start().await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => warn!(error = %e, "API server stopped"),
                Err(e) => warn!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    control_loop.shutdown().await;
    Ok(())
}
