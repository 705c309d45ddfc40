//! Scaler configuration

use anyhow::{Context, Result};
use scaler_lib::ControllerConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming an optional configuration file
const CONFIG_FILE_VAR: &str = "SCALER_CONFIG";

/// Scaler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScalerConfig {
    /// Name attached to log lines
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON file with targets, rules, policies and resources to load at startup
    #[serde(default)]
    pub seed_file: Option<PathBuf>,

    /// Store, engine, forecast and loop settings
    #[serde(default)]
    pub controller: ControllerConfig,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "capacity-scaler".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl ScalerConfig {
    /// Load configuration from an optional file, overridden by `SCALER_*`
    /// environment variables (`__` separates nested keys, e.g.
    /// `SCALER_CONTROLLER__INTERVALS__EVALUATION_SECS`)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_VAR) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("SCALER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("reading scaler configuration")?;

        config
            .try_deserialize()
            .context("invalid scaler configuration")
    }

    /// Controller settings with the node name applied
    pub fn controller_config(&self) -> ControllerConfig {
        self.controller.clone().with_node_name(self.node_name.clone())
    }
}
