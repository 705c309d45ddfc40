//! Controller configuration

use crate::forecast::ForecastConfig;
use crate::metrics::MetricStoreConfig;
use crate::scaling::EngineConfig;
use crate::span::MAX_SPAN_SECS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cadence of the control loop jobs, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopIntervals {
    pub collection_secs: u64,
    pub evaluation_secs: u64,
    pub scheduled_secs: u64,
    pub forecast_secs: u64,
    pub queue_secs: u64,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            collection_secs: 15,
            evaluation_secs: 30,
            scheduled_secs: 60,
            forecast_secs: 300,
            queue_secs: 5,
        }
    }
}

impl LoopIntervals {
    pub fn collection(&self) -> Duration {
        Duration::from_secs(self.collection_secs.clamp(1, MAX_SPAN_SECS))
    }

    pub fn evaluation(&self) -> Duration {
        Duration::from_secs(self.evaluation_secs.clamp(1, MAX_SPAN_SECS))
    }

    pub fn scheduled(&self) -> Duration {
        Duration::from_secs(self.scheduled_secs.clamp(1, MAX_SPAN_SECS))
    }

    pub fn forecast(&self) -> Duration {
        Duration::from_secs(self.forecast_secs.clamp(1, MAX_SPAN_SECS))
    }

    pub fn queue(&self) -> Duration {
        Duration::from_secs(self.queue_secs.clamp(1, MAX_SPAN_SECS))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Name attached to structured log lines
    pub node_name: String,
    pub metrics: MetricStoreConfig,
    pub forecast: ForecastConfig,
    pub engine: EngineConfig,
    pub intervals: LoopIntervals,
    /// Pending requests attempted per queue tick
    pub queue_batch_size: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_name: "capacity-scaler".to_string(),
            metrics: MetricStoreConfig::default(),
            forecast: ForecastConfig::default(),
            engine: EngineConfig::default(),
            intervals: LoopIntervals::default(),
            queue_batch_size: 10,
        }
    }
}

impl ControllerConfig {
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    pub fn with_intervals(mut self, intervals: LoopIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_queue_batch_size(mut self, size: usize) -> Self {
        self.queue_batch_size = size;
        self
    }
}
