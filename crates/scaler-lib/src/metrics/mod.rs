//! Metric ingestion and time-windowed storage
//!
//! Samples arrive from external collectors (directly or through a
//! [`MetricSource`] polled by the control loop) and are kept per series in
//! timestamp order until they fall outside the retention window.

mod source;
mod statistics;
mod store;

pub use source::MetricSource;
pub use statistics::{percentile_nearest_rank, Statistic};
pub use store::{MetricStore, MetricStoreConfig, SeriesKey};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label set attached to a sample. Ordered so it can take part in a series key.
pub type Labels = BTreeMap<String, String>;

/// A single immutable metric sample for a scaling target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingMetric {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub target_id: String,
    #[serde(default)]
    pub labels: Labels,
}

impl ScalingMetric {
    pub fn new(
        target_id: impl Into<String>,
        name: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            unit: String::new(),
            timestamp,
            target_id: target_id.into(),
            labels: Labels::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
