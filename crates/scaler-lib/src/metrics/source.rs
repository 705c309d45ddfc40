//! Pluggable metric producers polled by the collection job

use super::ScalingMetric;
use anyhow::Result;
use async_trait::async_trait;

/// Trait for external collectors that produce metric samples on demand
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Human-readable name used in logs
    fn name(&self) -> &str;

    /// Collect the current batch of samples
    async fn collect(&self) -> Result<Vec<ScalingMetric>>;
}
