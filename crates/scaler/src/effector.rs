//! Effector used when no provisioning backend is wired in

use async_trait::async_trait;
use scaler_lib::scaling::ScalingEffector;
use tracing::info;

/// Accepts every change and records it in the log
pub struct LoggingEffector;

#[async_trait]
impl ScalingEffector for LoggingEffector {
    async fn scale_target(&self, target_id: &str, desired_instances: u32) -> anyhow::Result<bool> {
        info!(
            target_id = %target_id,
            desired_instances = desired_instances,
            "Scale request accepted"
        );
        Ok(true)
    }
}
