//! Health tracking for the capacity controller
//!
//! Each control loop job reports the outcome of every pass against its
//! component. One failed pass degrades the component; a run of
//! [`UNHEALTHY_AFTER_FAILURES`] failed passes in a row marks it unhealthy and
//! takes the controller out of readiness until a pass succeeds again.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed passes after which a component counts as unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 5;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Last pass succeeded
    Healthy,
    /// Recent passes failed but the component still does its job
    Degraded,
    /// Failing persistently
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Last reported state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failed passes since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None, 0)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()), 0)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()), 0)
    }

    /// State after one more failed pass on top of `previous`
    fn after_failure(previous: Option<&ComponentHealth>, message: String) -> Self {
        let failures = previous
            .map_or(0, |h| h.consecutive_failures)
            .saturating_add(1);
        let status = if failures >= UNHEALTHY_AFTER_FAILURES {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        Self::new(status, Some(message), failures)
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max_by_key(|status| match status {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy)
    }

    /// Names of unhealthy components, sorted
    pub fn unhealthy_components(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .components
            .iter()
            .filter(|(_, h)| h.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names, one per control loop concern
pub mod components {
    pub const METRIC_STORE: &str = "metric_store";
    pub const RULE_ENGINE: &str = "rule_engine";
    pub const ALLOCATOR: &str = "allocator";
    pub const FORECASTER: &str = "forecaster";

    pub const ALL: [&str; 4] = [METRIC_STORE, RULE_ENGINE, ALLOCATOR, FORECASTER];
}

/// Health registry shared by the control loop and the HTTP API
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Replace a component's health outright
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Mark component as healthy and clear its failure streak
    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Mark component as degraded
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    /// Mark component as unhealthy
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Count one failed pass. Degrades the component, or marks it unhealthy
    /// once the streak reaches [`UNHEALTHY_AFTER_FAILURES`].
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) -> ComponentStatus {
        let mut components = self.components.write().await;
        let health = ComponentHealth::after_failure(components.get(name), message.into());
        let status = health.status;
        components.insert(name.to_string(), health);
        status
    }

    /// Set readiness status
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn status_of(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().await.get(name).map(|h| h.status)
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once the control loop runs and nothing is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("control loop not started".to_string()),
            };
        }

        let health = self.health().await;
        let unhealthy = health.unhealthy_components();
        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_rule_engine_degrades_overall() {
        let registry = HealthRegistry::new();
        for name in components::ALL {
            registry.register(name).await;
        }

        registry
            .set_degraded(components::RULE_ENGINE, "effector rejected scale of web")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            registry.status_of(components::RULE_ENGINE).await,
            Some(ComponentStatus::Degraded)
        );

        registry.set_healthy(components::RULE_ENGINE).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_failure_streak_turns_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::METRIC_STORE).await;
        registry.set_ready(true).await;

        for _ in 1..UNHEALTHY_AFTER_FAILURES {
            assert_eq!(
                registry.record_failure(components::METRIC_STORE, "sources down").await,
                ComponentStatus::Degraded
            );
        }
        assert!(registry.readiness().await.ready);

        assert_eq!(
            registry.record_failure(components::METRIC_STORE, "sources down").await,
            ComponentStatus::Unhealthy
        );
        let health = registry.health().await;
        assert_eq!(
            health.components[components::METRIC_STORE].consecutive_failures,
            UNHEALTHY_AFTER_FAILURES
        );
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("unhealthy: metric_store"));

        registry.set_healthy(components::METRIC_STORE).await;
        assert!(registry.readiness().await.ready);
        assert_eq!(
            registry.record_failure(components::METRIC_STORE, "blip").await,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_readiness_follows_start_and_health() {
        let registry = HealthRegistry::new();
        registry.register(components::METRIC_STORE).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::METRIC_STORE, "Failed").await;
        assert!(!registry.readiness().await.ready);
    }
}
