//! Observability infrastructure for the capacity controller
//!
//! Provides:
//! - Prometheus metrics (evaluation latency, scaling outcomes, allocation counts)
//! - Structured logging of state changes with tracing

use crate::forecast::ResourceForecast;
use crate::resources::Allocation;
use crate::scaling::ScalingEvent;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for evaluation latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    evaluation_latency_seconds: Histogram,
    rules_evaluated: IntCounter,
    scaling_events: IntCounterVec,
    evaluation_cycles_skipped: IntCounter,
    allocations_granted: IntCounter,
    requests_rejected: IntCounter,
    active_allocations: IntGauge,
    pending_requests: IntGauge,
    metric_samples: IntGauge,
    forecasts: IntGauge,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            evaluation_latency_seconds: register_histogram!(
                "capacity_scaler_evaluation_latency_seconds",
                "Time spent in one rule evaluation cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            rules_evaluated: register_int_counter!(
                "capacity_scaler_rules_evaluated_total",
                "Total number of rule evaluations"
            )
            .expect("Failed to register rules_evaluated"),

            scaling_events: register_int_counter_vec!(
                "capacity_scaler_scaling_events_total",
                "Scaling attempts by event type and outcome",
                &["type", "outcome"]
            )
            .expect("Failed to register scaling_events"),

            evaluation_cycles_skipped: register_int_counter!(
                "capacity_scaler_evaluation_cycles_skipped_total",
                "Evaluation cycles skipped because the previous one was still running"
            )
            .expect("Failed to register evaluation_cycles_skipped"),

            allocations_granted: register_int_counter!(
                "capacity_scaler_allocations_granted_total",
                "Total number of allocations granted"
            )
            .expect("Failed to register allocations_granted"),

            requests_rejected: register_int_counter!(
                "capacity_scaler_requests_rejected_total",
                "Total number of rejected resource requests"
            )
            .expect("Failed to register requests_rejected"),

            active_allocations: register_int_gauge!(
                "capacity_scaler_active_allocations",
                "Number of active allocations"
            )
            .expect("Failed to register active_allocations"),

            pending_requests: register_int_gauge!(
                "capacity_scaler_pending_requests",
                "Number of pending resource requests"
            )
            .expect("Failed to register pending_requests"),

            metric_samples: register_int_gauge!(
                "capacity_scaler_metric_samples",
                "Number of samples held in the metric store"
            )
            .expect("Failed to register metric_samples"),

            forecasts: register_int_gauge!(
                "capacity_scaler_forecasts",
                "Number of live forecasts"
            )
            .expect("Failed to register forecasts"),
        }
    }
}

/// Handle to the process-wide controller metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
    }

    pub fn inc_rules_evaluated(&self) {
        self.inner().rules_evaluated.inc();
    }

    pub fn record_scaling_event(&self, event: &ScalingEvent) {
        let outcome = if event.success { "success" } else { "failure" };
        self.inner()
            .scaling_events
            .with_label_values(&[&event.event_type.to_string(), outcome])
            .inc();
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner().evaluation_cycles_skipped.inc();
    }

    pub fn inc_allocations_granted(&self, count: u64) {
        self.inner().allocations_granted.inc_by(count);
    }

    pub fn inc_requests_rejected(&self) {
        self.inner().requests_rejected.inc();
    }

    pub fn set_allocation_state(&self, active: i64, pending: i64) {
        self.inner().active_allocations.set(active);
        self.inner().pending_requests.set(pending);
    }

    pub fn set_metric_samples(&self, samples: i64) {
        self.inner().metric_samples.set(samples);
    }

    pub fn set_forecasts(&self, count: i64) {
        self.inner().forecasts.set(count);
    }
}

/// Consistent `event = "..."` logging for controller state changes
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_scaling_event(&self, event: &ScalingEvent) {
        if event.success {
            info!(
                event = "target_scaled",
                node = %self.node_name,
                target_id = %event.target_id,
                rule_id = %event.rule_id,
                scaling_type = %event.event_type,
                previous_instances = event.previous_instances,
                new_instances = event.new_instances,
                reason = %event.reason,
                "Scaled target"
            );
        } else {
            warn!(
                event = "scaling_failed",
                node = %self.node_name,
                target_id = %event.target_id,
                rule_id = %event.rule_id,
                scaling_type = %event.event_type,
                previous_instances = event.previous_instances,
                requested_instances = event.new_instances,
                error = ?event.error,
                "Scaling attempt failed, keeping current instances"
            );
        }
    }

    pub fn log_allocation_granted(&self, request_id: &str, allocations: &[Allocation]) {
        for allocation in allocations {
            info!(
                event = "allocation_granted",
                node = %self.node_name,
                request_id = %request_id,
                allocation_id = %allocation.id,
                resource_id = %allocation.resource_id,
                amount = allocation.amount,
                unit = %allocation.unit,
                "Allocated resource"
            );
        }
    }

    pub fn log_allocation_released(&self, request_id: &str, released: usize) {
        info!(
            event = "allocation_released",
            node = %self.node_name,
            request_id = %request_id,
            released = released,
            "Released request allocations"
        );
    }

    pub fn log_allocation_expired(&self, allocation: &Allocation) {
        info!(
            event = "allocation_expired",
            node = %self.node_name,
            request_id = %allocation.request_id,
            allocation_id = %allocation.id,
            resource_id = %allocation.resource_id,
            "Allocation expired"
        );
    }

    pub fn log_request_rejected(&self, request_id: &str, reason: &str) {
        warn!(
            event = "request_rejected",
            node = %self.node_name,
            request_id = %request_id,
            reason = %reason,
            "Resource request rejected"
        );
    }

    pub fn log_forecast_updated(&self, forecast: &ResourceForecast) {
        info!(
            event = "forecast_updated",
            node = %self.node_name,
            target_id = %forecast.target_id,
            metric = %forecast.metric,
            points = forecast.predictions.len(),
            accuracy = forecast.accuracy,
            "Forecast updated"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "controller_started",
            node = %self.node_name,
            version = %version,
            "Capacity controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Capacity controller shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::ScalingEventType;
    use chrono::Utc;

    #[test]
    fn test_controller_metrics_handles_share_registry() {
        let metrics = ControllerMetrics::new();
        let other = metrics.clone();

        metrics.observe_evaluation_latency(0.002);
        metrics.inc_rules_evaluated();
        other.inc_cycles_skipped();
        other.set_allocation_state(3, 1);
        other.record_scaling_event(&ScalingEvent {
            timestamp: Utc::now(),
            target_id: "web".into(),
            rule_id: "r".into(),
            event_type: ScalingEventType::ScaleUp,
            previous_instances: 1,
            new_instances: 2,
            reason: "test".into(),
            success: true,
            error: None,
        });

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "capacity_scaler_scaling_events_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
    }
}
