//! Capacity controller facade and control loop
//!
//! This module provides:
//! - `CapacityController`: one object tying together the metric store,
//!   resource registry, scaling engine and forecaster
//! - `ControlLoop`: the periodic jobs that drive the controller

mod r#loop;


pub use r#loop::{ControlLoop, JobKind};

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::events::{Observers, Rejection};
use crate::forecast::{Forecaster, ResourceForecast};
use crate::metrics::{MetricStore, ScalingMetric};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::resources::{
    Allocation, MatchOutcome, PoolSummary, RequestStatus, Resource, ResourcePool,
    ResourceRegistry, ResourceRequest, ResourceStatus,
};
use crate::scaling::{
    ScalingEffector, ScalingEngine, ScalingEvent, ScalingPolicy, ScalingRule, ScalingTarget,
    ScheduledAction,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Point-in-time counts across the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub targets: usize,
    pub active_targets: usize,
    pub rules: usize,
    pub enabled_rules: usize,
    pub policies: usize,
    pub scheduled_actions: usize,
    pub events_succeeded: usize,
    pub events_failed: usize,
    pub resources: usize,
    pub pools: usize,
    pub active_allocations: usize,
    pub pending_requests: usize,
    pub metric_series: usize,
    pub metric_samples: usize,
    pub forecasts: usize,
}

/// What one queue tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueReport {
    /// Pending requests failed for missing their deadline
    pub expired: Vec<String>,
    pub allocated: Vec<String>,
    pub rejected: Vec<String>,
    /// Still pending, waiting on a scale-up
    pub deferred: Vec<String>,
}

pub struct CapacityController {
    config: ControllerConfig,
    store: Arc<MetricStore>,
    registry: ResourceRegistry,
    engine: ScalingEngine,
    forecaster: Arc<Forecaster>,
    observers: Arc<Observers>,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
}

impl CapacityController {
    pub fn new(config: ControllerConfig, effector: Arc<dyn ScalingEffector>) -> Self {
        let store = Arc::new(MetricStore::new(config.metrics.clone()));
        let forecaster = Arc::new(Forecaster::new(config.forecast.clone()));
        let observers = Arc::new(Observers::new());
        let logger = StructuredLogger::new(config.node_name.clone());
        let engine = ScalingEngine::new(
            config.engine.clone(),
            store.clone(),
            forecaster.clone(),
            effector,
            observers.clone(),
            logger.clone(),
        );

        Self {
            config,
            store,
            registry: ResourceRegistry::new(),
            engine,
            forecaster,
            observers,
            metrics: ControllerMetrics::new(),
            logger,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    // ---- metric ingestion ----

    pub fn record_metric(&self, metric: ScalingMetric) {
        self.store.record(metric);
        self.metrics.set_metric_samples(self.store.sample_count() as i64);
    }

    pub fn record_metrics(&self, metrics: impl IntoIterator<Item = ScalingMetric>) -> usize {
        let stored = self.store.record_batch(metrics);
        self.metrics.set_metric_samples(self.store.sample_count() as i64);
        stored
    }

    /// Apply the retention window to stored samples
    pub fn evict_expired_metrics(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.store.evict_expired(now);
        self.metrics.set_metric_samples(self.store.sample_count() as i64);
        evicted
    }

    // ---- scaling configuration ----

    pub fn add_target(&self, target: ScalingTarget) -> Result<()> {
        self.engine.add_target(target)
    }

    /// Remove a target with its rules, policies, scheduled actions, stored
    /// metrics and forecasts
    pub fn remove_target(&self, target_id: &str) -> Result<ScalingTarget> {
        let target = self.engine.remove_target(target_id)?;
        let series = self.store.remove_target(target_id);
        let forecasts = self.forecaster.remove_target(target_id);
        debug!(
            target_id = %target_id,
            series = series,
            forecasts = forecasts,
            "Dropped target history"
        );
        Ok(target)
    }

    pub fn pause_target(&self, target_id: &str) -> Result<()> {
        self.engine.pause_target(target_id)
    }

    pub fn resume_target(&self, target_id: &str) -> Result<()> {
        self.engine.resume_target(target_id)
    }

    pub fn update_target_instances(&self, target_id: &str, instances: u32) -> Result<()> {
        self.engine.update_target_instances(target_id, instances)
    }

    pub fn add_rule(&self, rule: ScalingRule) -> Result<()> {
        self.engine.add_rule(rule)
    }

    pub fn remove_rule(&self, rule_id: &str) -> Result<ScalingRule> {
        self.engine.remove_rule(rule_id)
    }

    pub fn add_policy(&self, policy: ScalingPolicy) -> Result<()> {
        self.engine.add_policy(policy)
    }

    pub fn remove_policy(&self, policy_id: &str) -> Result<ScalingPolicy> {
        self.engine.remove_policy(policy_id)
    }

    pub fn add_scheduled_action(&self, action: ScheduledAction) -> Result<()> {
        self.engine.add_scheduled_action(action)
    }

    pub fn remove_scheduled_action(&self, action_id: &str) -> Result<ScheduledAction> {
        self.engine.remove_scheduled_action(action_id)
    }

    // ---- resources ----

    pub fn add_resource(&self, resource: Resource) -> Result<()> {
        self.registry.add_resource(resource)
    }

    pub fn remove_resource(&self, resource_id: &str) -> Result<Resource> {
        self.registry.remove_resource(resource_id)
    }

    pub fn update_capacity(
        &self,
        resource_id: &str,
        capacity_total: f64,
        now: DateTime<Utc>,
    ) -> Result<Resource> {
        self.registry.update_capacity(resource_id, capacity_total, now)
    }

    pub fn set_resource_status(
        &self,
        resource_id: &str,
        status: ResourceStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.registry.set_status(resource_id, status, now)
    }

    pub fn create_resource_pool(
        &self,
        pool_id: impl Into<String>,
        name: impl Into<String>,
        resource_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<ResourcePool> {
        self.registry.create_resource_pool(pool_id, name, resource_ids, now)
    }

    pub fn remove_resource_pool(&self, pool_id: &str) -> Result<ResourcePool> {
        self.registry.remove_resource_pool(pool_id)
    }

    pub fn pool_summary(&self, pool_id: &str) -> Result<PoolSummary> {
        self.registry.pool_summary(pool_id)
    }

    pub fn get_resource(&self, resource_id: &str) -> Option<Resource> {
        self.registry.get_resource(resource_id)
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.registry.list_resources()
    }

    pub fn list_pools(&self) -> Vec<ResourcePool> {
        self.registry.list_pools()
    }

    // ---- demand ----

    /// Queue a request; high and critical requests are matched immediately.
    ///
    /// Returns the request status after submission. A rejection is a status,
    /// not an error.
    pub async fn request_resources(
        &self,
        request: ResourceRequest,
        now: DateTime<Utc>,
    ) -> Result<RequestStatus> {
        let request_id = request.id.clone();
        let immediate = request.priority.is_immediate();
        self.registry.submit_request(request)?;

        let status = if immediate {
            self.attempt_request(&request_id, now).await?
        } else {
            RequestStatus::Pending
        };
        self.refresh_allocation_gauges();
        Ok(status)
    }

    /// Match one pending request. Unmet demand either defers the request
    /// behind a scale-up or rejects it.
    async fn attempt_request(&self, request_id: &str, now: DateTime<Utc>) -> Result<RequestStatus> {
        match self.registry.try_allocate(request_id, now)? {
            MatchOutcome::Allocated(allocations) => {
                self.metrics.inc_allocations_granted(allocations.len() as u64);
                self.logger.log_allocation_granted(request_id, &allocations);
                self.observers.notify_allocation_granted(&allocations);
                Ok(RequestStatus::Allocated)
            }
            MatchOutcome::NotPending(status) => Ok(status),
            MatchOutcome::Unsatisfied {
                resource_type,
                reason,
            } => match self.engine.policy_for_resource_type(&resource_type) {
                Some(policy_id) => {
                    debug!(
                        request_id = %request_id,
                        policy_id = %policy_id,
                        resource_type = %resource_type,
                        "Deferring request behind scale-up"
                    );
                    if let Err(e) = self
                        .engine
                        .scale_for_demand(&policy_id, &resource_type, now)
                        .await
                    {
                        warn!(policy_id = %policy_id, error = %e, "Demand scale-up failed");
                    }
                    Ok(RequestStatus::Pending)
                }
                None => {
                    self.registry.mark_request(
                        request_id,
                        RequestStatus::Rejected,
                        Some(reason.clone()),
                    )?;
                    self.metrics.inc_requests_rejected();
                    self.logger.log_request_rejected(request_id, &reason);
                    if let Some(request) = self.registry.get_request(request_id) {
                        self.observers
                            .notify_request_rejected(&Rejection { request, reason });
                    }
                    Ok(RequestStatus::Rejected)
                }
            },
        }
    }

    /// Release every active allocation of a request and complete it
    pub fn release_resources(&self, request_id: &str, now: DateTime<Utc>) -> Result<Vec<Allocation>> {
        let released = self.registry.release_request(request_id, now)?;
        self.logger.log_allocation_released(request_id, released.len());
        self.observers.notify_allocation_released(&released);
        self.refresh_allocation_gauges();
        Ok(released)
    }

    /// Force-release allocations past their end time
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Allocation> {
        let expired = self.registry.expire_allocations(now);
        for allocation in &expired {
            self.logger.log_allocation_expired(allocation);
        }
        self.observers.notify_allocation_released(&expired);
        self.refresh_allocation_gauges();
        expired
    }

    /// Fail overdue requests, then attempt pending ones in queue order until
    /// a batch of them has settled. One failing request never stops the rest
    /// of the batch.
    ///
    /// Requests deferred behind a scale-up stay pending and do not count
    /// against the batch, so lower-priority requests that fit still get their
    /// turn behind a backlog of unmet demand.
    pub async fn process_queue(&self, now: DateTime<Utc>) -> QueueReport {
        let mut report = QueueReport {
            expired: self.registry.fail_overdue_requests(now),
            ..QueueReport::default()
        };

        let mut settled = 0;
        for request_id in self.registry.pending_batch(usize::MAX) {
            if settled >= self.config.queue_batch_size {
                break;
            }
            match self.attempt_request(&request_id, now).await {
                Ok(RequestStatus::Pending) => {
                    report.deferred.push(request_id);
                    continue;
                }
                Ok(RequestStatus::Allocated) => report.allocated.push(request_id),
                Ok(RequestStatus::Rejected) => report.rejected.push(request_id),
                Ok(_) => {}
                Err(e) => warn!(request_id = %request_id, error = %e, "Queued request failed"),
            }
            settled += 1;
        }

        self.refresh_allocation_gauges();
        report
    }

    fn refresh_allocation_gauges(&self) {
        self.metrics.set_allocation_state(
            self.registry.active_allocation_count() as i64,
            self.registry.pending_count() as i64,
        );
    }

    // ---- periodic passes ----

    pub async fn evaluate(&self, now: DateTime<Utc>) -> Vec<ScalingEvent> {
        self.engine.evaluate_rules(now).await
    }

    pub async fn run_scheduled(&self, now: DateTime<Utc>) -> Vec<ScalingEvent> {
        self.engine.run_scheduled_actions(now).await
    }

    /// Refresh forecasts for every (target, metric) a predictive policy uses
    pub fn update_forecasts(&self, now: DateTime<Utc>) -> Vec<ResourceForecast> {
        let specs = self.engine.forecast_specs();
        let updated = self.forecaster.update(&self.store, &specs, now);
        for forecast in &updated {
            self.logger.log_forecast_updated(forecast);
        }
        self.metrics.set_forecasts(self.forecaster.count() as i64);
        updated
    }

    pub fn is_evaluating(&self) -> bool {
        self.engine.is_evaluating()
    }

    // ---- queries ----

    pub fn get_targets(&self) -> Vec<ScalingTarget> {
        self.engine.list_targets()
    }

    pub fn get_target(&self, target_id: &str) -> Option<ScalingTarget> {
        self.engine.get_target(target_id)
    }

    pub fn get_rules(&self) -> Vec<ScalingRule> {
        self.engine.list_rules()
    }

    pub fn get_policies(&self) -> Vec<ScalingPolicy> {
        self.engine.list_policies()
    }

    pub fn get_scheduled_actions(&self) -> Vec<ScheduledAction> {
        self.engine.list_scheduled_actions()
    }

    pub fn get_events(&self, target_id: Option<&str>, limit: usize) -> Vec<ScalingEvent> {
        self.engine.get_events(target_id, limit)
    }

    /// Samples from the last `duration`, optionally filtered
    pub fn get_metrics(
        &self,
        target_id: Option<&str>,
        metric: Option<&str>,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Vec<ScalingMetric> {
        let since = now.checked_sub_signed(duration).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.snapshot(target_id, metric, since)
    }

    pub fn latest_metric(&self, target_id: &str, metric: &str) -> Option<ScalingMetric> {
        self.store.latest(target_id, metric)
    }

    pub fn get_forecasts(&self, target_id: Option<&str>) -> Vec<ResourceForecast> {
        self.forecaster.list(target_id)
    }

    pub fn get_request(&self, request_id: &str) -> Option<ResourceRequest> {
        self.registry.get_request(request_id)
    }

    pub fn pending_requests(&self) -> Vec<ResourceRequest> {
        self.registry.pending_requests()
    }

    pub fn allocations_for_request(&self, request_id: &str) -> Vec<Allocation> {
        self.registry.allocations_for_request(request_id)
    }

    pub fn get_stats(&self) -> ControllerStats {
        let (events_succeeded, events_failed) = self.engine.event_counts();
        ControllerStats {
            targets: self.engine.target_count(),
            active_targets: self.engine.active_target_count(),
            rules: self.engine.rule_count(),
            enabled_rules: self.engine.enabled_rule_count(),
            policies: self.engine.policy_count(),
            scheduled_actions: self.engine.scheduled_action_count(),
            events_succeeded,
            events_failed,
            resources: self.registry.resource_count(),
            pools: self.registry.pool_count(),
            active_allocations: self.registry.active_allocation_count(),
            pending_requests: self.registry.pending_count(),
            metric_series: self.store.series_count(),
            metric_samples: self.store.sample_count(),
            forecasts: self.forecaster.count(),
        }
    }

    // ---- observers ----

    pub fn on_scaling_event(&self, f: impl Fn(&ScalingEvent) + Send + Sync + 'static) {
        self.observers.on_scaling_event(f);
    }

    pub fn on_allocation_granted(&self, f: impl Fn(&[Allocation]) + Send + Sync + 'static) {
        self.observers.on_allocation_granted(f);
    }

    pub fn on_allocation_released(&self, f: impl Fn(&[Allocation]) + Send + Sync + 'static) {
        self.observers.on_allocation_released(f);
    }

    pub fn on_request_rejected(&self, f: impl Fn(&Rejection) + Send + Sync + 'static) {
        self.observers.on_request_rejected(f);
    }

    /// Drop all state and detach every observer
    pub fn destroy(&self) {
        self.engine.clear();
        self.registry.clear();
        self.store.clear();
        self.forecaster.clear();
        self.observers.clear();
        self.refresh_allocation_gauges();
        info!(node = %self.config.node_name, "Capacity controller state cleared");
    }
}
