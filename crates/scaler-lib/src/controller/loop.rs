//! Periodic jobs driving the controller
//!
//! Each job runs on its own cadence in its own task and owns a shutdown
//! channel. Handles live in one registry so teardown can signal and await
//! every job in one place.

use super::CapacityController;
use crate::health::{components, HealthRegistry};
use crate::metrics::MetricSource;
use crate::scaling::ScalingEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    MetricsCollection,
    RuleEvaluation,
    ScheduledActions,
    Forecasting,
    RequestQueue,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::MetricsCollection,
        JobKind::RuleEvaluation,
        JobKind::ScheduledActions,
        JobKind::Forecasting,
        JobKind::RequestQueue,
    ];

    /// Health component a pass of this job reports against
    pub fn component(self) -> &'static str {
        match self {
            JobKind::MetricsCollection => components::METRIC_STORE,
            JobKind::RuleEvaluation | JobKind::ScheduledActions => components::RULE_ENGINE,
            JobKind::Forecasting => components::FORECASTER,
            JobKind::RequestQueue => components::ALLOCATOR,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::MetricsCollection => "metrics_collection",
            JobKind::RuleEvaluation => "rule_evaluation",
            JobKind::ScheduledActions => "scheduled_actions",
            JobKind::Forecasting => "forecasting",
            JobKind::RequestQueue => "request_queue",
        };
        write!(f, "{}", name)
    }
}

struct JobHandle {
    kind: JobKind,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Shared by every job task
#[derive(Clone)]
struct JobContext {
    controller: Arc<CapacityController>,
    sources: Arc<Vec<Arc<dyn MetricSource>>>,
    health: HealthRegistry,
}

impl JobContext {
    /// Run one pass in its own task. A pass that panics counts as a failed
    /// pass of its component and the job keeps its schedule.
    async fn run_contained(&self, kind: JobKind, now: DateTime<Utc>) {
        let pass = self.clone();
        if let Err(e) = tokio::spawn(async move { pass.run_once(kind, now).await }).await {
            warn!(job = %kind, error = %e, "Control loop pass aborted");
            self.health
                .record_failure(kind.component(), format!("{} pass aborted: {}", kind, e))
                .await;
        }
    }

    async fn run_once(&self, kind: JobKind, now: DateTime<Utc>) {
        match kind {
            JobKind::MetricsCollection => self.collect_metrics(now).await,
            JobKind::RuleEvaluation => {
                let events = self.controller.evaluate(now).await;
                self.report_scaling(&events).await;
            }
            JobKind::ScheduledActions => {
                let events = self.controller.run_scheduled(now).await;
                self.report_scaling(&events).await;
            }
            JobKind::Forecasting => {
                let updated = self.controller.update_forecasts(now);
                debug!(forecasts = updated.len(), "Forecast cycle complete");
                self.health.set_healthy(components::FORECASTER).await;
            }
            JobKind::RequestQueue => {
                let expired = self.controller.sweep_expired(now);
                let report = self.controller.process_queue(now).await;
                if !expired.is_empty() || !report.allocated.is_empty() || !report.rejected.is_empty() {
                    debug!(
                        expired_allocations = expired.len(),
                        allocated = report.allocated.len(),
                        rejected = report.rejected.len(),
                        deferred = report.deferred.len(),
                        missed_deadline = report.expired.len(),
                        "Request queue cycle complete"
                    );
                }
                self.health.set_healthy(components::ALLOCATOR).await;
            }
        }
    }

    /// Poll every source, ingest what arrived, then apply retention
    async fn collect_metrics(&self, now: DateTime<Utc>) {
        let mut stored = 0;
        let mut failures = Vec::new();

        for source in self.sources.iter() {
            match source.collect().await {
                Ok(batch) => stored += self.controller.record_metrics(batch),
                Err(e) => {
                    warn!(source = %source.name(), error = %e, "Metric source failed");
                    failures.push(source.name().to_string());
                }
            }
        }
        let evicted = self.controller.evict_expired_metrics(now);
        debug!(stored = stored, evicted = evicted, "Metrics collection cycle complete");

        if failures.is_empty() {
            self.health.set_healthy(components::METRIC_STORE).await;
        } else {
            self.health
                .record_failure(
                    components::METRIC_STORE,
                    format!("metric sources failed: {}", failures.join(", ")),
                )
                .await;
        }
    }

    /// A failed effector call degrades the rule engine until the next
    /// successful scale; a long enough run of failures makes it unhealthy
    async fn report_scaling(&self, events: &[ScalingEvent]) {
        if let Some(failed) = events.iter().rev().find(|e| !e.success) {
            self.health
                .record_failure(
                    components::RULE_ENGINE,
                    format!(
                        "scaling {} failed: {}",
                        failed.target_id,
                        failed.error.as_deref().unwrap_or("unknown error")
                    ),
                )
                .await;
        } else if events.iter().any(|e| e.success) {
            self.health.set_healthy(components::RULE_ENGINE).await;
        }
    }
}

async fn run_job(
    context: JobContext,
    kind: JobKind,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(job = %kind, interval_secs = period.as_secs(), "Starting control loop job");
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                context.run_contained(kind, Utc::now()).await;
            }
            _ = shutdown.recv() => {
                info!(job = %kind, "Stopping control loop job");
                break;
            }
        }
    }
}

/// Owns the periodic jobs of one controller
pub struct ControlLoop {
    context: JobContext,
    jobs: Mutex<Vec<JobHandle>>,
}

impl ControlLoop {
    pub fn new(controller: Arc<CapacityController>, health: HealthRegistry) -> Self {
        Self {
            context: JobContext {
                controller,
                sources: Arc::new(Vec::new()),
                health,
            },
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Add a metric source polled by the collection job
    pub fn with_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        let mut sources: Vec<Arc<dyn MetricSource>> = self.context.sources.iter().cloned().collect();
        sources.push(source);
        self.context.sources = Arc::new(sources);
        self
    }

    pub fn controller(&self) -> &Arc<CapacityController> {
        &self.context.controller
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.context.health
    }

    fn period(&self, kind: JobKind) -> Duration {
        let intervals = &self.context.controller.config().intervals;
        match kind {
            JobKind::MetricsCollection => intervals.collection(),
            JobKind::RuleEvaluation => intervals.evaluation(),
            JobKind::ScheduledActions => intervals.scheduled(),
            JobKind::Forecasting => intervals.forecast(),
            JobKind::RequestQueue => intervals.queue(),
        }
    }

    /// Spawn every job and mark the controller ready. Starting a loop that
    /// is already running does nothing.
    pub async fn start(&self) {
        let mut jobs = self.jobs.lock().await;
        if !jobs.is_empty() {
            debug!("Control loop already running");
            return;
        }

        for name in components::ALL {
            self.context.health.register(name).await;
        }

        for kind in JobKind::ALL {
            let (shutdown, receiver) = broadcast::channel(1);
            let task = tokio::spawn(run_job(
                self.context.clone(),
                kind,
                self.period(kind),
                receiver,
            ));
            jobs.push(JobHandle {
                kind,
                shutdown,
                task,
            });
        }

        self.context.health.set_ready(true).await;
        self.context.controller.logger().log_startup(VERSION);
    }

    /// Run one iteration of a job inline, outside its schedule
    pub async fn run_once(&self, kind: JobKind, now: DateTime<Utc>) {
        self.context.run_contained(kind, now).await;
    }

    pub async fn running_jobs(&self) -> Vec<JobKind> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|job| !job.task.is_finished())
            .map(|job| job.kind)
            .collect()
    }

    /// Signal every job, wait for each to finish and mark the controller
    /// not ready
    pub async fn shutdown(&self) {
        let jobs: Vec<JobHandle> = self.jobs.lock().await.drain(..).collect();
        if jobs.is_empty() {
            return;
        }
        self.context.health.set_ready(false).await;

        for job in jobs {
            // the receiver is gone if the job already exited
            let _ = job.shutdown.send(());
            if let Err(e) = job.task.await {
                warn!(job = %job.kind, error = %e, "Control loop job ended abnormally");
            }
        }
        self.context.controller.logger().log_shutdown("control loop stopped");
    }
}
