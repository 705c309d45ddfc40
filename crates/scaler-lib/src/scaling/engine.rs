//! Scaling rule engine
//!
//! Owns scaling targets, rules, policies, scheduled actions and the event
//! log. Every change of a target's instance count goes through
//! `apply_scale`, which holds a per-target async mutex around the effector
//! call so two passes never race on the same target.

use super::actions::direction;
use super::evaluator::{evaluate_rule, RuleEvaluation};
use super::{
    clamp_instances, ActionKind, ScalingEffector, ScalingEvent, ScalingEventType, ScalingPolicy,
    Schedule, ScalingRule, ScalingTarget, ScheduledAction, TargetStatus,
};
use crate::error::{ControllerError, Result};
use crate::events::Observers;
use crate::forecast::{ForecastSpec, Forecaster};
use crate::metrics::MetricStore;
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::span::{self, MAX_SPAN_SECS};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Oldest events are dropped beyond this many
    pub event_history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_history_limit: 10_000,
        }
    }
}

/// How the event type of a scale attempt is derived
#[derive(Clone, Copy)]
enum EventKind<'a> {
    Action(&'a ActionKind),
    ScaleTo,
    Direction,
}

struct ScaleRequest<'a> {
    target_id: &'a str,
    rule_id: String,
    candidate: i64,
    kind: EventKind<'a>,
    reason: String,
}

/// Clears the re-entrancy flag when an evaluation pass ends
struct EvaluationGuard<'a>(&'a AtomicBool);

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub struct ScalingEngine {
    config: EngineConfig,
    store: Arc<MetricStore>,
    forecaster: Arc<Forecaster>,
    effector: Arc<dyn ScalingEffector>,
    observers: Arc<Observers>,
    targets: RwLock<BTreeMap<String, ScalingTarget>>,
    rules: RwLock<BTreeMap<String, ScalingRule>>,
    policies: RwLock<BTreeMap<String, ScalingPolicy>>,
    scheduled: RwLock<BTreeMap<String, ScheduledAction>>,
    events: RwLock<VecDeque<ScalingEvent>>,
    /// (rule id, action index) → end of that action's cooldown
    action_cooldowns: RwLock<HashMap<(String, usize), DateTime<Utc>>>,
    target_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    evaluating: AtomicBool,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
}

impl ScalingEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<MetricStore>,
        forecaster: Arc<Forecaster>,
        effector: Arc<dyn ScalingEffector>,
        observers: Arc<Observers>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            config,
            store,
            forecaster,
            effector,
            observers,
            targets: RwLock::new(BTreeMap::new()),
            rules: RwLock::new(BTreeMap::new()),
            policies: RwLock::new(BTreeMap::new()),
            scheduled: RwLock::new(BTreeMap::new()),
            events: RwLock::new(VecDeque::new()),
            action_cooldowns: RwLock::new(HashMap::new()),
            target_locks: DashMap::new(),
            evaluating: AtomicBool::new(false),
            metrics: ControllerMetrics::new(),
            logger,
        }
    }

    // ---- targets ----

    /// Register a target; `current_instances` must lie within its bounds
    pub fn add_target(&self, mut target: ScalingTarget) -> Result<()> {
        if target.min_instances > target.max_instances {
            return Err(ControllerError::InvalidConfig(format!(
                "target {} has min_instances {} above max_instances {}",
                target.id, target.min_instances, target.max_instances
            )));
        }
        if !target.is_within_bounds() {
            return Err(ControllerError::InvalidConfig(format!(
                "target {} starts at {} instances, outside [{}, {}]",
                target.id, target.current_instances, target.min_instances, target.max_instances
            )));
        }

        let mut targets = write(&self.targets);
        if targets.contains_key(&target.id) {
            return Err(ControllerError::InvalidConfig(format!(
                "target {} already exists",
                target.id
            )));
        }
        target.desired_instances = target.current_instances;
        info!(
            target_id = %target.id,
            current = target.current_instances,
            min = target.min_instances,
            max = target.max_instances,
            "Registered scaling target"
        );
        targets.insert(target.id.clone(), target);
        Ok(())
    }

    /// Remove a target together with its rules, policies and scheduled actions
    pub fn remove_target(&self, target_id: &str) -> Result<ScalingTarget> {
        let target = write(&self.targets)
            .remove(target_id)
            .ok_or_else(|| ControllerError::TargetNotFound(target_id.to_string()))?;

        let removed_rules: Vec<String> = {
            let mut rules = write(&self.rules);
            let ids: Vec<String> = rules
                .values()
                .filter(|r| r.target_id == target_id)
                .map(|r| r.id.clone())
                .collect();
            for id in &ids {
                rules.remove(id);
            }
            ids
        };
        write(&self.action_cooldowns).retain(|(rule_id, _), _| !removed_rules.contains(rule_id));
        write(&self.policies).retain(|_, p| p.target_id != target_id);
        write(&self.scheduled).retain(|_, a| a.target_id != target_id);
        self.target_locks.remove(target_id);

        info!(
            target_id = %target_id,
            rules_removed = removed_rules.len(),
            "Removed scaling target"
        );
        Ok(target)
    }

    pub fn get_target(&self, target_id: &str) -> Option<ScalingTarget> {
        read(&self.targets).get(target_id).cloned()
    }

    pub fn list_targets(&self) -> Vec<ScalingTarget> {
        read(&self.targets).values().cloned().collect()
    }

    fn set_target_status(&self, target_id: &str, status: TargetStatus) -> Result<()> {
        let mut targets = write(&self.targets);
        let target = targets
            .get_mut(target_id)
            .ok_or_else(|| ControllerError::TargetNotFound(target_id.to_string()))?;
        target.status = status;
        Ok(())
    }

    /// Exclude a target from rule, policy and scheduled scaling
    pub fn pause_target(&self, target_id: &str) -> Result<()> {
        self.set_target_status(target_id, TargetStatus::Paused)
    }

    pub fn resume_target(&self, target_id: &str) -> Result<()> {
        self.set_target_status(target_id, TargetStatus::Active)
    }

    /// Record the instance count actually observed by the provisioning side
    pub fn update_target_instances(&self, target_id: &str, instances: u32) -> Result<()> {
        let mut targets = write(&self.targets);
        let target = targets
            .get_mut(target_id)
            .ok_or_else(|| ControllerError::TargetNotFound(target_id.to_string()))?;
        target.current_instances = instances;
        target.desired_instances = instances;
        if !target.is_within_bounds() {
            warn!(
                target_id = %target_id,
                instances = instances,
                min = target.min_instances,
                max = target.max_instances,
                "Reported instance count is outside target bounds"
            );
        }
        Ok(())
    }

    // ---- rules ----

    /// Add or replace a rule
    pub fn add_rule(&self, rule: ScalingRule) -> Result<()> {
        rule.validate()?;
        if !read(&self.targets).contains_key(&rule.target_id) {
            return Err(ControllerError::TargetNotFound(rule.target_id.clone()));
        }
        write(&self.action_cooldowns).retain(|(rule_id, _), _| rule_id != &rule.id);
        debug!(rule_id = %rule.id, target_id = %rule.target_id, "Registered scaling rule");
        write(&self.rules).insert(rule.id.clone(), rule);
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) -> Result<ScalingRule> {
        let rule = write(&self.rules)
            .remove(rule_id)
            .ok_or_else(|| ControllerError::RuleNotFound(rule_id.to_string()))?;
        write(&self.action_cooldowns).retain(|(id, _), _| id != rule_id);
        Ok(rule)
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<ScalingRule> {
        read(&self.rules).get(rule_id).cloned()
    }

    pub fn list_rules(&self) -> Vec<ScalingRule> {
        read(&self.rules).values().cloned().collect()
    }

    // ---- policies ----

    /// Add or replace a policy
    pub fn add_policy(&self, policy: ScalingPolicy) -> Result<()> {
        if !read(&self.targets).contains_key(&policy.target_id) {
            return Err(ControllerError::TargetNotFound(policy.target_id.clone()));
        }
        if policy.cooldown_secs > MAX_SPAN_SECS {
            return Err(ControllerError::InvalidConfig(format!(
                "policy {} has cooldown {}s, past the {}s limit",
                policy.id, policy.cooldown_secs, MAX_SPAN_SECS
            )));
        }
        if let Some(predictive) = &policy.predictive {
            if predictive.target_value <= 0.0 || !predictive.target_value.is_finite() {
                return Err(ControllerError::InvalidConfig(format!(
                    "policy {} needs a positive predictive target_value",
                    policy.id
                )));
            }
            if predictive.look_ahead_minutes == 0 {
                return Err(ControllerError::InvalidConfig(format!(
                    "policy {} needs look_ahead_minutes >= 1",
                    policy.id
                )));
            }
        }
        write(&self.policies).insert(policy.id.clone(), policy);
        Ok(())
    }

    pub fn remove_policy(&self, policy_id: &str) -> Result<ScalingPolicy> {
        write(&self.policies)
            .remove(policy_id)
            .ok_or_else(|| ControllerError::PolicyNotFound(policy_id.to_string()))
    }

    pub fn list_policies(&self) -> Vec<ScalingPolicy> {
        read(&self.policies).values().cloned().collect()
    }

    /// First enabled policy, by id, that scales for unmet demand of this type
    pub fn policy_for_resource_type(&self, resource_type: &str) -> Option<String> {
        let targets = read(&self.targets);
        read(&self.policies)
            .values()
            .find(|p| p.covers(resource_type) && targets.contains_key(&p.target_id))
            .map(|p| p.id.clone())
    }

    /// What the forecaster should track; one entry per (target, metric) with
    /// the longest requested look-ahead
    pub fn forecast_specs(&self) -> Vec<ForecastSpec> {
        let mut specs: BTreeMap<(String, String), u32> = BTreeMap::new();
        for policy in read(&self.policies).values().filter(|p| p.enabled) {
            if let Some(predictive) = &policy.predictive {
                let entry = specs
                    .entry((policy.target_id.clone(), predictive.metric.clone()))
                    .or_insert(0);
                *entry = (*entry).max(predictive.look_ahead_minutes);
            }
        }
        specs
            .into_iter()
            .map(|((target_id, metric), look_ahead_minutes)| ForecastSpec {
                target_id,
                metric,
                look_ahead_minutes,
            })
            .collect()
    }

    // ---- scheduled actions ----

    /// Add or replace a scheduled action
    pub fn add_scheduled_action(&self, action: ScheduledAction) -> Result<()> {
        if !read(&self.targets).contains_key(&action.target_id) {
            return Err(ControllerError::TargetNotFound(action.target_id.clone()));
        }
        if let Schedule::Every { interval_secs, .. } = &action.schedule {
            if *interval_secs == 0 || *interval_secs > MAX_SPAN_SECS {
                return Err(ControllerError::InvalidConfig(format!(
                    "scheduled action {} needs an interval between 1 and {}s",
                    action.id, MAX_SPAN_SECS
                )));
            }
        }
        if let (Some(min), Some(max)) = (action.min_instances, action.max_instances) {
            if min > max {
                return Err(ControllerError::InvalidConfig(format!(
                    "scheduled action {} sets min {} above max {}",
                    action.id, min, max
                )));
            }
        }
        write(&self.scheduled).insert(action.id.clone(), action);
        Ok(())
    }

    pub fn remove_scheduled_action(&self, action_id: &str) -> Result<ScheduledAction> {
        write(&self.scheduled)
            .remove(action_id)
            .ok_or_else(|| ControllerError::ScheduledActionNotFound(action_id.to_string()))
    }

    pub fn list_scheduled_actions(&self) -> Vec<ScheduledAction> {
        read(&self.scheduled).values().cloned().collect()
    }

    // ---- evaluation ----

    pub fn is_evaluating(&self) -> bool {
        self.evaluating.load(Ordering::SeqCst)
    }

    /// Run one evaluation pass over every enabled rule, then predictive
    /// policies. A pass that starts while another is running is skipped
    /// entirely and returns no events.
    pub async fn evaluate_rules(&self, now: DateTime<Utc>) -> Vec<ScalingEvent> {
        if self
            .evaluating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.metrics.inc_cycles_skipped();
            debug!("Previous evaluation still running, skipping cycle");
            return Vec::new();
        }
        let _guard = EvaluationGuard(&self.evaluating);
        let started = Instant::now();

        let mut events = Vec::new();
        for rule in self.rules_due(now) {
            self.metrics.inc_rules_evaluated();
            let evaluation = evaluate_rule(&self.store, &rule, now);
            if evaluation.triggered {
                events.extend(self.execute_actions(&rule, &evaluation, now).await);
            }
        }
        events.extend(self.evaluate_predictive(now).await);

        self.metrics
            .observe_evaluation_latency(started.elapsed().as_secs_f64());
        events
    }

    /// Enabled rules of active targets outside their cooldown, highest
    /// priority first
    fn rules_due(&self, now: DateTime<Utc>) -> Vec<ScalingRule> {
        let targets = read(&self.targets);
        let mut rules: Vec<ScalingRule> = read(&self.rules)
            .values()
            .filter(|r| r.enabled && !r.is_cooling_down(now))
            .filter(|r| {
                targets
                    .get(&r.target_id)
                    .map_or(false, |t| t.status == TargetStatus::Active)
            })
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    async fn execute_actions(
        &self,
        rule: &ScalingRule,
        evaluation: &RuleEvaluation,
        now: DateTime<Utc>,
    ) -> Vec<ScalingEvent> {
        let measured = evaluation.measured_value();
        let mut events = Vec::new();

        for (index, action) in rule.actions.iter().enumerate() {
            if self.action_cooling_down(&rule.id, index, now) {
                debug!(rule_id = %rule.id, action = index, "Action cooling down");
                continue;
            }
            let current = match self.get_target(&rule.target_id) {
                Some(t) if t.status == TargetStatus::Active => t.current_instances,
                _ => break,
            };
            let Some(candidate) = action.kind.desired(current, measured) else {
                debug!(
                    rule_id = %rule.id,
                    action = index,
                    measured = ?measured,
                    "Action produced no instance count"
                );
                continue;
            };

            let request = ScaleRequest {
                target_id: &rule.target_id,
                rule_id: rule.id.clone(),
                candidate,
                kind: EventKind::Action(&action.kind),
                reason: format!(
                    "rule {} met {:.2} of {:.2} weight: {}",
                    rule.id,
                    evaluation.met_weight,
                    evaluation.total_weight,
                    action.kind.describe()
                ),
            };

            match self.apply_scale(request, now).await {
                Ok(Some(event)) => {
                    if let Some(secs) = action.cooldown_secs {
                        let until = span::after(now, secs).unwrap_or(DateTime::<Utc>::MAX_UTC);
                        write(&self.action_cooldowns).insert((rule.id.clone(), index), until);
                    }
                    if let Some(stored) = write(&self.rules).get_mut(&rule.id) {
                        stored.last_triggered = Some(now);
                    }
                    events.push(event);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "Scaling action aborted");
                    break;
                }
            }
        }

        events
    }

    fn action_cooling_down(&self, rule_id: &str, index: usize, now: DateTime<Utc>) -> bool {
        read(&self.action_cooldowns)
            .get(&(rule_id.to_string(), index))
            .map_or(false, |until| now < *until)
    }

    /// Scale out ahead of forecast peaks for every enabled predictive policy
    async fn evaluate_predictive(&self, now: DateTime<Utc>) -> Vec<ScalingEvent> {
        let policies: Vec<ScalingPolicy> = read(&self.policies)
            .values()
            .filter(|p| p.enabled && p.predictive.is_some() && !p.is_cooling_down(now))
            .cloned()
            .collect();

        let mut events = Vec::new();
        for policy in policies {
            let Some(predictive) = &policy.predictive else {
                continue;
            };
            let current = match self.get_target(&policy.target_id) {
                Some(t) if t.status == TargetStatus::Active => t.current_instances,
                _ => continue,
            };
            let Some(peak) = self
                .forecaster
                .get(&policy.target_id, &predictive.metric)
                .and_then(|f| f.peak(predictive.min_confidence, now))
            else {
                continue;
            };

            let candidate = (f64::from(current) * peak / predictive.target_value).ceil() as i64;
            if candidate <= i64::from(current) {
                continue;
            }

            let request = ScaleRequest {
                target_id: &policy.target_id,
                rule_id: format!("predictive-{}", policy.id),
                candidate,
                kind: EventKind::Direction,
                reason: format!(
                    "forecast peak {:.2} of {} exceeds target value {:.2}",
                    peak, predictive.metric, predictive.target_value
                ),
            };
            match self.apply_scale(request, now).await {
                Ok(Some(event)) => {
                    self.mark_policy_triggered(&policy.id, now);
                    events.push(event);
                }
                Ok(None) => {}
                Err(e) => warn!(policy_id = %policy.id, error = %e, "Predictive scaling aborted"),
            }
        }
        events
    }

    fn mark_policy_triggered(&self, policy_id: &str, now: DateTime<Utc>) {
        if let Some(policy) = write(&self.policies).get_mut(policy_id) {
            policy.last_triggered = Some(now);
        }
    }

    /// Scale a policy's target up by its adjustment to absorb unmet demand.
    ///
    /// Returns `Ok(None)` when the policy is disabled, cooling down, its
    /// target is paused, or the target is already at its maximum.
    pub async fn scale_for_demand(
        &self,
        policy_id: &str,
        resource_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScalingEvent>> {
        let policy = read(&self.policies)
            .get(policy_id)
            .cloned()
            .ok_or_else(|| ControllerError::PolicyNotFound(policy_id.to_string()))?;
        if !policy.enabled || policy.is_cooling_down(now) {
            return Ok(None);
        }
        let target = self
            .get_target(&policy.target_id)
            .ok_or_else(|| ControllerError::TargetNotFound(policy.target_id.clone()))?;
        if target.status != TargetStatus::Active {
            return Ok(None);
        }

        let request = ScaleRequest {
            target_id: &policy.target_id,
            rule_id: format!("policy-{}", policy.id),
            candidate: i64::from(target.current_instances) + i64::from(policy.scale_up_adjustment),
            kind: EventKind::Direction,
            reason: format!("unmet demand for {}", resource_type),
        };
        let event = self.apply_scale(request, now).await?;
        if event.is_some() {
            self.mark_policy_triggered(&policy.id, now);
        }
        Ok(event)
    }

    /// Run every due scheduled action against its target
    pub async fn run_scheduled_actions(&self, now: DateTime<Utc>) -> Vec<ScalingEvent> {
        let due: Vec<ScheduledAction> = read(&self.scheduled)
            .values()
            .filter(|a| a.is_due(now))
            .cloned()
            .collect();

        let mut events = Vec::new();
        for action in due {
            let candidate = {
                let mut targets = write(&self.targets);
                let Some(target) = targets.get_mut(&action.target_id) else {
                    warn!(action_id = %action.id, target_id = %action.target_id, "Scheduled action target missing");
                    continue;
                };
                if target.status != TargetStatus::Active {
                    continue;
                }
                let min = action.min_instances.unwrap_or(target.min_instances);
                let max = action.max_instances.unwrap_or(target.max_instances);
                if min > max {
                    warn!(
                        action_id = %action.id,
                        min = min,
                        max = max,
                        "Scheduled bounds are inverted, skipping"
                    );
                    continue;
                }
                target.min_instances = min;
                target.max_instances = max;
                action.desired_instances.unwrap_or(target.current_instances)
            };

            if let Some(stored) = write(&self.scheduled).get_mut(&action.id) {
                stored.last_run = Some(now);
            }

            let request = ScaleRequest {
                target_id: &action.target_id,
                rule_id: action.rule_id(),
                candidate: i64::from(candidate),
                kind: EventKind::ScaleTo,
                reason: format!("scheduled action {}", action.id),
            };
            match self.apply_scale(request, now).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => warn!(action_id = %action.id, error = %e, "Scheduled action aborted"),
            }
        }
        events
    }

    /// Clamp, call the effector and record the outcome.
    ///
    /// Returns `Ok(None)` when the clamped count equals the current count.
    async fn apply_scale(
        &self,
        request: ScaleRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<ScalingEvent>> {
        let lock = self
            .target_locks
            .entry(request.target_id.to_string())
            .or_default()
            .clone();
        let _held = lock.lock().await;

        let (previous, desired) = {
            let mut targets = write(&self.targets);
            let target = targets
                .get_mut(request.target_id)
                .ok_or_else(|| ControllerError::TargetNotFound(request.target_id.to_string()))?;
            let desired =
                clamp_instances(request.candidate, target.min_instances, target.max_instances);
            if desired == target.current_instances {
                return Ok(None);
            }
            target.desired_instances = desired;
            (target.current_instances, desired)
        };

        let (success, error) = match self.effector.scale_target(request.target_id, desired).await {
            Ok(true) => (true, None),
            Ok(false) => (false, Some("effector declined the change".to_string())),
            Err(e) => (false, Some(e.to_string())),
        };

        if let Some(target) = write(&self.targets).get_mut(request.target_id) {
            if success {
                target.current_instances = desired;
                target.last_scaled = Some(now);
            } else {
                target.desired_instances = target.current_instances;
            }
        }

        let event_type = match request.kind {
            EventKind::Action(kind) => kind.event_type(previous, desired),
            EventKind::ScaleTo => ScalingEventType::ScaleTo,
            EventKind::Direction => direction(previous, desired),
        };
        let event = ScalingEvent {
            timestamp: now,
            target_id: request.target_id.to_string(),
            rule_id: request.rule_id,
            event_type,
            previous_instances: previous,
            new_instances: desired,
            reason: request.reason,
            success,
            error,
        };
        self.record_event(event.clone());
        Ok(Some(event))
    }

    fn record_event(&self, event: ScalingEvent) {
        self.metrics.record_scaling_event(&event);
        self.logger.log_scaling_event(&event);
        self.observers.notify_scaling_event(&event);

        let mut events = write(&self.events);
        events.push_back(event);
        while events.len() > self.config.event_history_limit {
            events.pop_front();
        }
    }

    // ---- queries ----

    /// Up to `limit` most recent events, oldest first
    pub fn get_events(&self, target_id: Option<&str>, limit: usize) -> Vec<ScalingEvent> {
        let events = read(&self.events);
        let mut selected: Vec<ScalingEvent> = events
            .iter()
            .rev()
            .filter(|e| target_id.map_or(true, |t| e.target_id == t))
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    pub fn target_count(&self) -> usize {
        read(&self.targets).len()
    }

    pub fn active_target_count(&self) -> usize {
        read(&self.targets)
            .values()
            .filter(|t| t.status == TargetStatus::Active)
            .count()
    }

    pub fn rule_count(&self) -> usize {
        read(&self.rules).len()
    }

    pub fn enabled_rule_count(&self) -> usize {
        read(&self.rules).values().filter(|r| r.enabled).count()
    }

    pub fn policy_count(&self) -> usize {
        read(&self.policies).len()
    }

    pub fn scheduled_action_count(&self) -> usize {
        read(&self.scheduled).len()
    }

    /// (succeeded, failed) events still held in history
    pub fn event_counts(&self) -> (usize, usize) {
        let events = read(&self.events);
        let succeeded = events.iter().filter(|e| e.success).count();
        (succeeded, events.len() - succeeded)
    }

    pub fn clear(&self) {
        write(&self.targets).clear();
        write(&self.rules).clear();
        write(&self.policies).clear();
        write(&self.scheduled).clear();
        write(&self.events).clear();
        write(&self.action_cooldowns).clear();
        self.target_locks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ScalingMetric, Statistic};
    use crate::scaling::effector::mock::RecordingEffector;
    use crate::scaling::{AdjustmentType, ComparisonOperator, ScalingAction, ScalingCondition};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn engine_with(effector: Arc<RecordingEffector>) -> (ScalingEngine, Arc<MetricStore>) {
        let store = Arc::new(MetricStore::default());
        let engine = ScalingEngine::new(
            EngineConfig::default(),
            store.clone(),
            Arc::new(Forecaster::default()),
            effector,
            Arc::new(Observers::new()),
            StructuredLogger::new("test"),
        );
        (engine, store)
    }

    fn hot_cpu(store: &MetricStore, at: DateTime<Utc>) {
        for offset in [100, 70, 40, 10] {
            store.record(ScalingMetric::new("web", "cpu", 90.0, at - Duration::seconds(offset)));
        }
    }

    fn scale_up_rule() -> ScalingRule {
        ScalingRule::new("cpu-high", "web")
            .with_condition(
                ScalingCondition::new("cpu", Statistic::Average, ComparisonOperator::GreaterThan, 80.0)
                    .periods(60, 2, 2),
            )
            .with_action(ScalingAction::change(AdjustmentType::Absolute, 2.0))
    }

    #[test]
    fn test_target_bounds_validated() {
        let (engine, _) = engine_with(Arc::new(RecordingEffector::default()));
        assert!(engine.add_target(ScalingTarget::new("a", 0, 1, 10)).is_err());
        assert!(engine.add_target(ScalingTarget::new("b", 5, 6, 4)).is_err());
        assert!(engine.add_target(ScalingTarget::new("c", 2, 1, 10)).is_ok());
        assert!(engine.add_target(ScalingTarget::new("c", 2, 1, 10)).is_err());
    }

    #[test]
    fn test_rule_needs_existing_target() {
        let (engine, _) = engine_with(Arc::new(RecordingEffector::default()));
        assert_eq!(
            engine.add_rule(scale_up_rule()),
            Err(ControllerError::TargetNotFound("web".into()))
        );
    }

    #[test]
    fn test_out_of_range_spans_rejected_at_registration() {
        let (engine, _) = engine_with(Arc::new(RecordingEffector::default()));
        engine.add_target(ScalingTarget::new("web", 2, 1, 10)).unwrap();

        let endless_action = scale_up_rule()
            .with_action(ScalingAction::change(AdjustmentType::Absolute, 1.0).with_cooldown(u64::MAX));
        assert!(matches!(
            engine.add_rule(endless_action),
            Err(ControllerError::InvalidConfig(_))
        ));

        let policy = ScalingPolicy::new("p", "web").with_cooldown(u64::MAX);
        assert!(matches!(engine.add_policy(policy), Err(ControllerError::InvalidConfig(_))));

        for interval_secs in [0, u64::MAX] {
            let action = ScheduledAction::new(
                "tick",
                "web",
                crate::scaling::Schedule::Every {
                    interval_secs,
                    starting: now(),
                },
            );
            assert!(engine.add_scheduled_action(action).is_err());
        }
        assert!(engine.list_rules().is_empty());
        assert!(engine.list_policies().is_empty());
        assert!(engine.list_scheduled_actions().is_empty());
    }

    #[tokio::test]
    async fn test_longest_action_cooldown_arms_without_overflow() {
        let (engine, store) = engine_with(Arc::new(RecordingEffector::default()));
        engine.add_target(ScalingTarget::new("web", 2, 1, 20)).unwrap();
        let rule = ScalingRule::new("cpu-high", "web")
            .with_condition(
                ScalingCondition::new("cpu", Statistic::Average, ComparisonOperator::GreaterThan, 80.0)
                    .periods(60, 2, 2),
            )
            .with_action(ScalingAction::change(AdjustmentType::Absolute, 1.0).with_cooldown(MAX_SPAN_SECS));
        engine.add_rule(rule).unwrap();

        hot_cpu(&store, now());
        assert_eq!(engine.evaluate_rules(now()).await.len(), 1);

        let later = now() + Duration::days(365);
        hot_cpu(&store, later);
        assert!(engine.evaluate_rules(later).await.is_empty());
        assert_eq!(engine.get_target("web").unwrap().current_instances, 3);
    }

    #[tokio::test]
    async fn test_declined_scale_is_a_failed_event() {
        let effector = Arc::new(RecordingEffector::declining());
        let (engine, store) = engine_with(effector.clone());
        engine.add_target(ScalingTarget::new("web", 2, 1, 10)).unwrap();
        engine.add_rule(scale_up_rule()).unwrap();
        hot_cpu(&store, now());

        let events = engine.evaluate_rules(now()).await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert_eq!(events[0].new_instances, 4);

        let target = engine.get_target("web").unwrap();
        assert_eq!(target.current_instances, 2);
        assert_eq!(target.desired_instances, 2);
        assert_eq!(engine.event_counts(), (0, 1));
    }

    #[tokio::test]
    async fn test_action_cooldown_is_independent_of_rule_cooldown() {
        let effector = Arc::new(RecordingEffector::default());
        let (engine, store) = engine_with(effector.clone());
        engine.add_target(ScalingTarget::new("web", 2, 1, 20)).unwrap();
        let rule = scale_up_rule()
            .with_action(ScalingAction::change(AdjustmentType::Absolute, 1.0).with_cooldown(600));
        engine.add_rule(rule).unwrap();

        hot_cpu(&store, now());
        let first = engine.evaluate_rules(now()).await;
        assert_eq!(first.len(), 2);
        assert_eq!(engine.get_target("web").unwrap().current_instances, 5);

        // rule has no cooldown, the second action still does
        let later = now() + Duration::seconds(60);
        hot_cpu(&store, later);
        let second = engine.evaluate_rules(later).await;
        assert_eq!(second.len(), 1);
        assert_eq!(engine.get_target("web").unwrap().current_instances, 7);
    }

    #[tokio::test]
    async fn test_events_bounded_and_filtered() {
        let store = Arc::new(MetricStore::default());
        let engine = ScalingEngine::new(
            EngineConfig {
                event_history_limit: 3,
            },
            store,
            Arc::new(Forecaster::default()),
            Arc::new(RecordingEffector::default()),
            Arc::new(Observers::new()),
            StructuredLogger::new("test"),
        );
        engine.add_target(ScalingTarget::new("web", 1, 1, 100)).unwrap();
        engine.add_target(ScalingTarget::new("api", 1, 1, 100)).unwrap();

        for (i, desired) in [2u32, 3, 4, 5].iter().enumerate() {
            let target = if i % 2 == 0 { "web" } else { "api" };
            let action = ScheduledAction::new(
                format!("s{}", i),
                target,
                crate::scaling::Schedule::At { at: now() },
            )
            .with_desired(*desired);
            engine.add_scheduled_action(action).unwrap();
        }
        let events = engine.run_scheduled_actions(now()).await;
        assert_eq!(events.len(), 4);

        let all = engine.get_events(None, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].rule_id, "scheduled-s1");

        let web = engine.get_events(Some("web"), 10);
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].new_instances, 4);

        assert_eq!(engine.get_events(None, 1)[0].rule_id, "scheduled-s3");
    }
}
