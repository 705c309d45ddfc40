//! Condition and rule evaluation over metric windows
//!
//! A condition looks back `evaluation_periods × period` seconds from `now`,
//! splits that span into contiguous windows `(start, end]`, computes its
//! statistic per window and counts breaching windows. A rule triggers when
//! the met conditions carry at least half of the total weight.

use super::rules::{MissingDataTreatment, ScalingCondition, ScalingRule};
use crate::error::{ControllerError, Result};
use crate::metrics::MetricStore;
use crate::span;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Share of the total condition weight that must be met to trigger a rule
pub const TRIGGER_WEIGHT_RATIO: f64 = 0.5;

/// Outcome of one evaluation window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub samples: usize,
    /// Computed statistic; 0 for ignored missing data, `None` when the
    /// missing-data treatment decided the outcome without a value
    pub value: Option<f64>,
    pub breaching: bool,
}

/// Outcome of one condition
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionResult {
    pub metric: String,
    pub met: bool,
    pub breaching_windows: u32,
    pub weight: f64,
    /// Statistic of the most recent window that had samples
    pub measured_value: Option<f64>,
    pub windows: Vec<WindowResult>,
    /// Configuration problem that forced the condition to not-met
    pub error: Option<String>,
}

impl ConditionResult {
    fn failed_closed(condition: &ScalingCondition, error: String) -> Self {
        Self {
            metric: condition.metric.clone(),
            met: false,
            breaching_windows: 0,
            weight: condition.weight,
            measured_value: None,
            windows: Vec::new(),
            error: Some(error),
        }
    }
}

/// Outcome of one rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub triggered: bool,
    pub met_weight: f64,
    pub total_weight: f64,
    pub conditions: Vec<ConditionResult>,
}

impl RuleEvaluation {
    /// Measured value used by step and target-tracking actions.
    ///
    /// Always taken from the first condition, even when later conditions were
    /// the ones that met.
    pub fn measured_value(&self) -> Option<f64> {
        self.conditions.first().and_then(|c| c.measured_value)
    }
}

/// Evaluate a single condition for a target at `now`
pub fn evaluate_condition(
    store: &MetricStore,
    target_id: &str,
    condition: &ScalingCondition,
    now: DateTime<Utc>,
) -> Result<ConditionResult> {
    condition.validate()?;

    let out_of_range = || {
        ControllerError::InvalidConfig(format!(
            "lookback of {} x {}s for {} is out of range at {}",
            condition.evaluation_periods, condition.period_secs, condition.metric, now
        ))
    };
    let period = span::seconds(condition.period_secs).ok_or_else(out_of_range)?;
    let lookback_secs = condition
        .period_secs
        .checked_mul(u64::from(condition.evaluation_periods))
        .ok_or_else(out_of_range)?;
    let lookback_start = span::before(now, lookback_secs).ok_or_else(out_of_range)?;

    let samples = store.values_between(target_id, &condition.metric, lookback_start, now);

    let mut windows = Vec::with_capacity(condition.evaluation_periods as usize);
    let mut start = lookback_start;
    for _ in 0..condition.evaluation_periods {
        // never past `now`, so within range once `lookback_start` is
        let end = start.checked_add_signed(period).ok_or_else(out_of_range)?;
        let values: Vec<f64> = samples
            .iter()
            .filter(|(ts, _)| *ts > start && *ts <= end)
            .map(|(_, v)| *v)
            .collect();

        let window = match condition.statistic.compute(&values, condition.percentile)? {
            Some(value) => WindowResult {
                start,
                end,
                samples: values.len(),
                value: Some(value),
                breaching: condition
                    .comparison_operator
                    .compare(value, condition.threshold),
            },
            None => {
                let (value, breaching) = match condition.missing_data_treatment {
                    MissingDataTreatment::Breaching => (None, true),
                    MissingDataTreatment::NotBreaching => (None, false),
                    MissingDataTreatment::Ignore | MissingDataTreatment::Missing => {
                        (Some(0.0), false)
                    }
                };
                WindowResult {
                    start,
                    end,
                    samples: 0,
                    value,
                    breaching,
                }
            }
        };
        windows.push(window);
        start = end;
    }

    let breaching_windows = windows.iter().filter(|w| w.breaching).count() as u32;
    let measured_value = windows
        .iter()
        .rev()
        .find(|w| w.samples > 0)
        .and_then(|w| w.value);

    Ok(ConditionResult {
        metric: condition.metric.clone(),
        met: breaching_windows >= condition.data_points_to_alarm,
        breaching_windows,
        weight: condition.weight,
        measured_value,
        windows,
        error: None,
    })
}

/// Evaluate every condition of a rule and apply the weighted-majority test.
///
/// A condition that cannot be evaluated counts as not met; it never stops
/// the remaining conditions from being evaluated.
pub fn evaluate_rule(store: &MetricStore, rule: &ScalingRule, now: DateTime<Utc>) -> RuleEvaluation {
    let conditions: Vec<ConditionResult> = rule
        .conditions
        .iter()
        .map(|condition| {
            evaluate_condition(store, &rule.target_id, condition, now).unwrap_or_else(|e| {
                warn!(
                    rule_id = %rule.id,
                    metric = %condition.metric,
                    error = %e,
                    "Condition evaluation failed, treating as not met"
                );
                ConditionResult::failed_closed(condition, e.to_string())
            })
        })
        .collect();

    let total_weight: f64 = conditions.iter().map(|c| c.weight).sum();
    let met_weight: f64 = conditions.iter().filter(|c| c.met).map(|c| c.weight).sum();
    let triggered = total_weight > 0.0 && met_weight / total_weight >= TRIGGER_WEIGHT_RATIO;

    debug!(
        rule_id = %rule.id,
        target_id = %rule.target_id,
        met_weight = met_weight,
        total_weight = total_weight,
        triggered = triggered,
        "Rule evaluated"
    );

    RuleEvaluation {
        rule_id: rule.id.clone(),
        triggered,
        met_weight,
        total_weight,
        conditions,
    }
}
