//! Scaling rule configuration

use crate::error::{ControllerError, Result};
use crate::metrics::Statistic;
use crate::span::{self, MAX_SPAN_SECS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonOperator {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
}

impl ComparisonOperator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => value > threshold,
            ComparisonOperator::GreaterThanOrEqual => value >= threshold,
            ComparisonOperator::LessThan => value < threshold,
            ComparisonOperator::LessThanOrEqual => value <= threshold,
            ComparisonOperator::Equal => (value - threshold).abs() < f64::EPSILON,
            ComparisonOperator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// How a window without samples is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingDataTreatment {
    Missing,
    Ignore,
    Breaching,
    NotBreaching,
}

/// One weighted threshold check over a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingCondition {
    pub metric: String,
    pub statistic: Statistic,
    /// Required when `statistic` is `percentile`
    #[serde(default)]
    pub percentile: Option<f64>,
    pub threshold: f64,
    pub comparison_operator: ComparisonOperator,
    pub period_secs: u64,
    pub evaluation_periods: u32,
    pub data_points_to_alarm: u32,
    #[serde(default = "default_missing_data")]
    pub missing_data_treatment: MissingDataTreatment,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_missing_data() -> MissingDataTreatment {
    MissingDataTreatment::Missing
}

fn default_weight() -> f64 {
    1.0
}

/// Upper bound on windows per condition
pub const MAX_EVALUATION_PERIODS: u32 = 10_000;

impl ScalingCondition {
    pub fn new(
        metric: impl Into<String>,
        statistic: Statistic,
        comparison_operator: ComparisonOperator,
        threshold: f64,
    ) -> Self {
        Self {
            metric: metric.into(),
            statistic,
            percentile: None,
            threshold,
            comparison_operator,
            period_secs: 60,
            evaluation_periods: 1,
            data_points_to_alarm: 1,
            missing_data_treatment: MissingDataTreatment::Missing,
            weight: 1.0,
        }
    }

    pub fn periods(mut self, period_secs: u64, evaluation_periods: u32, data_points_to_alarm: u32) -> Self {
        self.period_secs = period_secs;
        self.evaluation_periods = evaluation_periods;
        self.data_points_to_alarm = data_points_to_alarm;
        self
    }

    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = Some(percentile);
        self
    }

    pub fn with_missing_data(mut self, treatment: MissingDataTreatment) -> Self {
        self.missing_data_treatment = treatment;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Window shape checks. The percentile itself is checked at evaluation
    /// time so a bad value only disables this condition.
    pub fn validate(&self) -> Result<()> {
        if self.period_secs == 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "condition on {} has a zero period",
                self.metric
            )));
        }
        if self.evaluation_periods > MAX_EVALUATION_PERIODS {
            return Err(ControllerError::InvalidConfig(format!(
                "condition on {} asks for {} evaluation periods, at most {} allowed",
                self.metric, self.evaluation_periods, MAX_EVALUATION_PERIODS
            )));
        }
        let lookback = self
            .period_secs
            .checked_mul(u64::from(self.evaluation_periods))
            .filter(|secs| *secs <= MAX_SPAN_SECS);
        if lookback.is_none() {
            return Err(ControllerError::InvalidConfig(format!(
                "condition on {} looks back {} x {}s, past the {}s limit",
                self.metric, self.evaluation_periods, self.period_secs, MAX_SPAN_SECS
            )));
        }
        if self.evaluation_periods == 0
            || self.data_points_to_alarm == 0
            || self.data_points_to_alarm > self.evaluation_periods
        {
            return Err(ControllerError::InvalidConfig(format!(
                "condition on {} needs 1 <= data_points_to_alarm ({}) <= evaluation_periods ({})",
                self.metric, self.data_points_to_alarm, self.evaluation_periods
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdjustmentType {
    /// Add `value` instances (may be negative)
    Absolute,
    /// Add `ceil(current * value / 100)` instances
    Percentage,
    /// Set exactly `value` instances
    Exact,
}

/// One band of a step-scaling function, `[lower_bound, upper_bound)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAdjustment {
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
    pub adjustment: i64,
}

impl StepAdjustment {
    pub fn contains(&self, value: f64) -> bool {
        self.lower_bound.map_or(true, |lo| value >= lo)
            && self.upper_bound.map_or(true, |hi| value < hi)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionKind {
    ChangeCapacity {
        adjustment_type: AdjustmentType,
        value: f64,
    },
    SetCapacity {
        capacity: u32,
    },
    StepScaling {
        steps: Vec<StepAdjustment>,
    },
    TargetTracking {
        target_value: f64,
    },
}

/// An action executed when its rule triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    /// Minimum time between two executions of this action
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
}

impl ScalingAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            cooldown_secs: None,
        }
    }

    pub fn change(adjustment_type: AdjustmentType, value: f64) -> Self {
        Self::new(ActionKind::ChangeCapacity {
            adjustment_type,
            value,
        })
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = Some(secs);
        self
    }
}

/// Weighted conditions plus the actions they trigger for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRule {
    pub id: String,
    pub target_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    pub conditions: Vec<ScalingCondition>,
    pub actions: Vec<ScalingAction>,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl ScalingRule {
    pub fn new(id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            enabled: true,
            priority: 0,
            conditions: Vec::new(),
            actions: Vec::new(),
            cooldown_secs: 0,
            last_triggered: None,
        }
    }

    pub fn with_condition(mut self, condition: ScalingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: ScalingAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered
            .map_or(false, |last| !span::has_elapsed(last, now, self.cooldown_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.conditions.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "rule {} has no conditions",
                self.id
            )));
        }
        for condition in &self.conditions {
            condition.validate()?;
        }
        let mut cooldowns = std::iter::once(self.cooldown_secs)
            .chain(self.actions.iter().filter_map(|a| a.cooldown_secs));
        if let Some(secs) = cooldowns.find(|secs| *secs > MAX_SPAN_SECS) {
            return Err(ControllerError::InvalidConfig(format!(
                "rule {} has cooldown {}s, past the {}s limit",
                self.id, secs, MAX_SPAN_SECS
            )));
        }
        if let Some(c) = self.conditions.iter().find(|c| c.weight < 0.0 || !c.weight.is_finite()) {
            return Err(ControllerError::InvalidConfig(format!(
                "rule {} has invalid weight {} on {}",
                self.id, c.weight, c.metric
            )));
        }
        Ok(())
    }
}
