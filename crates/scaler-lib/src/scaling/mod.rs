//! Rule-driven scaling of targets
//!
//! This module provides:
//! - Weighted multi-condition rules evaluated over sliding metric windows
//! - Capacity changes: step, percentage, exact and target-tracking actions
//! - Scheduled actions and demand/predictive scaling policies
//! - Cooldown-gated execution through an external effector

mod actions;
pub(crate) mod effector;
mod engine;
mod evaluator;
mod policy;
mod rules;
mod schedule;

pub use actions::clamp_instances;
pub use effector::ScalingEffector;
pub use engine::{EngineConfig, ScalingEngine};
pub use evaluator::{
    evaluate_condition, evaluate_rule, ConditionResult, RuleEvaluation, WindowResult,
    TRIGGER_WEIGHT_RATIO,
};
pub use policy::{PredictiveConfig, ScalingPolicy};
pub use rules::{
    ActionKind, AdjustmentType, ComparisonOperator, MissingDataTreatment, ScalingAction,
    ScalingCondition, ScalingRule, StepAdjustment,
};
pub use schedule::{Schedule, ScheduledAction};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Active,
    Paused,
    Error,
}

/// A logical unit whose instance count can be adjusted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingTarget {
    pub id: String,
    pub current_instances: u32,
    #[serde(default)]
    pub desired_instances: u32,
    pub min_instances: u32,
    pub max_instances: u32,
    #[serde(default = "default_target_status")]
    pub status: TargetStatus,
    #[serde(default)]
    pub last_scaled: Option<DateTime<Utc>>,
}

fn default_target_status() -> TargetStatus {
    TargetStatus::Active
}

impl ScalingTarget {
    pub fn new(id: impl Into<String>, current: u32, min: u32, max: u32) -> Self {
        Self {
            id: id.into(),
            current_instances: current,
            desired_instances: current,
            min_instances: min,
            max_instances: max,
            status: TargetStatus::Active,
            last_scaled: None,
        }
    }

    pub fn is_within_bounds(&self) -> bool {
        self.min_instances <= self.current_instances && self.current_instances <= self.max_instances
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingEventType {
    ScaleUp,
    ScaleDown,
    ScaleTo,
}

impl fmt::Display for ScalingEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingEventType::ScaleUp => write!(f, "scale-up"),
            ScalingEventType::ScaleDown => write!(f, "scale-down"),
            ScalingEventType::ScaleTo => write!(f, "scale-to"),
        }
    }
}

/// Immutable audit record of one scaling attempt.
///
/// For a failed attempt `new_instances` holds the requested count while the
/// target itself keeps `previous_instances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub timestamp: DateTime<Utc>,
    pub target_id: String,
    pub rule_id: String,
    #[serde(rename = "type")]
    pub event_type: ScalingEventType,
    pub previous_instances: u32,
    pub new_instances: u32,
    pub reason: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}
