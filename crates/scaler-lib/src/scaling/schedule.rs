//! Time-based scaling actions
//!
//! Recurrence is a plain predicate over `(last_run, now)`; there is no cron
//! expression parser.

use crate::span;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schedule {
    /// Runs once at or after `at`
    At { at: DateTime<Utc> },
    /// Runs at `starting`, then every `interval_secs`
    Every {
        interval_secs: u64,
        starting: DateTime<Utc>,
    },
}

impl Schedule {
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self {
            Schedule::At { at } => last_run.is_none() && now >= *at,
            Schedule::Every {
                interval_secs,
                starting,
            } => {
                if now < *starting || *interval_secs == 0 {
                    return false;
                }
                match last_run {
                    None => true,
                    Some(last) => span::has_elapsed(last, now, *interval_secs),
                }
            }
        }
    }
}

/// Sets a target's bounds and/or instance count on a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: String,
    pub target_id: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub min_instances: Option<u32>,
    #[serde(default)]
    pub max_instances: Option<u32>,
    #[serde(default)]
    pub desired_instances: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl ScheduledAction {
    pub fn new(id: impl Into<String>, target_id: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            schedule,
            min_instances: None,
            max_instances: None,
            desired_instances: None,
            enabled: true,
            last_run: None,
        }
    }

    pub fn with_desired(mut self, desired: u32) -> Self {
        self.desired_instances = Some(desired);
        self
    }

    pub fn with_bounds(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_instances = min;
        self.max_instances = max;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.schedule.is_due(self.last_run, now)
    }

    pub fn rule_id(&self) -> String {
        format!("scheduled-{}", self.id)
    }
}
