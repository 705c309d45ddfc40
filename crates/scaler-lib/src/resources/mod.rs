//! Resource registry and demand matching
//!
//! This module provides:
//! - Typed resources with capacity/allocation bookkeeping and pools
//! - Constraint and preference matching of resource requests
//! - Atomic multi-resource allocation with rollback
//! - Priority ordering of pending requests

mod attributes;
mod matcher;
mod queue;
mod registry;

pub use attributes::AttributeValue;
pub use matcher::{
    rank_candidates, Candidate, Constraint, ConstraintOperator, Preference, PreferenceRule,
};
pub use queue::{compare_pending, next_batch};
pub use registry::{MatchOutcome, ResourceRegistry};

use crate::error::{ControllerError, Result};
use crate::span;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Health of a resource. Only healthy and degraded resources accept allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Healthy,
    Degraded,
    Critical,
    Offline,
}

impl ResourceStatus {
    pub fn is_allocatable(&self) -> bool {
        matches!(self, ResourceStatus::Healthy | ResourceStatus::Degraded)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceStatus::Healthy => write!(f, "healthy"),
            ResourceStatus::Degraded => write!(f, "degraded"),
            ResourceStatus::Critical => write!(f, "critical"),
            ResourceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// A finite, typed resource tracked by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub capacity_total: f64,
    #[serde(default)]
    pub allocated: f64,
    #[serde(default)]
    pub available: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "default_status")]
    pub status: ResourceStatus,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

fn default_status() -> ResourceStatus {
    ResourceStatus::Healthy
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        capacity_total: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            capacity_total,
            allocated: 0.0,
            available: capacity_total,
            unit: unit.into(),
            attributes: BTreeMap::new(),
            tags: BTreeSet::new(),
            status: ResourceStatus::Healthy,
            last_updated: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    /// Start with part of the capacity already in use (e.g. by workloads the
    /// registry does not manage)
    pub fn with_allocated(mut self, allocated: f64) -> Self {
        self.allocated = allocated;
        self.available = self.capacity_total - allocated;
        self
    }

    /// Whether `allocated + available == capacity_total` with both non-negative
    pub fn is_consistent(&self) -> bool {
        self.allocated >= 0.0
            && self.available >= 0.0
            && (self.allocated + self.available - self.capacity_total).abs() < 1e-9
    }

    pub(crate) fn commit(&mut self, amount: f64, now: DateTime<Utc>) {
        self.allocated += amount;
        self.available = self.capacity_total - self.allocated;
        self.last_updated = now;
    }

    pub(crate) fn restore(&mut self, amount: f64, now: DateTime<Utc>) {
        self.allocated = (self.allocated - amount).max(0.0);
        self.available = self.capacity_total - self.allocated;
        self.last_updated = now;
    }
}

/// Urgency of a resource request. High and critical requests are matched
/// immediately instead of waiting for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Priority::High | Priority::Critical)
    }
}

/// One requested amount of one resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub amount: f64,
    #[serde(default)]
    pub unit: String,
    /// Allocation lifetime; expired allocations are released by the sweep
    #[serde(default)]
    pub duration_secs: Option<u64>,
    /// Whether a smaller grant in `[min, max]` is acceptable
    #[serde(default)]
    pub scalable: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Requirement {
    pub fn new(resource_type: impl Into<String>, amount: f64, unit: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            amount,
            unit: unit.into(),
            duration_secs: None,
            scalable: false,
            min: None,
            max: None,
        }
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn scalable(mut self, min: f64, max: f64) -> Self {
        self.scalable = true;
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Allocated,
    Rejected,
    Completed,
    Failed,
}

/// Demand for one or more resources, granted all-or-nothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub id: String,
    pub requester: String,
    pub requirements: Vec<Requirement>,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub preferences: Vec<Preference>,
    #[serde(default = "default_request_status")]
    pub status: RequestStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Why the request was rejected or failed
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_priority() -> Priority {
    Priority::Normal
}

fn default_request_status() -> RequestStatus {
    RequestStatus::Pending
}

impl ResourceRequest {
    pub fn new(
        id: impl Into<String>,
        requester: impl Into<String>,
        requirements: Vec<Requirement>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            requester: requester.into(),
            requirements,
            priority,
            deadline: None,
            constraints: Vec::new(),
            preferences: Vec::new(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            reason: None,
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_preference(mut self, preference: Preference) -> Self {
        self.preferences.push(preference);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Active,
    Expired,
    Released,
    Failed,
}

/// A grant of `amount` from one resource to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub request_id: String,
    pub resource_id: String,
    pub amount: f64,
    pub unit: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: AllocationStatus,
}

impl Allocation {
    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.end_time.map_or(false, |end| end <= now)
    }

    /// `None` for open-ended allocations; an error when the duration runs
    /// past the representable calendar
    pub(crate) fn end_time_for(
        start: DateTime<Utc>,
        duration_secs: Option<u64>,
    ) -> Result<Option<DateTime<Utc>>> {
        let Some(secs) = duration_secs else {
            return Ok(None);
        };
        span::after(start, secs).map(Some).ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "allocation of {}s starting {} ends out of range",
                secs, start
            ))
        })
    }
}

/// Named group of resources reported together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub id: String,
    pub name: String,
    pub resource_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate capacity of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSummary {
    pub pool_id: String,
    pub resources: usize,
    pub capacity_total: f64,
    pub allocated: f64,
    pub available: f64,
    /// `allocated / capacity_total`, 0 for an empty pool
    pub utilization: f64,
}
