//! Error types for the capacity controller

use thiserror::Error;

/// Errors returned by configuration and bookkeeping operations.
///
/// Allocation rejections and failed scaling calls are not errors: they are
/// reported through request status and `ScalingEvent` records instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("resource already registered: {0}")]
    DuplicateResource(String),

    #[error("resource {0} has active allocations")]
    ResourceInUse(String),

    #[error("resource pool not found: {0}")]
    PoolNotFound(String),

    #[error("resource request not found: {0}")]
    RequestNotFound(String),

    #[error("scaling target not found: {0}")]
    TargetNotFound(String),

    #[error("scaling rule not found: {0}")]
    RuleNotFound(String),

    #[error("scaling policy not found: {0}")]
    PolicyNotFound(String),

    #[error("scheduled action not found: {0}")]
    ScheduledActionNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("capacity {requested} for {resource_id} is below allocated amount {allocated}")]
    CapacityBelowAllocated {
        resource_id: String,
        requested: f64,
        allocated: f64,
    },
}

pub type Result<T> = std::result::Result<T, ControllerError>;
