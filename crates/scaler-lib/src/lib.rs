//! Capacity controller library
//!
//! This crate provides the core functionality for:
//! - Time-bounded metric storage and windowed statistics
//! - Resource registration, constraint matching and atomic allocation
//! - Rule, schedule and policy driven scaling of targets
//! - Trend forecasting for predictive scale-out
//! - Health checks and observability

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod forecast;
pub mod health;
pub mod metrics;
pub mod observability;
pub mod resources;
pub mod scaling;
pub mod span;

pub use config::{ControllerConfig, LoopIntervals};
pub use controller::{CapacityController, ControlLoop, ControllerStats, JobKind, QueueReport};
pub use error::{ControllerError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::{ControllerMetrics, StructuredLogger};
