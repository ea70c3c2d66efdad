//! Riverwatch Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Standard service trait the Riverwatch services implement
//! - Sensor domain types (DeviceId, SensorReading, DailyAggregate, etc.)
//! - Error handling utilities
//! - Configuration management

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{Result, RiverwatchError};
pub use service::{
    DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus, RiverwatchService,
};
