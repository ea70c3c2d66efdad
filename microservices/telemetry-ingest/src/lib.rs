//! Riverwatch Telemetry Ingest
//!
//! Receives water-level readings over MQTT, derives a per-unit baseline
//! ("normal level") from the first readings of each unit, pushes every
//! reading to live WebSocket viewers and persists raw measurements at a
//! throttled rate. A daily job rolls persisted measurements up into
//! per-unit daily averages.

pub mod aggregation;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fanout;
pub mod ingest;
pub mod service;
pub mod store;
pub mod transport;

pub use config::{IngestConfig, MqttConfig};
pub use error::{Error, Result};
pub use service::IngestService;

/// Identifier reported in health checks and logs
pub const SERVICE_ID: &str = "telemetry-ingest";
