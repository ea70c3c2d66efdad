//! HTTP and WebSocket API

pub mod history;
pub mod rest;
pub mod websocket;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use riverwatch_core::{DependencyStatus, HealthStatus, ReadinessStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::fanout::SubscriptionHub;
use crate::ingest::IngestPipeline;
use crate::store::{AggregateStore, PersistentStore};
use crate::transport::MessageTransport;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub hub: Arc<SubscriptionHub>,
    pub transport: Arc<dyn MessageTransport>,
    pub store: Arc<dyn PersistentStore>,
    pub aggregates: Arc<dyn AggregateStore>,
    pub store_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: crate::SERVICE_ID.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Ready when the store answers and the broker connection is up
    pub async fn readiness(&self) -> ReadinessStatus {
        let started = Instant::now();
        let store_ok = self.store.is_healthy().await;
        let store_latency = started.elapsed().as_millis() as u64;

        let dependencies = vec![
            DependencyStatus {
                name: "store".to_string(),
                available: store_ok,
                latency_ms: Some(store_latency),
            },
            DependencyStatus {
                name: "mqtt".to_string(),
                available: self.transport.is_connected(),
                latency_ms: None,
            },
        ];

        ReadinessStatus {
            ready: dependencies.iter().all(|d| d.available),
            dependencies,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::ready_check))
        // Cache endpoints
        .route("/api/cache/stats", get(rest::cache_stats))
        .route("/api/cache/clear", delete(rest::clear_all_cache))
        .route("/api/cache/clear/{unit_id}", delete(rest::clear_unit_cache))
        .route("/api/cache/refresh/{unit_id}", post(rest::refresh_unit_baseline))
        // Unit endpoints
        .route("/api/units/latest", get(rest::all_latest_readings))
        .route("/api/units/{unit_id}/latest", get(rest::unit_latest_reading))
        .route("/api/units/{unit_id}/baseline", get(rest::unit_baseline))
        // Ingest endpoints
        .route("/api/ingest/stats", get(rest::ingest_stats))
        .route("/api/ingest/save-interval", put(rest::set_save_interval))
        .route("/api/mqtt/status", get(rest::mqtt_status))
        // History endpoints
        .route("/api/averages/{unit_id}", get(history::unit_averages))
        .route("/api/averages/{unit_id}/latest", get(history::latest_unit_averages))
        .route("/api/sensors/measurements/{unit_id}", get(history::unit_measurements))
        // WebSocket
        .route("/ws", get(websocket::ws_all_handler))
        .route("/ws/{subscription}", get(websocket::ws_handler))
        .with_state(state)
}
