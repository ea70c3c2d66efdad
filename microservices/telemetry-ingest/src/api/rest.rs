//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use riverwatch_core::{DeviceId, HealthStatus, LatestReading, ReadinessStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::AppState;
use crate::cache::{BaselineEntry, CacheStats, DerivationProgress};
use crate::error::{Error, Result};
use crate::ingest::{PipelineStats, MAX_SAVE_INTERVAL_SECS};

/// Generic API response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

// Health check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.health())
}

pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessStatus>) {
    let readiness = state.readiness().await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

// Cache handlers
pub async fn cache_stats(State(state): State<AppState>) -> Json<ApiResponse<CacheStats>> {
    ApiResponse::success(state.pipeline.cache().stats())
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub unit_id: Option<DeviceId>,
}

pub async fn clear_all_cache(State(state): State<AppState>) -> Json<ApiResponse<ClearResponse>> {
    state.pipeline.cache().clear(None).await;
    ApiResponse::success(ClearResponse {
        message: "Cache cleared for all units".to_string(),
        unit_id: None,
    })
}

pub async fn clear_unit_cache(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
) -> Json<ApiResponse<ClearResponse>> {
    let unit_id = DeviceId::new(unit_id);
    state.pipeline.cache().clear(Some(&unit_id)).await;
    ApiResponse::success(ClearResponse {
        message: format!("Cache cleared for unit {}", unit_id),
        unit_id: Some(unit_id),
    })
}

#[derive(Debug, Serialize)]
pub struct BaselineResponse {
    pub unit_id: DeviceId,
    pub baseline: Option<BaselineEntry>,
    pub derivation: Option<DerivationProgress>,
}

/// Re-read a unit's baseline from the store, replacing the cached one
pub async fn refresh_unit_baseline(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
) -> Result<Json<ApiResponse<BaselineResponse>>> {
    let unit_id = DeviceId::new(unit_id);
    let cache = state.pipeline.cache();
    let stored = cache.refresh(&unit_id).await?;
    info!(unit_id = %unit_id, baseline = ?stored, "Baseline refresh requested");

    Ok(ApiResponse::success(BaselineResponse {
        baseline: cache.get_baseline(&unit_id),
        derivation: cache.resolver().progress(&unit_id),
        unit_id,
    }))
}

// Unit handlers
pub async fn all_latest_readings(
    State(state): State<AppState>,
) -> Json<ApiResponse<BTreeMap<DeviceId, LatestReading>>> {
    let readings = state
        .pipeline
        .cache()
        .get_all_latest_readings()
        .into_iter()
        .collect();
    ApiResponse::success(readings)
}

pub async fn unit_latest_reading(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
) -> Result<Json<ApiResponse<LatestReading>>> {
    let reading = state
        .pipeline
        .cache()
        .get_latest_reading(&DeviceId::new(unit_id.clone()))
        .ok_or(Error::NotFound(unit_id))?;
    Ok(ApiResponse::success(reading))
}

pub async fn unit_baseline(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
) -> Result<Json<ApiResponse<BaselineResponse>>> {
    let id = DeviceId::new(unit_id.clone());
    let cache = state.pipeline.cache();
    let baseline = cache.get_baseline(&id);
    let derivation = cache.resolver().progress(&id);

    if baseline.is_none() && derivation.is_none() {
        return Err(Error::NotFound(unit_id));
    }
    Ok(ApiResponse::success(BaselineResponse {
        unit_id: id,
        baseline,
        derivation,
    }))
}

// Ingest handlers
pub async fn ingest_stats(State(state): State<AppState>) -> Json<ApiResponse<PipelineStats>> {
    ApiResponse::success(state.pipeline.stats())
}

#[derive(Debug, Deserialize)]
pub struct SaveIntervalRequest {
    pub seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct SaveIntervalResponse {
    pub save_interval_secs: u64,
}

pub async fn set_save_interval(
    State(state): State<AppState>,
    Json(req): Json<SaveIntervalRequest>,
) -> Result<Json<ApiResponse<SaveIntervalResponse>>> {
    if req.seconds == 0 || req.seconds > MAX_SAVE_INTERVAL_SECS {
        return Err(Error::InvalidRequest(format!(
            "seconds must be between 1 and {}",
            MAX_SAVE_INTERVAL_SECS
        )));
    }
    state.pipeline.set_save_interval(req.seconds);
    info!(seconds = req.seconds, "Save interval updated");
    Ok(ApiResponse::success(SaveIntervalResponse {
        save_interval_secs: req.seconds,
    }))
}

#[derive(Debug, Serialize)]
pub struct MqttStatus {
    pub is_connected: bool,
    pub is_alive: bool,
    pub websocket_connections: BTreeMap<&'static str, usize>,
    pub cache_stats: CacheStats,
}

pub async fn mqtt_status(State(state): State<AppState>) -> Json<ApiResponse<MqttStatus>> {
    ApiResponse::success(MqttStatus {
        is_connected: state.transport.is_connected(),
        is_alive: state.transport.is_alive(),
        websocket_connections: state.hub.connection_stats(),
        cache_stats: state.pipeline.cache().stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::config::MqttConfig;
    use crate::fanout::SubscriptionHub;
    use crate::ingest::{IngestPipeline, MeasurementWriter};
    use crate::store::MemoryStore;
    use crate::transport::MqttTransport;
    use axum::response::IntoResponse;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(SubscriptionHub::new(8, Duration::from_millis(100)));
        let cache = Arc::new(CacheManager::new(store.clone(), 2, Duration::from_millis(500)));
        let writer = MeasurementWriter::spawn(store.clone(), 16, 2, Duration::from_millis(500));
        let pipeline = Arc::new(IngestPipeline::new(cache, writer, hub.clone(), 30, 35.0));
        AppState {
            pipeline,
            hub,
            transport: Arc::new(MqttTransport::new(MqttConfig::default())),
            store: store.clone(),
            aggregates: store,
            store_timeout: Duration::from_millis(500),
            broadcast_timeout: Duration::from_millis(100),
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_unknown_unit_is_404() {
        let err = unit_latest_reading(State(state()), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_zero_save_interval_rejected() {
        let err = set_save_interval(State(state()), Json(SaveIntervalRequest { seconds: 0 }))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_save_interval_rejected() {
        let state = state();
        let err = set_save_interval(
            State(state.clone()),
            Json(SaveIntervalRequest { seconds: u64::MAX }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.pipeline.save_interval_secs(), 30);
    }

    #[tokio::test]
    async fn test_save_interval_applies_to_pipeline() {
        let state = state();
        set_save_interval(State(state.clone()), Json(SaveIntervalRequest { seconds: 5 }))
            .await
            .unwrap();
        assert_eq!(state.pipeline.save_interval_secs(), 5);
    }

    #[tokio::test]
    async fn test_mqtt_status_shape() {
        let state = state();
        let _viewer = state.hub.subscribe(crate::fanout::TopicClass::Distance);
        let Json(body) = mqtt_status(State(state)).await;
        let status = body.data.unwrap();

        assert!(!status.is_connected);
        assert!(!status.is_alive);
        assert_eq!(status.websocket_connections["distance"], 1);
        assert_eq!(status.cache_stats.total_cached_devices, 0);
    }

    #[tokio::test]
    async fn test_baseline_visible_while_deriving() {
        let state = state();
        state
            .pipeline
            .handle(br#"{"i":"U1","d":10,"t":20,"b":4,"rssi":-90,"snr":7}"#)
            .await
            .unwrap();

        let Json(body) = unit_baseline(State(state.clone()), Path("U1".to_string()))
            .await
            .unwrap();
        let view = body.data.unwrap();
        assert_eq!(view.derivation.unwrap().remaining, 1);
        assert!(!view.baseline.unwrap().is_resolved);

        let Json(latest) = unit_latest_reading(State(state), Path("U1".to_string()))
            .await
            .unwrap();
        assert_eq!(latest.data.unwrap().height, 10.0);
    }

    #[tokio::test]
    async fn test_readiness_reports_dependencies() {
        let readiness = state().readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.dependencies.len(), 2);
        assert!(readiness.dependencies[0].available);
    }
}
