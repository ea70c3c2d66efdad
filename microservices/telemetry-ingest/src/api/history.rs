//! Read-only history endpoints over persisted measurements and daily rows

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use riverwatch_core::{AlertLevels, DailyAggregate, DeviceId, UnitProfile};
use serde::{Deserialize, Serialize};

use super::rest::ApiResponse;
use super::AppState;
use crate::error::{Error, Result};
use crate::store::with_timeout;

const DEFAULT_DAYS: i64 = 30;
const MAX_DAYS: i64 = 3_660;
const DEFAULT_LATEST_LIMIT: usize = 7;
const MAX_LATEST_LIMIT: usize = 366;
const DEFAULT_HOURS: i64 = 24;
const DEFAULT_MEASUREMENT_LIMIT: usize = 100;
const MAX_MEASUREMENT_LIMIT: usize = 10_000;

#[derive(Debug, Default, Deserialize)]
pub struct AveragesQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestAveragesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MeasurementsQuery {
    pub hours: Option<i64>,
    pub limit: Option<usize>,
}

/// One charted day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub avg_height: f64,
    pub min_height: f64,
    pub max_height: f64,
    pub avg_temperature: f64,
    pub avg_battery: f64,
    pub avg_rssi: f64,
    pub avg_snr: f64,
    pub measurement_count: u32,
}

impl From<DailyAggregate> for DailyPoint {
    fn from(agg: DailyAggregate) -> Self {
        Self {
            date: agg.date,
            avg_height: agg.avg_height,
            min_height: agg.min_height,
            max_height: agg.max_height,
            avg_temperature: agg.avg_temperature,
            avg_battery: agg.avg_battery,
            avg_rssi: agg.avg_rssi,
            avg_snr: agg.avg_snr,
            measurement_count: agg.sample_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct AveragesResponse {
    pub unit_id: DeviceId,
    pub unit_name: String,
    pub location: Option<String>,
    pub date_range: DateRange,
    pub alert_levels: AlertLevels,
    pub data_points: usize,
    pub data: Vec<DailyPoint>,
}

#[derive(Debug, Serialize)]
pub struct LatestAveragesResponse {
    pub unit_id: DeviceId,
    pub unit_name: String,
    pub location: Option<String>,
    pub alert_levels: AlertLevels,
    pub records_count: usize,
    pub data: Vec<DailyPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementPoint {
    pub timestamp: DateTime<Utc>,
    pub height: f64,
}

#[derive(Debug, Serialize)]
pub struct MeasurementsResponse {
    pub unit_id: DeviceId,
    pub unit_name: String,
    pub location: Option<String>,
    pub data_points: usize,
    pub measurements: Vec<MeasurementPoint>,
}

/// Date window for an averages query
///
/// An explicit range needs both dates; otherwise the window ends today and
/// reaches back `days` (default 30).
pub fn date_window(query: &AveragesQuery, today: NaiveDate) -> Result<DateRange> {
    if let (Some(start), Some(end)) = (&query.start_date, &query.end_date) {
        let start = parse_date(start)?;
        let end = parse_date(end)?;
        if start > end {
            return Err(Error::InvalidRequest(
                "start_date must not be after end_date".to_string(),
            ));
        }
        return Ok(DateRange { start, end });
    }

    let days = query.days.unwrap_or(DEFAULT_DAYS);
    if !(0..=MAX_DAYS).contains(&days) {
        return Err(Error::InvalidRequest(format!(
            "days must be between 0 and {}",
            MAX_DAYS
        )));
    }
    Ok(DateRange {
        start: today - ChronoDuration::days(days),
        end: today,
    })
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| Error::InvalidRequest("Invalid date format. Use YYYY-MM-DD".to_string()))
}

fn bounded(value: usize, max: usize, name: &str) -> Result<usize> {
    if value == 0 || value > max {
        return Err(Error::InvalidRequest(format!(
            "{} must be between 1 and {}",
            name, max
        )));
    }
    Ok(value)
}

async fn known_unit(state: &AppState, device_id: &DeviceId) -> Result<UnitProfile> {
    with_timeout(state.store_timeout, state.aggregates.find_unit(device_id))
        .await?
        .ok_or_else(|| Error::NotFound(device_id.to_string()))
}

/// Daily averages of a unit over a date window, for charting
pub async fn unit_averages(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
    Query(query): Query<AveragesQuery>,
) -> Result<Json<ApiResponse<AveragesResponse>>> {
    let device_id = DeviceId::new(unit_id);
    let unit = known_unit(&state, &device_id).await?;
    let range = date_window(&query, Utc::now().date_naive())?;

    let rows = with_timeout(
        state.store_timeout,
        state
            .aggregates
            .daily_aggregates(&device_id, range.start, range.end),
    )
    .await?;
    let data: Vec<DailyPoint> = rows.into_iter().map(DailyPoint::from).collect();

    Ok(ApiResponse::success(AveragesResponse {
        unit_id: device_id,
        unit_name: unit.name,
        location: unit.location,
        date_range: range,
        alert_levels: unit.alert_levels,
        data_points: data.len(),
        data,
    }))
}

/// The most recent daily averages of a unit, oldest first
pub async fn latest_unit_averages(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
    Query(query): Query<LatestAveragesQuery>,
) -> Result<Json<ApiResponse<LatestAveragesResponse>>> {
    let limit = bounded(
        query.limit.unwrap_or(DEFAULT_LATEST_LIMIT),
        MAX_LATEST_LIMIT,
        "limit",
    )?;
    let device_id = DeviceId::new(unit_id);
    let unit = known_unit(&state, &device_id).await?;

    let rows = with_timeout(
        state.store_timeout,
        state.aggregates.latest_aggregates(&device_id, limit),
    )
    .await?;
    let data: Vec<DailyPoint> = rows.into_iter().map(DailyPoint::from).collect();

    Ok(ApiResponse::success(LatestAveragesResponse {
        unit_id: device_id,
        unit_name: unit.name,
        location: unit.location,
        alert_levels: unit.alert_levels,
        records_count: data.len(),
        data,
    }))
}

/// Raw heights persisted for a unit over the last `hours`, oldest first
pub async fn unit_measurements(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
    Query(query): Query<MeasurementsQuery>,
) -> Result<Json<ApiResponse<MeasurementsResponse>>> {
    let hours = query.hours.unwrap_or(DEFAULT_HOURS);
    if !(1..=MAX_DAYS * 24).contains(&hours) {
        return Err(Error::InvalidRequest(format!(
            "hours must be between 1 and {}",
            MAX_DAYS * 24
        )));
    }
    let limit = bounded(
        query.limit.unwrap_or(DEFAULT_MEASUREMENT_LIMIT),
        MAX_MEASUREMENT_LIMIT,
        "limit",
    )?;
    let device_id = DeviceId::new(unit_id);
    let unit = known_unit(&state, &device_id).await?;

    let since = Utc::now() - ChronoDuration::hours(hours);
    let rows = with_timeout(
        state.store_timeout,
        state.aggregates.recent_measurements(&device_id, since, limit),
    )
    .await?;
    let measurements: Vec<MeasurementPoint> = rows
        .into_iter()
        .map(|m| MeasurementPoint {
            timestamp: m.recorded_at,
            height: m.height,
        })
        .collect();

    Ok(ApiResponse::success(MeasurementsResponse {
        unit_id: device_id,
        unit_name: unit.name,
        location: unit.location,
        data_points: measurements.len(),
        measurements,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::config::MqttConfig;
    use crate::fanout::SubscriptionHub;
    use crate::ingest::{IngestPipeline, MeasurementWriter};
    use crate::store::{AggregateStore, MemoryStore, PersistentStore};
    use crate::transport::MqttTransport;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use riverwatch_core::RawMeasurement;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn state_with(store: Arc<MemoryStore>) -> AppState {
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

    fn day_row(id: &str, date: NaiveDate, avg: f64) -> DailyAggregate {
        DailyAggregate {
            avg_height: avg,
            sample_count: 4,
            ..DailyAggregate::zeroed(id.into(), date)
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_explicit_window() {
        let query = AveragesQuery {
            start_date: Some("2024-05-01".to_string()),
            end_date: Some("2024-05-07".to_string()),
            days: Some(2),
        };
        let range = date_window(&query, date(2024, 6, 1)).unwrap();
        assert_eq!(range.start, date(2024, 5, 1));
        assert_eq!(range.end, date(2024, 5, 7));
    }

    #[test]
    fn test_window_defaults_to_thirty_days() {
        let today = date(2024, 6, 30);
        let range = date_window(&AveragesQuery::default(), today).unwrap();
        assert_eq!(range.start, date(2024, 5, 31));
        assert_eq!(range.end, today);

        // A lone start date falls back to `days`
        let query = AveragesQuery {
            start_date: Some("2024-01-01".to_string()),
            days: Some(7),
            ..AveragesQuery::default()
        };
        assert_eq!(date_window(&query, today).unwrap().start, date(2024, 6, 23));
    }

    #[test]
    fn test_bad_windows_rejected() {
        let today = date(2024, 6, 30);
        let cases = [
            AveragesQuery {
                start_date: Some("2024/05/01".to_string()),
                end_date: Some("2024-05-07".to_string()),
                days: None,
            },
            AveragesQuery {
                start_date: Some("2024-05-09".to_string()),
                end_date: Some("2024-05-07".to_string()),
                days: None,
            },
            AveragesQuery {
                days: Some(-1),
                ..AveragesQuery::default()
            },
            AveragesQuery {
                days: Some(i64::MAX),
                ..AveragesQuery::default()
            },
        ];
        for query in cases {
            let err = date_window(&query, today).unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(_)), "{:?}", query);
        }
    }

    #[tokio::test]
    async fn test_averages_for_unknown_unit_is_404() {
        let state = state_with(Arc::new(MemoryStore::new()));
        let err = unit_averages(
            State(state),
            Path("ghost".to_string()),
            Query(AveragesQuery::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_averages_bad_date_is_400() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_baseline(&"U1".into(), 10.0).await.unwrap();
        let query = AveragesQuery {
            start_date: Some("yesterday".to_string()),
            end_date: Some("2024-05-07".to_string()),
            days: None,
        };
        let err = unit_averages(State(state_with(store)), Path("U1".to_string()), Query(query))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_averages_in_window() {
        let store = Arc::new(MemoryStore::new());
        let id = DeviceId::new("U1");
        store.upsert_baseline(&id, 10.0).await.unwrap();
        for day in 1..=9 {
            store
                .upsert_daily_aggregate(&day_row("U1", date(2024, 5, day), day as f64))
                .await
                .unwrap();
        }

        let query = AveragesQuery {
            start_date: Some("2024-05-03".to_string()),
            end_date: Some("2024-05-05".to_string()),
            days: None,
        };
        let Json(body) = unit_averages(State(state_with(store)), Path("U1".to_string()), Query(query))
            .await
            .unwrap();
        let view = body.data.unwrap();

        assert_eq!(view.unit_name, "Unit U1");
        assert_eq!(view.alert_levels.normal, Some(10.0));
        assert_eq!(view.data_points, 3);
        assert_eq!(view.data[0].date, date(2024, 5, 3));
        assert_eq!(view.data[2].avg_height, 5.0);
        assert_eq!(view.data[2].measurement_count, 4);
    }

    #[tokio::test]
    async fn test_latest_averages_oldest_first() {
        let store = Arc::new(MemoryStore::new());
        store.register_device("U2".into(), Utc::now());
        for day in 1..=12 {
            store
                .upsert_daily_aggregate(&day_row("U2", date(2024, 7, day), day as f64))
                .await
                .unwrap();
        }

        let Json(body) = latest_unit_averages(
            State(state_with(store)),
            Path("U2".to_string()),
            Query(LatestAveragesQuery::default()),
        )
        .await
        .unwrap();
        let view = body.data.unwrap();

        assert_eq!(view.records_count, 7);
        assert_eq!(view.data.first().unwrap().date, date(2024, 7, 6));
        assert_eq!(view.data.last().unwrap().date, date(2024, 7, 12));
    }

    #[tokio::test]
    async fn test_latest_averages_zero_limit_is_400() {
        let store = Arc::new(MemoryStore::new());
        store.register_device("U2".into(), Utc::now());
        let err = latest_unit_averages(
            State(state_with(store)),
            Path("U2".to_string()),
            Query(LatestAveragesQuery { limit: Some(0) }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_measurements_within_hours() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for (hours_ago, height) in [(30, 1.0), (5, 2.0), (1, 3.0)] {
            store
                .insert_raw_measurement(&RawMeasurement {
                    device_id: "U3".into(),
                    height,
                    temperature: 20.0,
                    battery: 4.0,
                    rssi: -90.0,
                    snr: 8.0,
                    recorded_at: now - ChronoDuration::hours(hours_ago),
                })
                .await
                .unwrap();
        }

        let Json(body) = unit_measurements(
            State(state_with(store)),
            Path("U3".to_string()),
            Query(MeasurementsQuery::default()),
        )
        .await
        .unwrap();
        let view = body.data.unwrap();

        assert_eq!(view.data_points, 2);
        let heights: Vec<f64> = view.measurements.iter().map(|m| m.height).collect();
        assert_eq!(heights, vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_measurements_store_failure_is_503() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_reads(true);
        let err = unit_measurements(
            State(state_with(store)),
            Path("U3".to_string()),
            Query(MeasurementsQuery::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
