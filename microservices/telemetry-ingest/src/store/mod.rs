//! Durable store seams
//!
//! The ingest core only sees these traits. `PgStore` talks to Postgres
//! through the shared pool, `MemoryStore` keeps everything in process for
//! ephemeral runs and tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use riverwatch_core::{DailyAggregate, DeviceId, DeviceRecord, RawMeasurement, UnitProfile};
use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Store operations used on the ingest path
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Previously saved baseline for a device, if any
    async fn get_baseline(&self, device_id: &DeviceId) -> Result<Option<f64>>;

    /// Create the device record if needed and set its baseline
    async fn upsert_baseline(&self, device_id: &DeviceId, baseline: f64) -> Result<()>;

    async fn insert_raw_measurement(&self, measurement: &RawMeasurement) -> Result<()>;

    async fn is_healthy(&self) -> bool;
}

/// Store operations used by the daily aggregation job and history reads
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn list_active_devices(&self) -> Result<Vec<DeviceRecord>>;

    /// Registered unit details, `None` for an unknown unit
    async fn find_unit(&self, device_id: &DeviceId) -> Result<Option<UnitProfile>>;

    async fn last_aggregated_date(&self, device_id: &DeviceId) -> Result<Option<NaiveDate>>;

    /// Summary of raw measurements recorded on `date` (UTC)
    async fn summarize_day(&self, device_id: &DeviceId, date: NaiveDate) -> Result<DaySummary>;

    /// Insert or replace the row for (device, date)
    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> Result<()>;

    /// Daily rows with `start <= date <= end`, oldest first
    async fn daily_aggregates(
        &self,
        device_id: &DeviceId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregate>>;

    /// The `limit` most recent daily rows, oldest first
    async fn latest_aggregates(&self, device_id: &DeviceId, limit: usize) -> Result<Vec<DailyAggregate>>;

    /// Up to `limit` of the newest raw measurements recorded at or after
    /// `since`, oldest first
    async fn recent_measurements(
        &self,
        device_id: &DeviceId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawMeasurement>>;
}

/// Name given to a unit first seen through its telemetry
pub(crate) fn default_unit_name(device_id: &DeviceId) -> String {
    format!("Unit {}", device_id)
}

/// Raw aggregate values for one device-day
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaySummary {
    pub count: u32,
    pub avg_height: f64,
    pub min_height: f64,
    pub max_height: f64,
    pub avg_temperature: f64,
    pub avg_battery: f64,
    pub avg_rssi: f64,
    pub avg_snr: f64,
}

impl DaySummary {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn into_aggregate(self, device_id: DeviceId, date: NaiveDate) -> DailyAggregate {
        DailyAggregate {
            device_id,
            date,
            avg_height: self.avg_height,
            min_height: self.min_height,
            max_height: self.max_height,
            avg_temperature: self.avg_temperature,
            avg_battery: self.avg_battery,
            avg_rssi: self.avg_rssi,
            avg_snr: self.avg_snr,
            sample_count: self.count,
        }
    }
}

/// Bound a store call; an elapsed deadline counts as a store failure
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::StoreTimeout(limit)),
    }
}
