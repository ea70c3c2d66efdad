//! Postgres-backed store

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use riverwatch_core::{
    AlertLevels, DailyAggregate, DeviceId, DeviceRecord, RawMeasurement, UnitProfile,
};
use riverwatch_db::DbPool;
use tokio_postgres::Row;
use tracing::{debug, instrument};

use super::{default_unit_name, AggregateStore, DaySummary, PersistentStore};
use crate::error::Result;

const UPSERT_BASELINE: &str = "
    INSERT INTO units (unit_id, name, normal_level, is_active, created_at, updated_at)
    VALUES ($1, $2, $3, TRUE, NOW(), NOW())
    ON CONFLICT (unit_id)
    DO UPDATE SET normal_level = EXCLUDED.normal_level, updated_at = NOW()";

const ENSURE_UNIT: &str = "
    INSERT INTO units (unit_id, name, is_active, created_at, updated_at)
    VALUES ($1, $2, TRUE, NOW(), NOW())
    ON CONFLICT (unit_id) DO NOTHING";

const INSERT_MEASUREMENT: &str = "
    INSERT INTO sensor_measurements (unit_id, height, temperature, battery, rssi, snr, recorded_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)";

const SUMMARIZE_DAY: &str = "
    SELECT COUNT(*) AS n,
           COALESCE(AVG(height), 0) AS avg_height,
           COALESCE(MIN(height), 0) AS min_height,
           COALESCE(MAX(height), 0) AS max_height,
           COALESCE(AVG(temperature), 0) AS avg_temperature,
           COALESCE(AVG(battery), 0) AS avg_battery,
           COALESCE(AVG(rssi), 0) AS avg_rssi,
           COALESCE(AVG(snr), 0) AS avg_snr
    FROM sensor_measurements
    WHERE unit_id = $1 AND recorded_at >= $2 AND recorded_at < $3";

const UPSERT_DAILY: &str = "
    INSERT INTO daily_averages
        (unit_id, date, avg_height, min_height, max_height, avg_temperature,
         avg_battery, avg_rssi, avg_snr, measurement_count)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (unit_id, date) DO UPDATE SET
        avg_height = EXCLUDED.avg_height,
        min_height = EXCLUDED.min_height,
        max_height = EXCLUDED.max_height,
        avg_temperature = EXCLUDED.avg_temperature,
        avg_battery = EXCLUDED.avg_battery,
        avg_rssi = EXCLUDED.avg_rssi,
        avg_snr = EXCLUDED.avg_snr,
        measurement_count = EXCLUDED.measurement_count";

const FIND_UNIT: &str = "
    SELECT unit_id, name, location, normal_level, warning_level, high_level, critical_level
    FROM units
    WHERE unit_id = $1";

const DAILY_COLUMNS: &str = "unit_id, date, avg_height, min_height, max_height, avg_temperature, \
    avg_battery, avg_rssi, avg_snr, measurement_count";

const MEASUREMENT_COLUMNS: &str = "unit_id, height, temperature, battery, rssi, snr, recorded_at";

/// Store over the `units`, `sensor_measurements` and `daily_averages` tables
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + ChronoDuration::days(1))
}

fn aggregate_from_row(row: &Row) -> Result<DailyAggregate> {
    let count: i32 = row.try_get("measurement_count")?;
    Ok(DailyAggregate {
        device_id: DeviceId::new(row.try_get::<_, String>("unit_id")?),
        date: row.try_get("date")?,
        avg_height: row.try_get("avg_height")?,
        min_height: row.try_get("min_height")?,
        max_height: row.try_get("max_height")?,
        avg_temperature: row.try_get("avg_temperature")?,
        avg_battery: row.try_get("avg_battery")?,
        avg_rssi: row.try_get("avg_rssi")?,
        avg_snr: row.try_get("avg_snr")?,
        sample_count: count.max(0) as u32,
    })
}

fn measurement_from_row(row: &Row) -> Result<RawMeasurement> {
    Ok(RawMeasurement {
        device_id: DeviceId::new(row.try_get::<_, String>("unit_id")?),
        height: row.try_get("height")?,
        temperature: row.try_get("temperature")?,
        battery: row.try_get("battery")?,
        rssi: row.try_get("rssi")?,
        snr: row.try_get("snr")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl PersistentStore for PgStore {
    #[instrument(skip(self), fields(unit_id = %device_id))]
    async fn get_baseline(&self, device_id: &DeviceId) -> Result<Option<f64>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT normal_level FROM units WHERE unit_id = $1",
                &[&device_id.as_str()],
            )
            .await?;

        Ok(match row {
            Some(row) => row.try_get::<_, Option<f64>>("normal_level")?,
            None => None,
        })
    }

    #[instrument(skip(self), fields(unit_id = %device_id))]
    async fn upsert_baseline(&self, device_id: &DeviceId, baseline: f64) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                UPSERT_BASELINE,
                &[&device_id.as_str(), &default_unit_name(device_id), &baseline],
            )
            .await?;
        debug!(baseline, "Baseline persisted");
        Ok(())
    }

    #[instrument(skip(self, measurement), fields(unit_id = %measurement.device_id))]
    async fn insert_raw_measurement(&self, measurement: &RawMeasurement) -> Result<()> {
        let client = self.pool.get().await?;
        let unit_id = measurement.device_id.as_str();
        client
            .execute(
                ENSURE_UNIT,
                &[&unit_id, &default_unit_name(&measurement.device_id)],
            )
            .await?;
        client
            .execute(
                INSERT_MEASUREMENT,
                &[
                    &unit_id,
                    &measurement.height,
                    &measurement.temperature,
                    &measurement.battery,
                    &measurement.rssi,
                    &measurement.snr,
                    &measurement.recorded_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.pool.is_healthy().await
    }
}

#[async_trait]
impl AggregateStore for PgStore {
    #[instrument(skip(self))]
    async fn list_active_devices(&self) -> Result<Vec<DeviceRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT unit_id, created_at FROM units WHERE is_active = TRUE ORDER BY unit_id",
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<DeviceRecord> {
                Ok(DeviceRecord {
                    device_id: DeviceId::new(row.try_get::<_, String>("unit_id")?),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(unit_id = %device_id))]
    async fn find_unit(&self, device_id: &DeviceId) -> Result<Option<UnitProfile>> {
        let client = self.pool.get().await?;
        let row = client.query_opt(FIND_UNIT, &[&device_id.as_str()]).await?;

        row.map(|row| -> Result<UnitProfile> {
            Ok(UnitProfile {
                device_id: device_id.clone(),
                name: row.try_get("name")?,
                location: row.try_get("location")?,
                alert_levels: AlertLevels {
                    normal: row.try_get("normal_level")?,
                    warning: row.try_get("warning_level")?,
                    high: row.try_get("high_level")?,
                    critical: row.try_get("critical_level")?,
                },
            })
        })
        .transpose()
    }

    #[instrument(skip(self), fields(unit_id = %device_id))]
    async fn last_aggregated_date(&self, device_id: &DeviceId) -> Result<Option<NaiveDate>> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT MAX(date) AS last_date FROM daily_averages WHERE unit_id = $1",
                &[&device_id.as_str()],
            )
            .await?;
        Ok(row.try_get("last_date")?)
    }

    #[instrument(skip(self), fields(unit_id = %device_id))]
    async fn summarize_day(&self, device_id: &DeviceId, date: NaiveDate) -> Result<DaySummary> {
        let (start, end) = day_bounds(date);
        let client = self.pool.get().await?;
        let row = client
            .query_one(SUMMARIZE_DAY, &[&device_id.as_str(), &start, &end])
            .await?;

        let count: i64 = row.try_get("n")?;
        Ok(DaySummary {
            count: count.max(0) as u32,
            avg_height: row.try_get("avg_height")?,
            min_height: row.try_get("min_height")?,
            max_height: row.try_get("max_height")?,
            avg_temperature: row.try_get("avg_temperature")?,
            avg_battery: row.try_get("avg_battery")?,
            avg_rssi: row.try_get("avg_rssi")?,
            avg_snr: row.try_get("avg_snr")?,
        })
    }

    #[instrument(skip(self, aggregate), fields(unit_id = %aggregate.device_id, date = %aggregate.date))]
    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> Result<()> {
        let client = self.pool.get().await?;
        let count = aggregate.sample_count as i32;
        client
            .execute(
                UPSERT_DAILY,
                &[
                    &aggregate.device_id.as_str(),
                    &aggregate.date,
                    &aggregate.avg_height,
                    &aggregate.min_height,
                    &aggregate.max_height,
                    &aggregate.avg_temperature,
                    &aggregate.avg_battery,
                    &aggregate.avg_rssi,
                    &aggregate.avg_snr,
                    &count,
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(unit_id = %device_id))]
    async fn daily_aggregates(
        &self,
        device_id: &DeviceId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregate>> {
        let sql = format!(
            "SELECT {} FROM daily_averages WHERE unit_id = $1 AND date >= $2 AND date <= $3 ORDER BY date",
            DAILY_COLUMNS
        );
        let client = self.pool.get().await?;
        let rows = client
            .query(sql.as_str(), &[&device_id.as_str(), &start, &end])
            .await?;
        rows.iter().map(aggregate_from_row).collect()
    }

    #[instrument(skip(self), fields(unit_id = %device_id))]
    async fn latest_aggregates(&self, device_id: &DeviceId, limit: usize) -> Result<Vec<DailyAggregate>> {
        let sql = format!(
            "SELECT * FROM (SELECT {} FROM daily_averages WHERE unit_id = $1 ORDER BY date DESC LIMIT $2) recent ORDER BY date",
            DAILY_COLUMNS
        );
        let client = self.pool.get().await?;
        let rows = client
            .query(sql.as_str(), &[&device_id.as_str(), &sql_limit(limit)])
            .await?;
        rows.iter().map(aggregate_from_row).collect()
    }

    #[instrument(skip(self), fields(unit_id = %device_id))]
    async fn recent_measurements(
        &self,
        device_id: &DeviceId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawMeasurement>> {
        let sql = format!(
            "SELECT * FROM (SELECT {} FROM sensor_measurements WHERE unit_id = $1 AND recorded_at >= $2 \
             ORDER BY recorded_at DESC LIMIT $3) recent ORDER BY recorded_at",
            MEASUREMENT_COLUMNS
        );
        let client = self.pool.get().await?;
        let rows = client
            .query(sql.as_str(), &[&device_id.as_str(), &since, &sql_limit(limit)])
            .await?;
        rows.iter().map(measurement_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_bounds_cover_one_utc_day() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        let (start, end) = day_bounds(date);
        assert_eq!(start.to_rfc3339(), "2024-02-28T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-02-29T00:00:00+00:00");
    }

    #[test]
    fn test_sql_limit_saturates() {
        assert_eq!(sql_limit(7), 7);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }
}
