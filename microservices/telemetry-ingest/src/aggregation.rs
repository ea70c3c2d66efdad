//! Daily aggregation of persisted measurements
//!
//! Every active device gets one row per UTC day. Days without measurements
//! are zero-filled so charted series have no gaps. A backfill at start-up
//! catches up on missed days; afterwards yesterday is aggregated at 00:01.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use riverwatch_core::{DailyAggregate, DeviceId, DeviceRecord};
use riverwatch_telemetry::Counter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::store::{with_timeout, AggregateStore};

/// Result of one run over all active devices
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationReport {
    pub devices: usize,
    pub rows_written: usize,
    pub failures: usize,
    pub per_device: BTreeMap<String, usize>,
}

pub struct DailyAggregationJob {
    store: Arc<dyn AggregateStore>,
    store_timeout: Duration,
    rows_written: Counter,
    failures: Counter,
}

impl DailyAggregationJob {
    pub fn new(store: Arc<dyn AggregateStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
            rows_written: Counter::new("daily_rows_written"),
            failures: Counter::new("daily_aggregation_failures"),
        }
    }

    /// Aggregate one device-day
    ///
    /// With `zero_fill` a day without measurements still gets a zeroed row;
    /// without it nothing is written and `None` is returned.
    pub async fn aggregate_day(
        &self,
        device_id: &DeviceId,
        date: NaiveDate,
        zero_fill: bool,
    ) -> Result<Option<DailyAggregate>> {
        let summary =
            with_timeout(self.store_timeout, self.store.summarize_day(device_id, date)).await?;

        let aggregate = if summary.is_empty() {
            if !zero_fill {
                debug!(unit_id = %device_id, %date, "No measurements, skipping");
                return Ok(None);
            }
            DailyAggregate::zeroed(device_id.clone(), date)
        } else {
            summary.into_aggregate(device_id.clone(), date)
        };

        with_timeout(
            self.store_timeout,
            self.store.upsert_daily_aggregate(&aggregate),
        )
        .await?;
        self.rows_written.inc();
        debug!(
            unit_id = %device_id,
            %date,
            samples = aggregate.sample_count,
            "Daily aggregate stored"
        );
        Ok(Some(aggregate))
    }

    /// Fill in every missing day up to yesterday for all active devices
    ///
    /// A device created today only gets a row for today, and only if it
    /// already has measurements.
    pub async fn backfill(&self, today: NaiveDate) -> Result<AggregationReport> {
        let devices = with_timeout(self.store_timeout, self.store.list_active_devices()).await?;
        info!(devices = devices.len(), %today, "Backfilling daily aggregates");

        let mut report = AggregationReport {
            devices: devices.len(),
            ..AggregationReport::default()
        };
        for device in &devices {
            let written = match self.backfill_device(device, today).await {
                Ok(n) => n,
                Err(e) => {
                    self.failures.inc();
                    report.failures += 1;
                    error!(unit_id = %device.device_id, error = %e, "Backfill failed");
                    0
                }
            };
            report.rows_written += written;
            report
                .per_device
                .insert(device.device_id.to_string(), written);
        }

        info!(rows = report.rows_written, failures = report.failures, "Backfill finished");
        Ok(report)
    }

    async fn backfill_device(&self, device: &DeviceRecord, today: NaiveDate) -> Result<usize> {
        let created = device.created_at.date_naive();
        if created >= today {
            let row = self.aggregate_day(&device.device_id, today, false).await?;
            return Ok(usize::from(row.is_some()));
        }

        let last = with_timeout(
            self.store_timeout,
            self.store.last_aggregated_date(&device.device_id),
        )
        .await?;
        let start = match last {
            Some(date) => date + ChronoDuration::days(1),
            None => created,
        };
        let end = today - ChronoDuration::days(1);

        let mut written = 0;
        let mut date = start;
        while date <= end {
            if self.aggregate_day(&device.device_id, date, true).await?.is_some() {
                written += 1;
            }
            date += ChronoDuration::days(1);
        }
        if written > 0 {
            info!(unit_id = %device.device_id, %start, %end, rows = written, "Unit backfilled");
        }
        Ok(written)
    }

    /// Aggregate yesterday for every active device, zero-filled
    pub async fn run_end_of_day(&self, today: NaiveDate) -> Result<AggregationReport> {
        let yesterday = today - ChronoDuration::days(1);
        let devices = with_timeout(self.store_timeout, self.store.list_active_devices()).await?;
        info!(devices = devices.len(), date = %yesterday, "Running end-of-day aggregation");

        let mut report = AggregationReport {
            devices: devices.len(),
            ..AggregationReport::default()
        };
        for device in &devices {
            let written = match self.aggregate_day(&device.device_id, yesterday, true).await {
                Ok(row) => usize::from(row.is_some()),
                Err(e) => {
                    self.failures.inc();
                    report.failures += 1;
                    error!(unit_id = %device.device_id, error = %e, "End-of-day aggregation failed");
                    0
                }
            };
            report.rows_written += written;
            report
                .per_device
                .insert(device.device_id.to_string(), written);
        }
        Ok(report)
    }

    /// Backfill once, then run end-of-day at 00:01 UTC until shut down
    pub async fn run_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.backfill(Utc::now().date_naive()).await {
            warn!(error = %e, "Start-up backfill failed");
        }

        loop {
            let now = Utc::now();
            let next = next_run_after(now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %next, "Daily aggregation scheduled");

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if let Err(e) = self.run_end_of_day(Utc::now().date_naive()).await {
                error!(error = %e, "End-of-day aggregation run failed");
            }
        }
        info!("Daily aggregation scheduler stopped");
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written.get()
    }

    pub fn failures(&self) -> u64 {
        self.failures.get()
    }
}

/// Next 00:01 UTC strictly after `now`
pub fn next_run_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let run_at = NaiveTime::from_hms_opt(0, 1, 0).unwrap_or(NaiveTime::MIN);
    let candidate = now.date_naive().and_time(run_at).and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + ChronoDuration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PersistentStore};
    use chrono::TimeZone;
    use riverwatch_core::RawMeasurement;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(d: NaiveDate, hour: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(&d.and_hms_opt(hour, 0, 0).unwrap())
    }

    fn measurement(id: &str, height: f64, when: DateTime<Utc>) -> RawMeasurement {
        RawMeasurement {
            device_id: id.into(),
            height,
            temperature: 20.0,
            battery: 4.0,
            rssi: -90.0,
            snr: 8.0,
            recorded_at: when,
        }
    }

    fn job(store: Arc<MemoryStore>) -> DailyAggregationJob {
        DailyAggregationJob::new(store, Duration::from_secs(1))
    }

    #[test]
    fn test_next_run_after() {
        let before = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 30).unwrap();
        assert_eq!(
            next_run_after(before),
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 1, 0).unwrap()
        );
        let after = Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap();
        assert_eq!(
            next_run_after(after),
            Utc.with_ymd_and_hms(2024, 3, 6, 0, 1, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_aggregate_day_zero_fill() {
        let store = Arc::new(MemoryStore::new());
        let job = job(store.clone());
        let id = DeviceId::new("U1");

        assert!(job.aggregate_day(&id, date(2024, 3, 1), false).await.unwrap().is_none());
        let row = job.aggregate_day(&id, date(2024, 3, 1), true).await.unwrap().unwrap();
        assert_eq!(row.sample_count, 0);
        assert_eq!(store.aggregates(&id).len(), 1);
    }

    #[tokio::test]
    async fn test_backfill_from_creation_date() {
        let store = Arc::new(MemoryStore::new());
        let today = date(2024, 3, 10);
        store.register_device("U1".into(), at(date(2024, 3, 7), 9));
        store
            .insert_raw_measurement(&measurement("U1", 10.0, at(date(2024, 3, 8), 6)))
            .await
            .unwrap();
        store
            .insert_raw_measurement(&measurement("U1", 20.0, at(date(2024, 3, 8), 18)))
            .await
            .unwrap();

        let report = job(store.clone()).backfill(today).await.unwrap();
        assert_eq!(report.per_device["U1"], 3);

        let rows = store.aggregates(&"U1".into());
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![date(2024, 3, 7), date(2024, 3, 8), date(2024, 3, 9)]);
        assert_eq!(rows[0].sample_count, 0);
        assert_eq!(rows[1].avg_height, 15.0);
        assert_eq!(rows[1].min_height, 10.0);
        assert_eq!(rows[1].max_height, 20.0);
    }

    #[tokio::test]
    async fn test_backfill_resumes_after_last_row() {
        let store = Arc::new(MemoryStore::new());
        let today = date(2024, 3, 10);
        store.register_device("U1".into(), at(date(2024, 3, 1), 0));
        let job = job(store.clone());
        job.aggregate_day(&"U1".into(), date(2024, 3, 8), true).await.unwrap();

        let report = job.backfill(today).await.unwrap();
        assert_eq!(report.rows_written, 1);
        assert_eq!(store.aggregates(&"U1".into()).len(), 2);
    }

    #[tokio::test]
    async fn test_new_device_only_gets_today_with_data() {
        let store = Arc::new(MemoryStore::new());
        let today = date(2024, 3, 10);
        store.register_device("NEW".into(), at(today, 1));
        let job = job(store.clone());

        assert_eq!(job.backfill(today).await.unwrap().rows_written, 0);

        store
            .insert_raw_measurement(&measurement("NEW", 3.0, at(today, 2)))
            .await
            .unwrap();
        assert_eq!(job.backfill(today).await.unwrap().rows_written, 1);
        assert_eq!(store.aggregates(&"NEW".into())[0].date, today);
    }

    #[tokio::test]
    async fn test_end_of_day_covers_active_devices_only() {
        let store = Arc::new(MemoryStore::new());
        let today = date(2024, 3, 10);
        store.register_device("A".into(), at(date(2024, 1, 1), 0));
        store.register_device("B".into(), at(date(2024, 1, 1), 0));
        store.set_active(&"B".into(), false);

        let report = job(store.clone()).run_end_of_day(today).await.unwrap();
        assert_eq!(report.devices, 1);
        assert_eq!(report.rows_written, 1);
        assert_eq!(store.aggregates(&"A".into())[0].date, date(2024, 3, 9));
        assert!(store.aggregates(&"B".into()).is_empty());
    }

    #[tokio::test]
    async fn test_device_failure_does_not_stop_run() {
        let store = Arc::new(MemoryStore::new());
        store.register_device("A".into(), at(date(2024, 1, 1), 0));
        let job = job(store.clone());
        store.set_fail_writes(true);

        let report = job.run_end_of_day(date(2024, 3, 10)).await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.per_device["A"], 0);
        assert_eq!(job.failures(), 1);
    }
}
