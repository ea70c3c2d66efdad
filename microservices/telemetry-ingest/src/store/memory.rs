//! In-process store
//!
//! Used when no `DATABASE_URL` is configured. Everything is lost on restart.
//! Failure and latency injection hooks make it the store of choice in tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use riverwatch_core::{
    AlertLevels, DailyAggregate, DeviceId, DeviceRecord, RawMeasurement, UnitProfile,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::{default_unit_name, AggregateStore, DaySummary, PersistentStore};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct UnitRow {
    name: String,
    location: Option<String>,
    normal_level: Option<f64>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl UnitRow {
    fn new(device_id: &DeviceId, created_at: DateTime<Utc>) -> Self {
        Self {
            name: default_unit_name(device_id),
            location: None,
            normal_level: None,
            is_active: true,
            created_at,
        }
    }
}

#[derive(Default)]
struct State {
    units: HashMap<DeviceId, UnitRow>,
    measurements: Vec<RawMeasurement>,
    aggregates: BTreeMap<(DeviceId, NaiveDate), DailyAggregate>,
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    latency_ms: AtomicU64,
    baseline_reads: AtomicU64,
    baseline_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read return a store error
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write return a store error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Register a device with an explicit creation time
    pub fn register_device(&self, device_id: DeviceId, created_at: DateTime<Utc>) {
        let row = UnitRow::new(&device_id, created_at);
        self.state.lock().units.insert(device_id, row);
    }

    /// Set the display name and location of a registered device
    pub fn describe_device(&self, device_id: &DeviceId, name: &str, location: Option<&str>) {
        if let Some(unit) = self.state.lock().units.get_mut(device_id) {
            unit.name = name.to_string();
            unit.location = location.map(str::to_string);
        }
    }

    pub fn set_active(&self, device_id: &DeviceId, active: bool) {
        if let Some(unit) = self.state.lock().units.get_mut(device_id) {
            unit.is_active = active;
        }
    }

    pub fn stored_baseline(&self, device_id: &DeviceId) -> Option<f64> {
        self.state
            .lock()
            .units
            .get(device_id)
            .and_then(|u| u.normal_level)
    }

    pub fn measurements(&self, device_id: &DeviceId) -> Vec<RawMeasurement> {
        self.state
            .lock()
            .measurements
            .iter()
            .filter(|m| &m.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn aggregates(&self, device_id: &DeviceId) -> Vec<DailyAggregate> {
        self.state
            .lock()
            .aggregates
            .iter()
            .filter(|((id, _), _)| id == device_id)
            .map(|(_, agg)| agg.clone())
            .collect()
    }

    pub fn baseline_reads(&self) -> u64 {
        self.baseline_reads.load(Ordering::SeqCst)
    }

    pub fn baseline_writes(&self) -> u64 {
        self.baseline_writes.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Store("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get_baseline(&self, device_id: &DeviceId) -> Result<Option<f64>> {
        self.simulate_latency().await;
        self.baseline_reads.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        Ok(self.stored_baseline(device_id))
    }

    async fn upsert_baseline(&self, device_id: &DeviceId, baseline: f64) -> Result<()> {
        self.simulate_latency().await;
        self.baseline_writes.fetch_add(1, Ordering::SeqCst);
        self.check_write()?;
        let mut state = self.state.lock();
        state
            .units
            .entry(device_id.clone())
            .or_insert_with(|| UnitRow::new(device_id, Utc::now()))
            .normal_level = Some(baseline);
        Ok(())
    }

    async fn insert_raw_measurement(&self, measurement: &RawMeasurement) -> Result<()> {
        self.simulate_latency().await;
        self.check_write()?;
        let mut state = self.state.lock();
        state
            .units
            .entry(measurement.device_id.clone())
            .or_insert_with(|| UnitRow::new(&measurement.device_id, measurement.recorded_at));
        state.measurements.push(measurement.clone());
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.fail_reads.load(Ordering::SeqCst) && !self.fail_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn list_active_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.check_read()?;
        let state = self.state.lock();
        let mut devices: Vec<DeviceRecord> = state
            .units
            .iter()
            .filter(|(_, unit)| unit.is_active)
            .map(|(id, unit)| DeviceRecord {
                device_id: id.clone(),
                created_at: unit.created_at,
            })
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }

    async fn find_unit(&self, device_id: &DeviceId) -> Result<Option<UnitProfile>> {
        self.check_read()?;
        Ok(self.state.lock().units.get(device_id).map(|unit| UnitProfile {
            device_id: device_id.clone(),
            name: unit.name.clone(),
            location: unit.location.clone(),
            alert_levels: AlertLevels {
                normal: unit.normal_level,
                ..AlertLevels::default()
            },
        }))
    }

    async fn last_aggregated_date(&self, device_id: &DeviceId) -> Result<Option<NaiveDate>> {
        self.check_read()?;
        Ok(self
            .state
            .lock()
            .aggregates
            .keys()
            .filter(|(id, _)| id == device_id)
            .map(|(_, date)| *date)
            .max())
    }

    async fn summarize_day(&self, device_id: &DeviceId, date: NaiveDate) -> Result<DaySummary> {
        self.check_read()?;
        let state = self.state.lock();
        let day: Vec<&RawMeasurement> = state
            .measurements
            .iter()
            .filter(|m| &m.device_id == device_id && m.recorded_at.date_naive() == date)
            .collect();

        if day.is_empty() {
            return Ok(DaySummary::default());
        }

        let n = day.len() as f64;
        let avg = |f: fn(&RawMeasurement) -> f64| day.iter().map(|m| f(m)).sum::<f64>() / n;

        Ok(DaySummary {
            count: day.len() as u32,
            avg_height: avg(|m| m.height),
            min_height: day.iter().map(|m| m.height).fold(f64::INFINITY, f64::min),
            max_height: day.iter().map(|m| m.height).fold(f64::NEG_INFINITY, f64::max),
            avg_temperature: avg(|m| m.temperature),
            avg_battery: avg(|m| m.battery),
            avg_rssi: avg(|m| m.rssi),
            avg_snr: avg(|m| m.snr),
        })
    }

    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> Result<()> {
        self.check_write()?;
        self.state.lock().aggregates.insert(
            (aggregate.device_id.clone(), aggregate.date),
            aggregate.clone(),
        );
        Ok(())
    }

    async fn daily_aggregates(
        &self,
        device_id: &DeviceId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregate>> {
        self.check_read()?;
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .state
            .lock()
            .aggregates
            .range((device_id.clone(), start)..=(device_id.clone(), end))
            .map(|(_, agg)| agg.clone())
            .collect())
    }

    async fn latest_aggregates(&self, device_id: &DeviceId, limit: usize) -> Result<Vec<DailyAggregate>> {
        self.check_read()?;
        let mut recent: Vec<DailyAggregate> = self
            .state
            .lock()
            .aggregates
            .iter()
            .rev()
            .filter(|((id, _), _)| id == device_id)
            .take(limit)
            .map(|(_, agg)| agg.clone())
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn recent_measurements(
        &self,
        device_id: &DeviceId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawMeasurement>> {
        self.check_read()?;
        let mut window: Vec<RawMeasurement> = self
            .state
            .lock()
            .measurements
            .iter()
            .filter(|m| &m.device_id == device_id && m.recorded_at >= since)
            .cloned()
            .collect();
        window.sort_by_key(|m| m.recorded_at);
        let skip = window.len().saturating_sub(limit);
        Ok(window.split_off(skip))
    }
}
