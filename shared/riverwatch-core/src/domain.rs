//! Core domain types used across Riverwatch services

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensor unit identifier
///
/// Opaque to the system; the first reading carrying an unseen id creates
/// all per-device state implicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One decoded telemetry message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_id: DeviceId,
    pub height: f64,
    pub temperature: f64,
    pub battery: f64,
    pub rssi: f64,
    pub snr: f64,
    pub observed_at: DateTime<Utc>,
}

/// Most recent reading seen for a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestReading {
    pub device_id: DeviceId,
    pub height: f64,
    pub temperature: f64,
    pub battery: f64,
    pub rssi: f64,
    pub snr: f64,
    pub observed_at: DateTime<Utc>,
}

impl From<&SensorReading> for LatestReading {
    fn from(reading: &SensorReading) -> Self {
        Self {
            device_id: reading.device_id.clone(),
            height: reading.height,
            temperature: reading.temperature,
            battery: reading.battery,
            rssi: reading.rssi,
            snr: reading.snr,
            observed_at: reading.observed_at,
        }
    }
}

/// Raw measurement row written to the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    pub device_id: DeviceId,
    pub height: f64,
    pub temperature: f64,
    pub battery: f64,
    pub rssi: f64,
    pub snr: f64,
    pub recorded_at: DateTime<Utc>,
}

impl From<&SensorReading> for RawMeasurement {
    fn from(reading: &SensorReading) -> Self {
        Self {
            device_id: reading.device_id.clone(),
            height: reading.height,
            temperature: reading.temperature,
            battery: reading.battery,
            rssi: reading.rssi,
            snr: reading.snr,
            recorded_at: reading.observed_at,
        }
    }
}

/// Registered device as known to the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub created_at: DateTime<Utc>,
}

/// Alert thresholds configured for a unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertLevels {
    pub normal: Option<f64>,
    pub warning: Option<f64>,
    pub high: Option<f64>,
    pub critical: Option<f64>,
}

/// Descriptive unit details shown next to historical data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitProfile {
    pub device_id: DeviceId,
    pub name: String,
    pub location: Option<String>,
    pub alert_levels: AlertLevels,
}

/// Per-device, per-day aggregate of raw measurements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub device_id: DeviceId,
    pub date: NaiveDate,
    pub avg_height: f64,
    pub min_height: f64,
    pub max_height: f64,
    pub avg_temperature: f64,
    pub avg_battery: f64,
    pub avg_rssi: f64,
    pub avg_snr: f64,
    pub sample_count: u32,
}

impl DailyAggregate {
    /// Placeholder row for a day without measurements, keeps charted series gap-free
    pub fn zeroed(device_id: DeviceId, date: NaiveDate) -> Self {
        Self {
            device_id,
            date,
            avg_height: 0.0,
            min_height: 0.0,
            max_height: 0.0,
            avg_temperature: 0.0,
            avg_battery: 0.0,
            avg_rssi: 0.0,
            avg_snr: 0.0,
            sample_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_serializes_as_plain_string() {
        let id = DeviceId::new("U1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"U1\"");
        assert_eq!(id.to_string(), "U1");
    }

    #[test]
    fn test_raw_measurement_keeps_observation_time() {
        let reading = SensorReading {
            device_id: "U7".into(),
            height: 42.5,
            temperature: 21.0,
            battery: 3.9,
            rssi: -87.0,
            snr: 9.5,
            observed_at: Utc::now(),
        };
        let raw = RawMeasurement::from(&reading);
        assert_eq!(raw.recorded_at, reading.observed_at);
        assert_eq!(raw.device_id, reading.device_id);
    }

    #[test]
    fn test_zeroed_aggregate() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let agg = DailyAggregate::zeroed("U1".into(), date);
        assert_eq!(agg.sample_count, 0);
        assert_eq!(agg.max_height, 0.0);
    }
}
