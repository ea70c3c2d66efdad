//! Per-reading ingest decisions

use chrono::{DateTime, SecondsFormat, Utc};
use riverwatch_core::{DeviceId, LatestReading, RawMeasurement, SensorReading};
use riverwatch_telemetry::{Counter, Histogram, HistogramSummary};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::decode::{decode_reading, DecodeError};
use super::throttle::PersistenceThrottle;
use super::writer::{MeasurementWriter, WriterStats};
use crate::cache::{CacheManager, ResolverCounts};
use crate::fanout::{BroadcastFanout, TopicClass};

/// Topics every reading is published to
const READING_TOPICS: [TopicClass; 2] = [TopicClass::All, TopicClass::Distance];

/// Direction of the height relative to the previous reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn between(previous: Option<f64>, current: f64) -> Self {
        match previous {
            Some(prev) if current > prev => Trend::Up,
            Some(prev) if current < prev => Trend::Down,
            _ => Trend::Stable,
        }
    }
}

/// Message pushed to live viewers for every reading
///
/// Field names, including `hight`, are what the dashboard expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastPayload {
    pub unit_id: DeviceId,
    pub hight: f64,
    pub normal_level: f64,
    pub raw_height: f64,
    pub temperature: f64,
    pub battery: f64,
    pub signal: f64,
    pub trend: Trend,
    pub sensor_status: &'static str,
    pub status: &'static str,
    pub time: String,
}

/// What happened to one reading
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub payload: BroadcastPayload,
    pub write_scheduled: bool,
    pub delivered: usize,
}

/// Ingest counters
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub decode_failures: u64,
    pub processed: u64,
    pub broadcasts: u64,
    pub writes_scheduled: u64,
    pub save_interval_secs: u64,
    pub writer: WriterStats,
    pub resolver: ResolverCounts,
    pub latency_ms: HistogramSummary,
}

/// Drives one decoded reading through baseline resolution, caching,
/// throttled persistence and broadcast
pub struct IngestPipeline {
    cache: Arc<CacheManager>,
    throttle: PersistenceThrottle,
    writer: MeasurementWriter,
    fanout: Arc<dyn BroadcastFanout>,
    signal_placeholder: f64,
    received: Counter,
    decode_failures: Counter,
    processed: Counter,
    broadcasts: Counter,
    writes_scheduled: Counter,
    latency: Histogram,
}

impl IngestPipeline {
    pub fn new(
        cache: Arc<CacheManager>,
        writer: MeasurementWriter,
        fanout: Arc<dyn BroadcastFanout>,
        save_interval_secs: u64,
        signal_placeholder: f64,
    ) -> Self {
        Self {
            cache,
            throttle: PersistenceThrottle::new(save_interval_secs),
            writer,
            fanout,
            signal_placeholder,
            received: Counter::new("readings_received"),
            decode_failures: Counter::new("decode_failures"),
            processed: Counter::new("readings_processed"),
            broadcasts: Counter::new("broadcasts"),
            writes_scheduled: Counter::new("writes_scheduled"),
            latency: Histogram::with_capacity("ingest_latency_ms", 4096),
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Transport callback: decode inline, process on a separate task
    ///
    /// Returns as soon as the reading is decoded; malformed messages are
    /// logged and dropped here.
    pub fn dispatch(self: &Arc<Self>, topic: &str, bytes: &[u8]) {
        self.received.inc();
        let reading = match decode_reading(bytes, Utc::now()) {
            Ok(reading) => reading,
            Err(e) => {
                self.reject(topic, bytes, &e);
                return;
            }
        };

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.process(reading).await;
        });
    }

    /// Decode and process one message on the caller's task
    pub async fn handle(&self, bytes: &[u8]) -> Result<IngestOutcome, DecodeError> {
        self.received.inc();
        match decode_reading(bytes, Utc::now()) {
            Ok(reading) => Ok(self.process(reading).await),
            Err(e) => {
                self.reject("-", bytes, &e);
                Err(e)
            }
        }
    }

    /// Run a decoded reading through every ingest step
    pub async fn process(&self, reading: SensorReading) -> IngestOutcome {
        let started = Instant::now();
        let device_id = reading.device_id.clone();

        let baseline = self.cache.resolve_baseline(&device_id, reading.height).await;

        let trend = match self.cache.record_reading(LatestReading::from(&reading)) {
            Ok(previous) => Trend::between(previous.map(|p| p.height), reading.height),
            Err(newer) => {
                debug!(
                    unit_id = %device_id,
                    observed_at = %reading.observed_at,
                    cached_at = %newer.observed_at,
                    "Out-of-order reading, latest reading kept"
                );
                Trend::Stable
            }
        };

        let write_scheduled = self.throttle.check_and_mark(&device_id, reading.observed_at);
        if write_scheduled {
            self.writes_scheduled.inc();
            self.writer.submit(RawMeasurement::from(&reading));
        }

        let payload = self.build_payload(&reading, baseline, trend, reading.observed_at);
        let delivered = self.broadcast(&payload).await;

        self.processed.inc();
        self.latency.record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            unit_id = %device_id,
            height = reading.height,
            baseline,
            write_scheduled,
            delivered,
            "Reading processed"
        );

        IngestOutcome {
            payload,
            write_scheduled,
            delivered,
        }
    }

    pub fn save_interval_secs(&self) -> u64 {
        self.throttle.interval_secs()
    }

    pub fn set_save_interval(&self, secs: u64) {
        self.throttle.set_interval(secs);
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            received: self.received.get(),
            decode_failures: self.decode_failures.get(),
            processed: self.processed.get(),
            broadcasts: self.broadcasts.get(),
            writes_scheduled: self.writes_scheduled.get(),
            save_interval_secs: self.throttle.interval_secs(),
            writer: self.writer.stats(),
            resolver: self.cache.resolver().counts(),
            latency_ms: self.latency.summary(),
        }
    }

    fn build_payload(
        &self,
        reading: &SensorReading,
        baseline: f64,
        trend: Trend,
        at: DateTime<Utc>,
    ) -> BroadcastPayload {
        BroadcastPayload {
            unit_id: reading.device_id.clone(),
            hight: reading.height,
            normal_level: baseline,
            raw_height: reading.height,
            temperature: reading.temperature,
            battery: reading.battery,
            signal: self.signal_placeholder,
            trend,
            sensor_status: "online",
            status: "normal",
            time: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    async fn broadcast(&self, payload: &BroadcastPayload) -> usize {
        let body: Arc<str> = match serde_json::to_string(payload) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(unit_id = %payload.unit_id, error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        self.broadcasts.inc();
        let mut delivered = 0;
        for topic in READING_TOPICS {
            delivered += self.fanout.publish(topic, body.clone()).await;
        }
        delivered
    }

    fn reject(&self, topic: &str, bytes: &[u8], error: &DecodeError) {
        self.decode_failures.inc();
        warn!(
            topic,
            payload = %String::from_utf8_lossy(bytes),
            error = %error,
            "Dropping undecodable message"
        );
    }
}
