//! Background durable writes for raw measurements

use riverwatch_core::RawMeasurement;
use riverwatch_telemetry::Counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::store::{with_timeout, PersistentStore};

/// Write counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WriterStats {
    pub submitted: u64,
    pub dropped: u64,
    pub failed: u64,
    pub written: u64,
}

#[derive(Clone)]
struct WriterCounters {
    submitted: Counter,
    dropped: Counter,
    failed: Counter,
    written: Counter,
}

/// Bounded write queue drained by a background worker
///
/// Submitting never waits: when the queue is full the new measurement is
/// dropped. Writes are not retried.
pub struct MeasurementWriter {
    queue: mpsc::Sender<RawMeasurement>,
    counters: WriterCounters,
}

impl MeasurementWriter {
    /// Create the writer and spawn its worker on the current runtime
    pub fn spawn(
        store: Arc<dyn PersistentStore>,
        capacity: usize,
        max_concurrent: usize,
        store_timeout: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<RawMeasurement>(capacity.max(1));
        let counters = WriterCounters {
            submitted: Counter::new("writes_submitted"),
            dropped: Counter::new("writes_dropped"),
            failed: Counter::new("writes_failed"),
            written: Counter::new("writes_completed"),
        };

        let limiter = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let worker_counters = counters.clone();

        tokio::spawn(async move {
            while let Some(measurement) = rx.recv().await {
                let permit = match limiter.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let store = store.clone();
                let counters = worker_counters.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    match with_timeout(store_timeout, store.insert_raw_measurement(&measurement))
                        .await
                    {
                        Ok(()) => {
                            counters.written.inc();
                            debug!(unit_id = %measurement.device_id, "Measurement persisted");
                        }
                        Err(e) => {
                            counters.failed.inc();
                            warn!(
                                unit_id = %measurement.device_id,
                                error = %e,
                                "Failed to persist measurement"
                            );
                        }
                    }
                });
            }
            debug!("Measurement writer stopped");
        });

        Self {
            queue: tx,
            counters,
        }
    }

    /// Queue a measurement; returns false if it was dropped
    pub fn submit(&self, measurement: RawMeasurement) -> bool {
        match self.queue.try_send(measurement) {
            Ok(()) => {
                self.counters.submitted.inc();
                true
            }
            Err(TrySendError::Full(m)) => {
                self.counters.dropped.inc();
                warn!(unit_id = %m.device_id, "Write queue full, dropping measurement");
                false
            }
            Err(TrySendError::Closed(m)) => {
                self.counters.dropped.inc();
                warn!(unit_id = %m.device_id, "Write queue closed, dropping measurement");
                false
            }
        }
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            submitted: self.counters.submitted.get(),
            dropped: self.counters.dropped.get(),
            failed: self.counters.failed.get(),
            written: self.counters.written.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn measurement(id: &str) -> RawMeasurement {
        RawMeasurement {
            device_id: id.into(),
            height: 1.0,
            temperature: 2.0,
            battery: 3.0,
            rssi: -4.0,
            snr: 5.0,
            recorded_at: Utc::now(),
        }
    }

    async fn settle<F: Fn() -> bool>(done: F) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_submitted_measurement_is_written() {
        let store = Arc::new(MemoryStore::new());
        let writer = MeasurementWriter::spawn(store.clone(), 8, 2, Duration::from_secs(1));

        assert!(writer.submit(measurement("U1")));
        settle(|| writer.stats().written == 1).await;

        assert_eq!(store.measurements(&"U1".into()).len(), 1);
        assert_eq!(writer.stats().submitted, 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_counted() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let writer = MeasurementWriter::spawn(store.clone(), 8, 2, Duration::from_secs(1));

        writer.submit(measurement("U1"));
        settle(|| writer.stats().failed == 1).await;
        assert_eq!(writer.stats().failed, 1);
        assert_eq!(writer.stats().written, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_newest() {
        let store = Arc::new(MemoryStore::new());
        let writer = MeasurementWriter::spawn(store, 1, 1, Duration::from_secs(1));

        // The worker has not been polled yet on a current-thread runtime
        assert!(writer.submit(measurement("A")));
        assert!(!writer.submit(measurement("B")));
        assert_eq!(writer.stats().dropped, 1);
    }
}
