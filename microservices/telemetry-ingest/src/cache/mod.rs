//! Process-local device cache
//!
//! Holds derived baselines, warm-up sample buffers and the latest reading
//! for every device seen since start-up. Nothing here survives a restart;
//! baselines are recovered from the durable store on first use.

mod latest;
mod normal_value;
mod samples;

pub use latest::LatestReadingCache;
pub use normal_value::{BaselineEntry, NormalValueResolver, ResolverCounts};
pub use samples::{DerivationProgress, SampleBuffer, SampleCollector, SampleOutcome};

use riverwatch_core::{DeviceId, LatestReading};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::store::PersistentStore;

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_cached_devices: usize,
    pub devices_with_resolved_baseline: usize,
    pub devices_without_baseline: usize,
    pub devices_deriving_baseline: usize,
    pub devices_with_latest_reading: usize,
    pub baseline_sample_size: usize,
    pub hit_ratio: f64,
    pub derivation_progress: BTreeMap<String, DerivationProgress>,
}

/// Facade over the baseline resolver and the latest-reading cache
pub struct CacheManager {
    resolver: NormalValueResolver,
    latest: LatestReadingCache,
}

impl CacheManager {
    pub fn new(store: Arc<dyn PersistentStore>, sample_size: usize, store_timeout: Duration) -> Self {
        Self {
            resolver: NormalValueResolver::new(store, sample_size, store_timeout),
            latest: LatestReadingCache::new(),
        }
    }

    pub fn resolver(&self) -> &NormalValueResolver {
        &self.resolver
    }

    pub async fn resolve_baseline(&self, device_id: &DeviceId, observed_height: f64) -> f64 {
        self.resolver.resolve(device_id, observed_height).await
    }

    /// Record a reading as the device's latest
    ///
    /// See [`LatestReadingCache::update`] for how out-of-order readings are
    /// handled.
    pub fn record_reading(
        &self,
        reading: LatestReading,
    ) -> std::result::Result<Option<LatestReading>, LatestReading> {
        self.latest.update(reading)
    }

    pub fn get_baseline(&self, device_id: &DeviceId) -> Option<BaselineEntry> {
        self.resolver.entry(device_id)
    }

    pub fn get_latest_reading(&self, device_id: &DeviceId) -> Option<LatestReading> {
        self.latest.get(device_id)
    }

    pub fn get_all_latest_readings(&self) -> HashMap<DeviceId, LatestReading> {
        self.latest.snapshot()
    }

    pub async fn refresh(&self, device_id: &DeviceId) -> Result<Option<f64>> {
        self.resolver.refresh(device_id).await
    }

    /// Clear one device, or everything when `device_id` is `None`
    pub async fn clear(&self, device_id: Option<&DeviceId>) {
        self.resolver.clear(device_id).await;
        match device_id {
            Some(id) => {
                self.latest.remove(id);
                info!(unit_id = %id, "Cache cleared for unit");
            }
            None => {
                self.latest.clear();
                info!("Cache cleared for all units");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.resolver.entries_snapshot();
        let total = entries.len();
        let resolved = entries.iter().filter(|e| e.is_resolved).count();
        let samples = self.resolver.samples();

        CacheStats {
            total_cached_devices: total,
            devices_with_resolved_baseline: resolved,
            devices_without_baseline: total - resolved,
            devices_deriving_baseline: samples.len(),
            devices_with_latest_reading: self.latest.len(),
            baseline_sample_size: samples.capacity(),
            hit_ratio: if total > 0 {
                resolved as f64 / total as f64
            } else {
                0.0
            },
            derivation_progress: samples.all_progress(),
        }
    }
}
