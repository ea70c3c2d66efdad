//! Baseline ("normal level") resolution
//!
//! Lookup order is in-memory entry, then the durable store, then derivation
//! from the first N readings. A derived baseline is persisted once and then
//! served from memory until the entry is cleared.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use riverwatch_core::DeviceId;
use riverwatch_telemetry::Counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::samples::{DerivationProgress, SampleCollector, SampleOutcome};
use crate::error::Result;
use crate::store::{with_timeout, PersistentStore};

/// In-memory baseline state for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineEntry {
    pub device_id: DeviceId,
    pub baseline_value: Option<f64>,
    pub is_resolved: bool,
    pub last_updated: DateTime<Utc>,
}

impl BaselineEntry {
    fn resolved(device_id: DeviceId, value: f64) -> Self {
        Self {
            device_id,
            baseline_value: Some(value),
            is_resolved: true,
            last_updated: Utc::now(),
        }
    }

    /// Marker for a device the store has no baseline for
    fn unresolved(device_id: DeviceId) -> Self {
        Self {
            device_id,
            baseline_value: None,
            is_resolved: false,
            last_updated: Utc::now(),
        }
    }
}

/// Resolver counts, readable without locking
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResolverCounts {
    pub store_lookups: u64,
    pub store_failures: u64,
    pub baselines_derived: u64,
}

/// Resolves and caches per-device baselines
pub struct NormalValueResolver {
    entries: DashMap<DeviceId, BaselineEntry>,
    samples: SampleCollector,
    locks: DashMap<DeviceId, Arc<Mutex<()>>>,
    /// Bumped by every clear-all; entries computed under an older value are discarded
    generation: AtomicU64,
    store: Arc<dyn PersistentStore>,
    store_timeout: Duration,
    store_lookups: Counter,
    store_failures: Counter,
    baselines_derived: Counter,
}

impl NormalValueResolver {
    pub fn new(store: Arc<dyn PersistentStore>, sample_size: usize, store_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            samples: SampleCollector::new(sample_size),
            locks: DashMap::new(),
            generation: AtomicU64::new(0),
            store,
            store_timeout,
            store_lookups: Counter::new("baseline_store_lookups"),
            store_failures: Counter::new("baseline_store_failures"),
            baselines_derived: Counter::new("baselines_derived"),
        }
    }

    pub fn sample_size(&self) -> usize {
        self.samples.capacity()
    }

    /// Baseline for a device given the height it just reported
    ///
    /// Returns the observed height while the baseline is still being derived.
    /// Store failures are logged and never surface to the caller.
    pub async fn resolve(&self, device_id: &DeviceId, observed_height: f64) -> f64 {
        if let Some(value) = self.resolved_value(device_id) {
            return value;
        }

        let lock = self.device_lock(device_id);
        let _guard = lock.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);

        // Another task may have finished while we waited
        if let Some(value) = self.resolved_value(device_id) {
            return value;
        }

        if !self.entries.contains_key(device_id) {
            if let Some(value) = self.lookup_store(device_id, generation).await {
                return value;
            }
        }

        match self.samples.push(device_id, observed_height) {
            SampleOutcome::Collecting(collected) => {
                debug!(
                    unit_id = %device_id,
                    collected,
                    needed = self.samples.capacity(),
                    "Collecting baseline samples"
                );
                observed_height
            }
            SampleOutcome::Complete(mean) => {
                self.baselines_derived.inc();
                if let Err(e) =
                    with_timeout(self.store_timeout, self.store.upsert_baseline(device_id, mean)).await
                {
                    self.store_failures.inc();
                    warn!(
                        unit_id = %device_id,
                        baseline = mean,
                        error = %e,
                        "Failed to persist derived baseline, caching for this session only"
                    );
                }
                if self.insert_current(generation, BaselineEntry::resolved(device_id.clone(), mean)) {
                    info!(unit_id = %device_id, baseline = mean, "Baseline derived");
                } else {
                    debug!(
                        unit_id = %device_id,
                        baseline = mean,
                        "Cache cleared during derivation, baseline not cached"
                    );
                }
                mean
            }
        }
    }

    /// Re-read the store and overwrite the in-memory entry
    ///
    /// A device the store has no baseline for loses its entry and any
    /// partially filled buffer, so derivation starts over.
    pub async fn refresh(&self, device_id: &DeviceId) -> Result<Option<f64>> {
        let lock = self.device_lock(device_id);
        let _guard = lock.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);

        self.store_lookups.inc();
        let stored = with_timeout(self.store_timeout, self.store.get_baseline(device_id))
            .await
            .map_err(|e| {
                self.store_failures.inc();
                e
            })?;

        self.samples.remove(device_id);
        match stored {
            Some(value) => {
                self.insert_current(generation, BaselineEntry::resolved(device_id.clone(), value));
            }
            None => {
                self.entries.remove(device_id);
            }
        }
        info!(unit_id = %device_id, baseline = ?stored, "Baseline refreshed from store");
        Ok(stored)
    }

    pub fn entry(&self, device_id: &DeviceId) -> Option<BaselineEntry> {
        self.entries.get(device_id).map(|e| e.value().clone())
    }

    pub fn progress(&self, device_id: &DeviceId) -> Option<DerivationProgress> {
        self.samples.progress(device_id)
    }

    /// Drop baseline state for one device, or for all devices
    ///
    /// A single-device clear waits for any resolution in progress for that
    /// device, so nothing it computed survives the clear. A clear-all does
    /// not wait; in-flight resolutions see the generation change and skip
    /// caching their result.
    pub async fn clear(&self, device_id: Option<&DeviceId>) {
        match device_id {
            Some(id) => {
                let lock = self.device_lock(id);
                {
                    let _guard = lock.lock().await;
                    self.entries.remove(id);
                    self.samples.remove(id);
                }
                drop(lock);
                self.locks.remove_if(id, |_, l| Arc::strong_count(l) == 1);
            }
            None => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.entries.clear();
                self.samples.clear();
                self.locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
        }
    }

    /// Per-device locks currently held in the lock table
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    pub(crate) fn entries_snapshot(&self) -> Vec<BaselineEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub(crate) fn samples(&self) -> &SampleCollector {
        &self.samples
    }

    pub fn counts(&self) -> ResolverCounts {
        ResolverCounts {
            store_lookups: self.store_lookups.get(),
            store_failures: self.store_failures.get(),
            baselines_derived: self.baselines_derived.get(),
        }
    }

    fn resolved_value(&self, device_id: &DeviceId) -> Option<f64> {
        self.entries
            .get(device_id)
            .filter(|e| e.is_resolved)
            .and_then(|e| e.baseline_value)
    }

    fn device_lock(&self, device_id: &DeviceId) -> Arc<Mutex<()>> {
        self.locks
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Insert an entry unless a clear-all ran after `generation` was read
    ///
    /// The check happens while the entry's shard is locked, so a concurrent
    /// clear either sees the new entry and removes it or bumps the
    /// generation first.
    fn insert_current(&self, generation: u64, entry: BaselineEntry) -> bool {
        let slot = self.entries.entry(entry.device_id.clone());
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        slot.insert(entry);
        true
    }

    /// Store lookup on a cache miss
    ///
    /// A miss leaves an unresolved marker so the rest of this derivation
    /// cycle skips the store. A failed read leaves nothing so the next
    /// reading tries again.
    async fn lookup_store(&self, device_id: &DeviceId, generation: u64) -> Option<f64> {
        self.store_lookups.inc();
        match with_timeout(self.store_timeout, self.store.get_baseline(device_id)).await {
            Ok(Some(value)) => {
                self.samples.remove(device_id);
                self.insert_current(generation, BaselineEntry::resolved(device_id.clone(), value));
                debug!(unit_id = %device_id, baseline = value, "Baseline loaded from store");
                Some(value)
            }
            Ok(None) => {
                self.insert_current(generation, BaselineEntry::unresolved(device_id.clone()));
                None
            }
            Err(e) => {
                self.store_failures.inc();
                warn!(unit_id = %device_id, error = %e, "Baseline lookup failed");
                None
            }
        }
    }
}
