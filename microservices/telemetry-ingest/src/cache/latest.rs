//! Latest reading per device

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use riverwatch_core::{DeviceId, LatestReading};
use std::collections::HashMap;

/// Most recent full reading for each device, no history
#[derive(Default)]
pub struct LatestReadingCache {
    readings: DashMap<DeviceId, LatestReading>,
}

impl LatestReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reading unless a newer one is already cached
    ///
    /// `Ok` carries the reading that was replaced. A reading observed before
    /// the cached one is not stored and `Err` carries the newer reading that
    /// stays in place.
    pub fn update(&self, reading: LatestReading) -> Result<Option<LatestReading>, LatestReading> {
        match self.readings.entry(reading.device_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(reading);
                Ok(None)
            }
            Entry::Occupied(mut slot) => {
                if reading.observed_at < slot.get().observed_at {
                    return Err(slot.get().clone());
                }
                Ok(Some(slot.insert(reading)))
            }
        }
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<LatestReading> {
        self.readings.get(device_id).map(|r| r.value().clone())
    }

    /// Point-in-time copy; later updates do not show up in it
    pub fn snapshot(&self) -> HashMap<DeviceId, LatestReading> {
        self.readings
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn remove(&self, device_id: &DeviceId) {
        self.readings.remove(device_id);
    }

    pub fn clear(&self) {
        self.readings.clear();
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
