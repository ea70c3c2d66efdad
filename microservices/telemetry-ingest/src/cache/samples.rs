//! Warm-up sample buffers used while a baseline is being derived

use dashmap::DashMap;
use riverwatch_core::DeviceId;
use serde::Serialize;
use std::collections::BTreeMap;

/// Readings collected for one device since its last cache miss
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<f64>,
    capacity: usize,
}

impl SampleBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

/// Derivation progress for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DerivationProgress {
    pub collected: usize,
    pub remaining: usize,
}

/// Outcome of adding a sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Buffer still filling; holds the number of samples collected so far
    Collecting(usize),
    /// Buffer reached capacity and was discarded; holds its mean
    Complete(f64),
}

/// Per-device sample buffers
pub struct SampleCollector {
    buffers: DashMap<DeviceId, SampleBuffer>,
    capacity: usize,
}

impl SampleCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, creating the buffer if needed
    ///
    /// A buffer that reaches capacity is removed before its mean is returned,
    /// so at most `capacity` samples ever contribute to one derivation.
    pub fn push(&self, device_id: &DeviceId, value: f64) -> SampleOutcome {
        let mut entry = self
            .buffers
            .entry(device_id.clone())
            .or_insert_with(|| SampleBuffer::new(self.capacity));
        entry.samples.push(value);

        if !entry.is_full() {
            return SampleOutcome::Collecting(entry.len());
        }

        let mean = entry.mean().unwrap_or(value);
        drop(entry);
        self.buffers.remove(device_id);
        SampleOutcome::Complete(mean)
    }

    pub fn progress(&self, device_id: &DeviceId) -> Option<DerivationProgress> {
        self.buffers.get(device_id).map(|buf| DerivationProgress {
            collected: buf.len(),
            remaining: self.capacity.saturating_sub(buf.len()),
        })
    }

    pub fn all_progress(&self) -> BTreeMap<String, DerivationProgress> {
        self.buffers
            .iter()
            .map(|entry| {
                (
                    entry.key().to_string(),
                    DerivationProgress {
                        collected: entry.len(),
                        remaining: self.capacity.saturating_sub(entry.len()),
                    },
                )
            })
            .collect()
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.buffers.contains_key(device_id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.buffers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn remove(&self, device_id: &DeviceId) {
        self.buffers.remove(device_id);
    }

    pub fn clear(&self) {
        self.buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
