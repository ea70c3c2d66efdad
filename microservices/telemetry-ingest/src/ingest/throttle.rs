//! Per-device durable-write throttle

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use riverwatch_core::DeviceId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Longest save interval accepted from configuration or the API (one day)
pub const MAX_SAVE_INTERVAL_SECS: u64 = 86_400;

/// Allows at most one durable write per device per save interval
pub struct PersistenceThrottle {
    marks: DashMap<DeviceId, DateTime<Utc>>,
    interval_secs: AtomicU64,
}

impl PersistenceThrottle {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            marks: DashMap::new(),
            interval_secs: AtomicU64::new(interval_secs),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.load(Ordering::Relaxed)
    }

    /// Takes effect for the next decision; existing marks are kept
    pub fn set_interval(&self, secs: u64) {
        self.interval_secs.store(secs, Ordering::Relaxed);
    }

    /// Decide whether a reading at `now` should be written, marking it if so
    ///
    /// The mark is set when the write is scheduled, not when it completes,
    /// and a failed write does not roll it back.
    pub fn check_and_mark(&self, device_id: &DeviceId, now: DateTime<Utc>) -> bool {
        let interval = i64::try_from(self.interval_secs()).unwrap_or(i64::MAX);
        match self.marks.entry(device_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if (now - *slot.get()).num_seconds() >= interval {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn last_persisted(&self, device_id: &DeviceId) -> Option<DateTime<Utc>> {
        self.marks.get(device_id).map(|m| *m.value())
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_first_reading_always_persists() {
        let throttle = PersistenceThrottle::new(30);
        assert!(throttle.check_and_mark(&"U1".into(), Utc::now()));
    }

    #[test]
    fn test_interval_gate() {
        let throttle = PersistenceThrottle::new(30);
        let id = DeviceId::new("U1");
        let t0 = Utc::now();

        assert!(throttle.check_and_mark(&id, t0));
        assert!(!throttle.check_and_mark(&id, t0 + Duration::seconds(10)));
        assert!(throttle.check_and_mark(&id, t0 + Duration::seconds(31)));
        assert_eq!(throttle.last_persisted(&id), Some(t0 + Duration::seconds(31)));
    }

    #[test]
    fn test_devices_are_independent() {
        let throttle = PersistenceThrottle::new(30);
        let t0 = Utc::now();
        assert!(throttle.check_and_mark(&"A".into(), t0));
        assert!(throttle.check_and_mark(&"B".into(), t0));
    }

    #[test]
    fn test_huge_interval_never_reopens() {
        let throttle = PersistenceThrottle::new(30);
        let id = DeviceId::new("U1");
        let t0 = Utc::now();
        throttle.set_interval(u64::MAX);

        assert!(throttle.check_and_mark(&id, t0));
        assert!(!throttle.check_and_mark(&id, t0 + Duration::seconds(1)));
        assert!(!throttle.check_and_mark(&id, t0 + Duration::days(3650)));
    }

    #[test]
    fn test_interval_change_applies_to_next_decision() {
        let throttle = PersistenceThrottle::new(30);
        let id = DeviceId::new("U1");
        let t0 = Utc::now();
        throttle.check_and_mark(&id, t0);

        throttle.set_interval(5);
        assert!(throttle.check_and_mark(&id, t0 + Duration::seconds(6)));
    }
}
