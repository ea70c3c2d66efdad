//! Message transport
//!
//! The transport owns the broker connection and hands every inbound message
//! to a callback. The ingest core only observes readings arriving or not.

mod backoff;
mod mqtt;

pub use backoff::ReconnectPolicy;
pub use mqtt::MqttTransport;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Callback invoked with (topic, payload) for every inbound message
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Inbound message source
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Topics to subscribe to on every (re)connect
    fn subscribe(&self, topics: &[String]);

    fn on_message(&self, callback: MessageCallback);

    /// Deliver messages until stopped or reconnection gives up
    async fn run(&self) -> Result<()>;

    fn stop(&self);

    fn is_connected(&self) -> bool;

    fn is_alive(&self) -> bool;
}

/// Connection state shared between the event loop and status readers
pub struct TransportStatus {
    connected: AtomicBool,
    last_activity: RwLock<Option<Instant>>,
    keep_alive: Duration,
}

impl TransportStatus {
    pub fn new(keep_alive: Duration) -> Self {
        Self {
            connected: AtomicBool::new(false),
            last_activity: RwLock::new(None),
            keep_alive,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if connected {
            self.touch();
        }
    }

    /// Record that the broker was heard from
    pub fn touch(&self) {
        *self.last_activity.write() = Some(Instant::now());
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connected and heard from within two keep-alive periods
    pub fn is_alive(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        match *self.last_activity.read() {
            Some(at) => at.elapsed() <= self.keep_alive * 2,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_starts_disconnected() {
        let status = TransportStatus::new(Duration::from_secs(30));
        assert!(!status.is_connected());
        assert!(!status.is_alive());
    }

    #[test]
    fn test_connected_is_alive() {
        let status = TransportStatus::new(Duration::from_secs(30));
        status.set_connected(true);
        assert!(status.is_alive());
        status.set_connected(false);
        assert!(!status.is_alive());
    }

    #[test]
    fn test_stale_activity_is_not_alive() {
        let status = TransportStatus::new(Duration::from_millis(1));
        status.set_connected(true);
        std::thread::sleep(Duration::from_millis(10));
        assert!(status.is_connected());
        assert!(!status.is_alive());
    }
}
