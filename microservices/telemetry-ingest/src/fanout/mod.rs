//! Live fan-out of readings to real-time viewers

mod hub;

pub use hub::{Subscription, SubscriptionHub};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Subscription topic a viewer picks when connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicClass {
    All,
    Distance,
    Temperature,
    Alerts,
}

impl TopicClass {
    pub const ALL_CLASSES: [TopicClass; 4] = [
        TopicClass::All,
        TopicClass::Distance,
        TopicClass::Temperature,
        TopicClass::Alerts,
    ];

    /// Parse a subscription name; anything unrecognised means `All`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "distance" => TopicClass::Distance,
            "temperature" => TopicClass::Temperature,
            "alerts" => TopicClass::Alerts,
            _ => TopicClass::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicClass::All => "all",
            TopicClass::Distance => "distance",
            TopicClass::Temperature => "temperature",
            TopicClass::Alerts => "alerts",
        }
    }
}

impl fmt::Display for TopicClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push side of the fan-out
#[async_trait]
pub trait BroadcastFanout: Send + Sync {
    /// Deliver a serialized payload to every subscriber of `topic`
    ///
    /// Returns the number of subscribers it reached. Subscribers that fail
    /// are removed; publishing itself never fails.
    async fn publish(&self, topic: TopicClass, payload: Arc<str>) -> usize;

    fn has_subscribers(&self, topic: TopicClass) -> bool;
}
