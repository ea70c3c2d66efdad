//! Per-topic subscriber registry

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::RwLock;
use riverwatch_telemetry::Gauge;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BroadcastFanout, TopicClass};

struct Subscriber {
    topic: TopicClass,
    tx: mpsc::Sender<Arc<str>>,
}

/// Receiving end handed to a connection task
pub struct Subscription {
    pub id: Uuid,
    pub topic: TopicClass,
    pub rx: mpsc::Receiver<Arc<str>>,
}

/// Subscriber registry keyed by connection id
pub struct SubscriptionHub {
    subscribers: DashMap<Uuid, Subscriber>,
    latest: RwLock<Option<Arc<str>>>,
    buffer: usize,
    send_timeout: Duration,
    connections: Gauge,
}

impl SubscriptionHub {
    pub fn new(buffer: usize, send_timeout: Duration) -> Self {
        Self {
            subscribers: DashMap::new(),
            latest: RwLock::new(None),
            buffer: buffer.max(1),
            send_timeout,
            connections: Gauge::new("websocket_connections"),
        }
    }

    /// Register a subscriber
    ///
    /// A new `All` subscriber starts with the most recent payload, if any.
    pub fn subscribe(&self, topic: TopicClass) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        if topic == TopicClass::All {
            if let Some(latest) = self.latest.read().clone() {
                let _ = tx.try_send(latest);
            }
        }

        self.subscribers.insert(id, Subscriber { topic, tx });
        self.connections.inc();
        info!(
            connection_id = %id,
            topic = %topic,
            total = self.total_connections(),
            "Viewer subscribed"
        );

        Subscription { id, topic, rx }
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        if let Some((_, sub)) = self.subscribers.remove(id) {
            self.connections.dec();
            info!(connection_id = %id, topic = %sub.topic, "Viewer unsubscribed");
        }
    }

    pub fn total_connections(&self) -> usize {
        self.subscribers.len()
    }

    /// Connection count per topic, including empty topics
    pub fn connection_stats(&self) -> BTreeMap<&'static str, usize> {
        let mut stats: BTreeMap<&'static str, usize> = TopicClass::ALL_CLASSES
            .iter()
            .map(|t| (t.as_str(), 0))
            .collect();
        for sub in self.subscribers.iter() {
            *stats.entry(sub.topic.as_str()).or_insert(0) += 1;
        }
        stats
    }

    pub fn latest_payload(&self) -> Option<Arc<str>> {
        self.latest.read().clone()
    }
}

#[async_trait]
impl BroadcastFanout for SubscriptionHub {
    async fn publish(&self, topic: TopicClass, payload: Arc<str>) -> usize {
        if topic == TopicClass::All {
            *self.latest.write() = Some(payload.clone());
        }

        // Collect first so no map guard is held across an await
        let targets: Vec<(Uuid, mpsc::Sender<Arc<str>>)> = self
            .subscribers
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| (*s.key(), s.tx.clone()))
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let limit = self.send_timeout;
        let results = join_all(targets.into_iter().map(|(id, tx)| {
            let payload = payload.clone();
            async move { (id, tx.send_timeout(payload, limit).await.is_ok()) }
        }))
        .await;

        let mut delivered = 0;
        for (id, ok) in results {
            if ok {
                delivered += 1;
            } else {
                warn!(connection_id = %id, topic = %topic, "Dropping unresponsive viewer");
                self.unsubscribe(&id);
            }
        }
        debug!(topic = %topic, delivered, "Payload published");
        delivered
    }

    fn has_subscribers(&self, topic: TopicClass) -> bool {
        self.subscribers.iter().any(|s| s.topic == topic)
    }
}
