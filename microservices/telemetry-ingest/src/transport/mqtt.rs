//! MQTT transport over rumqttc

use async_trait::async_trait;
use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{MessageCallback, MessageTransport, ReconnectPolicy, TransportStatus};
use crate::config::MqttConfig;
use crate::error::{Error, Result};

/// Broker connection with bounded reconnection
pub struct MqttTransport {
    config: MqttConfig,
    policy: ReconnectPolicy,
    topics: RwLock<Vec<String>>,
    callback: RwLock<Option<MessageCallback>>,
    status: TransportStatus,
    shutdown: watch::Sender<bool>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            policy: ReconnectPolicy::from_config(&config),
            topics: RwLock::new(config.topics.clone()),
            callback: RwLock::new(None),
            status: TransportStatus::new(config.keep_alive),
            shutdown,
            config,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn connect(&self) -> (AsyncClient, EventLoop) {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker_host.clone(),
            self.config.broker_port,
        );
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        AsyncClient::new(options, 64)
    }

    fn subscribe_all(&self, client: &AsyncClient) {
        for topic in self.topics.read().iter() {
            match client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                Ok(()) => info!(topic = %topic, "Subscribed"),
                Err(e) => warn!(topic = %topic, error = %e, "Subscribe request failed"),
            }
        }
    }

    fn deliver(&self, topic: &str, payload: &[u8]) {
        let callback = self.callback.read().clone();
        match callback {
            Some(cb) => cb(topic, payload),
            None => debug!(topic, "Message received with no handler installed"),
        }
    }
}

#[async_trait]
impl MessageTransport for MqttTransport {
    fn subscribe(&self, topics: &[String]) {
        *self.topics.write() = topics.to_vec();
    }

    fn on_message(&self, callback: MessageCallback) {
        *self.callback.write() = Some(callback);
    }

    async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        let (client, mut eventloop) = self.connect();
        let mut failures: u32 = 0;
        info!(
            host = %self.config.broker_host,
            port = self.config.broker_port,
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );

        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    failures = 0;
                    self.status.set_connected(true);
                    info!("MQTT connected");
                    self.subscribe_all(&client);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.status.touch();
                    self.deliver(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.status.set_connected(false);
                    warn!("Broker sent disconnect");
                }
                Ok(Event::Incoming(_)) => self.status.touch(),
                Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    self.status.set_connected(false);
                    failures += 1;
                    let Some(delay) = self.policy.delay_for(failures) else {
                        error!(
                            attempts = self.policy.max_attempts,
                            error = %e,
                            "Giving up on MQTT broker"
                        );
                        return Err(Error::Transport(format!(
                            "broker unreachable after {} attempts: {}",
                            self.policy.max_attempts, e
                        )));
                    };
                    warn!(
                        attempt = failures,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "MQTT connection lost, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.status.set_connected(false);
        let _ = client.try_disconnect();
        info!("MQTT transport stopped");
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    fn is_alive(&self) -> bool {
        self.status.is_alive()
    }
}
