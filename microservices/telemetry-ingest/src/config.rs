//! Ingest service configuration

use riverwatch_core::{Result, RiverwatchError, ServiceConfig};

use crate::ingest::MAX_SAVE_INTERVAL_SECS;
use std::str::FromStr;
use std::time::Duration;

/// Telemetry ingest configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Settings shared with every Riverwatch service
    pub service: ServiceConfig,
    pub mqtt: MqttConfig,
    /// Minimum gap between two durable writes for one device
    pub save_interval_secs: u64,
    /// Readings averaged into a device baseline
    pub baseline_sample_size: usize,
    /// Value sent in the `signal` field of every broadcast
    pub signal_placeholder: f64,
    pub store_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub write_queue_capacity: usize,
    pub max_concurrent_writes: usize,
    pub subscriber_buffer: usize,
    pub aggregation_enabled: bool,
}

/// MQTT broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub topics: Vec<String>,
    pub keep_alive: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub reconnect_max_attempts: u32,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "broker.hivemq.com".to_string(),
            broker_port: 1883,
            client_id: "smart-river-monitoring".to_string(),
            topics: vec!["lora/water_lavel".to_string()],
            keep_alive: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(60),
            reconnect_max_attempts: 5,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                service_name: "telemetry-ingest".to_string(),
                ..ServiceConfig::default()
            },
            mqtt: MqttConfig::default(),
            save_interval_secs: 30,
            baseline_sample_size: 12,
            signal_placeholder: 35.0,
            store_timeout: Duration::from_millis(5000),
            broadcast_timeout: Duration::from_millis(2000),
            write_queue_capacity: 1024,
            max_concurrent_writes: 16,
            subscriber_buffer: 64,
            aggregation_enabled: true,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let mut service = ServiceConfig::from_env()?;
        if std::env::var("SERVICE_NAME").is_err() {
            service.service_name = defaults.service.service_name.clone();
        }

        let mqtt = MqttConfig {
            broker_host: std::env::var("MQTT_BROKER_HOST")
                .unwrap_or(defaults.mqtt.broker_host.clone()),
            broker_port: env_parse("MQTT_BROKER_PORT", defaults.mqtt.broker_port)?,
            client_id: std::env::var("MQTT_CLIENT_ID").unwrap_or(defaults.mqtt.client_id.clone()),
            topics: std::env::var("MQTT_TOPICS")
                .map(|v| parse_topics(&v))
                .unwrap_or(defaults.mqtt.topics.clone()),
            keep_alive: Duration::from_secs(env_parse(
                "MQTT_KEEP_ALIVE_SECS",
                defaults.mqtt.keep_alive.as_secs(),
            )?),
            reconnect_base: Duration::from_secs(env_parse(
                "RECONNECT_BASE_SECS",
                defaults.mqtt.reconnect_base.as_secs(),
            )?),
            reconnect_max: Duration::from_secs(env_parse(
                "RECONNECT_MAX_SECS",
                defaults.mqtt.reconnect_max.as_secs(),
            )?),
            reconnect_max_attempts: env_parse(
                "RECONNECT_MAX_ATTEMPTS",
                defaults.mqtt.reconnect_max_attempts,
            )?,
        };

        let config = Self {
            service,
            mqtt,
            save_interval_secs: env_parse("SAVE_INTERVAL_SECS", defaults.save_interval_secs)?,
            baseline_sample_size: env_parse("BASELINE_SAMPLE_SIZE", defaults.baseline_sample_size)?,
            signal_placeholder: env_parse("SIGNAL_PLACEHOLDER", defaults.signal_placeholder)?,
            store_timeout: Duration::from_millis(env_parse("STORE_TIMEOUT_MS", 5000u64)?),
            broadcast_timeout: Duration::from_millis(env_parse("BROADCAST_TIMEOUT_MS", 2000u64)?),
            write_queue_capacity: env_parse("WRITE_QUEUE_CAPACITY", defaults.write_queue_capacity)?,
            max_concurrent_writes: env_parse(
                "MAX_CONCURRENT_WRITES",
                defaults.max_concurrent_writes,
            )?,
            subscriber_buffer: env_parse("SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?,
            aggregation_enabled: env_parse("AGGREGATION_ENABLED", defaults.aggregation_enabled)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component unusable
    pub fn validate(&self) -> Result<()> {
        if self.baseline_sample_size == 0 {
            return Err(RiverwatchError::Config(
                "BASELINE_SAMPLE_SIZE must be at least 1".to_string(),
            ));
        }
        if self.save_interval_secs == 0 || self.save_interval_secs > MAX_SAVE_INTERVAL_SECS {
            return Err(RiverwatchError::Config(format!(
                "SAVE_INTERVAL_SECS must be between 1 and {}",
                MAX_SAVE_INTERVAL_SECS
            )));
        }
        if self.write_queue_capacity == 0 || self.max_concurrent_writes == 0 {
            return Err(RiverwatchError::Config(
                "WRITE_QUEUE_CAPACITY and MAX_CONCURRENT_WRITES must be at least 1".to_string(),
            ));
        }
        if self.subscriber_buffer == 0 {
            return Err(RiverwatchError::Config(
                "SUBSCRIBER_BUFFER must be at least 1".to_string(),
            ));
        }
        if self.store_timeout.is_zero() || self.broadcast_timeout.is_zero() {
            return Err(RiverwatchError::Config("timeouts must be non-zero".to_string()));
        }
        if self.mqtt.topics.is_empty() {
            return Err(RiverwatchError::Config("MQTT_TOPICS must not be empty".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RiverwatchError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
