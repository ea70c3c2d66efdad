//! Reconnection backoff

use std::time::Duration;

use crate::config::MqttConfig;

/// Capped exponential backoff with a bounded number of attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MqttConfig) -> Self {
        Self {
            base_delay: config.reconnect_base,
            max_delay: config.reconnect_max,
            max_attempts: config.reconnect_max_attempts,
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay before attempt `attempt` (1-based), or `None` once exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .filter_map(|n| policy.delay_for(n))
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60]);
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = ReconnectPolicy::new().with_max_attempts(100);
        assert_eq!(policy.delay_for(64), Some(Duration::from_secs(60)));
    }
}
