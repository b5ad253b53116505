//! Configuration for the order fulfillment engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the engine services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval for polling paid orders awaiting delegation
    pub poll_interval: Duration,

    /// Interval between usage-monitor cycles
    pub monitor_interval: Duration,

    /// Interval between fee-scheduler clock checks
    pub fee_tick_interval: Duration,

    /// Hour of day (UTC) after which the daily fee run happens
    pub fee_check_hour: u32,

    /// Flat daily fee for package orders, in SUN
    pub daily_fee_sun: i64,

    /// Days after activation during which no fee or expiry applies
    pub grace_period_days: i64,

    /// Days without observed usage after which an order is auto-expired
    pub inactivity_threshold_days: i64,

    /// Minimum consumed energy for a transaction to count as usage
    pub usage_threshold: i64,

    /// Maximum number of attempts for chain write operations
    pub max_retries: u32,

    /// Initial backoff duration for retries
    pub initial_backoff: Duration,

    /// Maximum backoff duration for retries
    pub max_backoff: Duration,

    /// Maximum number of orders evaluated concurrently by the monitor
    pub max_concurrent_ops: usize,

    /// Upper bound on batch delegation size
    pub batch_max: usize,

    /// Waiting period before unfrozen funds become withdrawable
    pub unfreeze_wait_days: i64,

    /// How many transactions to page per usage scan
    pub usage_scan_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(30),
            fee_tick_interval: Duration::from_secs(60),
            fee_check_hour: 0,
            daily_fee_sun: 1_000_000,
            grace_period_days: 1,
            inactivity_threshold_days: 7,
            usage_threshold: 1,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_concurrent_ops: 10,
            batch_max: 50,
            unfreeze_wait_days: 14,
            usage_scan_limit: 50,
        }
    }
}

/// Builder for EngineConfig
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.config.monitor_interval = interval;
        self
    }

    pub fn fee_tick_interval(mut self, interval: Duration) -> Self {
        self.config.fee_tick_interval = interval;
        self
    }

    pub fn fee_check_hour(mut self, hour: u32) -> Self {
        self.config.fee_check_hour = hour;
        self
    }

    pub fn daily_fee_sun(mut self, fee: i64) -> Self {
        self.config.daily_fee_sun = fee;
        self
    }

    pub fn grace_period_days(mut self, days: i64) -> Self {
        self.config.grace_period_days = days;
        self
    }

    pub fn inactivity_threshold_days(mut self, days: i64) -> Self {
        self.config.inactivity_threshold_days = days;
        self
    }

    pub fn usage_threshold(mut self, threshold: i64) -> Self {
        self.config.usage_threshold = threshold;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.max_backoff = backoff;
        self
    }

    pub fn max_concurrent_ops(mut self, max_ops: usize) -> Self {
        self.config.max_concurrent_ops = max_ops;
        self
    }

    pub fn batch_max(mut self, max: usize) -> Self {
        self.config.batch_max = max;
        self
    }

    pub fn unfreeze_wait_days(mut self, days: i64) -> Self {
        self.config.unfreeze_wait_days = days;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.batch_max, 50);
        assert_eq!(config.unfreeze_wait_days, 14);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfigBuilder::new()
            .poll_interval(Duration::from_secs(10))
            .max_retries(5)
            .daily_fee_sun(2_000_000)
            .build();

        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.daily_fee_sun, 2_000_000);
    }
}
