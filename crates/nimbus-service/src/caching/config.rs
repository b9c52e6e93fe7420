use std::time::Duration;

use serde::Deserialize;

/// Expiration settings of a single [`CoalescingStore`](super::CoalescingStore).
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Time-to-live of entries which are stored without an explicit TTL.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// How often expired entries are purged in the background.
    ///
    /// Expiry is always checked on read, so this only bounds how long unused entries linger.
    /// When unset, a fifth of the `default_ttl` is used. `0s` disables the sweeper.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
}

impl StoreConfig {
    /// Creates a config with the given TTL and the default sweep interval.
    pub fn with_ttl(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            sweep_interval: None,
        }
    }

    /// The interval the sweeper should run at, or `None` if it is disabled.
    pub fn effective_sweep_interval(&self) -> Option<Duration> {
        let interval = self.sweep_interval.unwrap_or(self.default_ttl / 5);
        (!interval.is_zero()).then_some(interval)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(60))
    }
}
