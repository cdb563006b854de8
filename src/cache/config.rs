//! Cache configuration.
//!
//! Controls entry expiry jitter and the ranking warm-up via `postrank.toml`.

use std::time::Duration;

// Default values for cache configuration
const DEFAULT_TTL_MIN_MINUTES: u64 = 10;
const DEFAULT_TTL_SPAN_MINUTES: u64 = 40;
const DEFAULT_COUNTER_CEILING: i64 = 1_000_000;
const DEFAULT_COUNTER_FLOOR: i64 = 1;
const DEFAULT_WARMUP_TOP_K: i64 = 100;
const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30 * 60;

/// Cache-aside entry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Shortest entry lifetime in minutes.
    pub ttl_min_minutes: u64,
    /// Number of distinct minute offsets added on top of the minimum.
    pub ttl_span_minutes: u64,
    /// Counter value above which the jitter counter wraps.
    pub counter_ceiling: i64,
    /// Value the jitter counter wraps to.
    pub counter_floor: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_min_minutes: DEFAULT_TTL_MIN_MINUTES,
            ttl_span_minutes: DEFAULT_TTL_SPAN_MINUTES,
            counter_ceiling: DEFAULT_COUNTER_CEILING,
            counter_floor: DEFAULT_COUNTER_FLOOR,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl_min_minutes: settings.ttl_min_minutes,
            ttl_span_minutes: settings.ttl_span_minutes.get(),
            counter_ceiling: settings.counter_ceiling,
            counter_floor: DEFAULT_COUNTER_FLOOR,
        }
    }
}

impl CacheConfig {
    /// Map a counter value into the TTL window.
    pub fn ttl_for(&self, counter: i64) -> Duration {
        let span = self.ttl_span_minutes.max(1);
        let offset = counter.unsigned_abs() % span;
        Duration::from_secs((self.ttl_min_minutes + offset) * 60)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs((self.ttl_min_minutes + self.ttl_span_minutes.max(1) - 1) * 60)
    }
}

/// Popularity index warm-up and resync settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingConfig {
    /// Records seeded synchronously before serving traffic.
    pub warmup_top_k: i64,
    /// Period of the background full reload.
    pub resync_interval: Duration,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            warmup_top_k: DEFAULT_WARMUP_TOP_K,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
        }
    }
}

impl From<&crate::config::RankingSettings> for RankingConfig {
    fn from(settings: &crate::config::RankingSettings) -> Self {
        Self {
            warmup_top_k: i64::from(settings.warmup_top_k.get()),
            resync_interval: settings.resync_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_min_minutes, 10);
        assert_eq!(config.ttl_span_minutes, 40);
        assert_eq!(config.counter_ceiling, 1_000_000);
        assert_eq!(config.counter_floor, 1);

        let ranking = RankingConfig::default();
        assert_eq!(ranking.warmup_top_k, 100);
        assert_eq!(ranking.resync_interval, Duration::from_secs(1800));
    }

    #[test]
    fn ttl_stays_within_window() {
        let config = CacheConfig::default();
        for counter in [0, 1, 39, 40, 41, 999_999, 1_000_000] {
            let ttl = config.ttl_for(counter);
            assert!(ttl >= Duration::from_secs(10 * 60));
            assert!(ttl <= config.max_ttl());
        }
        assert_eq!(config.ttl_for(41), Duration::from_secs(11 * 60));
        assert_eq!(config.max_ttl(), Duration::from_secs(49 * 60));
    }

    #[test]
    fn zero_span_is_clamped() {
        let config = CacheConfig {
            ttl_span_minutes: 0,
            ..Default::default()
        };
        assert_eq!(config.ttl_for(12345), Duration::from_secs(10 * 60));
    }
}
