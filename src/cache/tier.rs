//! Key-value tier abstraction backing the post cache, ranking index, likes and locks.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::resilience::TripsBreaker;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache tier unavailable: {0}")]
    Unavailable(String),
    #[error("cache value could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache script `{script}` failed: {message}")]
    Script {
        script: &'static str,
        message: String,
    },
}

impl CacheError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn script(script: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Script {
            script,
            message: err.to_string(),
        }
    }
}

impl TripsBreaker for CacheError {
    fn trips_breaker(&self) -> bool {
        !matches!(self, CacheError::Serialization(_))
    }
}

/// Operations the engine needs from a shared cache tier.
///
/// Implementations must make `incr_wrapping`, `set_nx_px` and
/// `delete_if_equals` atomic with respect to other clients.
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`; deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Increment `key`, resetting it to `floor` once the result exceeds `ceiling`.
    async fn incr_wrapping(&self, key: &str, ceiling: i64, floor: i64) -> Result<i64, CacheError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    /// Upsert `(member, score)` pairs into a sorted set.
    async fn zset_add(&self, key: &str, entries: &[(String, f64)]) -> Result<(), CacheError>;

    async fn zset_remove(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// Inclusive rank range, highest score first.
    async fn zset_rev_range_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, CacheError>;

    /// Set `key` only when absent, expiring after `ttl`. Returns whether it was set.
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Delete `key` only while it still holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError>;
}
