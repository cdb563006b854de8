//! Short-lived mutual exclusion keyed by post id, shared across instances.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::resilience::{Backoff, RetryPolicy};

use super::keys::post_lock_key;
use super::tier::{CacheError, CacheTier};

const SOURCE: &str = "cache::distributed_lock";

const DEFAULT_TTL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    pub ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            retry: RetryPolicy::new(
                DEFAULT_MAX_ATTEMPTS,
                Backoff::Exponential {
                    base: DEFAULT_BASE_DELAY,
                    max: DEFAULT_MAX_DELAY,
                },
            ),
        }
    }
}

impl From<&crate::config::LockSettings> for LockConfig {
    fn from(settings: &crate::config::LockSettings) -> Self {
        Self {
            ttl: settings.ttl,
            retry: RetryPolicy::new(
                settings.max_attempts.get(),
                Backoff::from_kind(settings.backoff, settings.base_delay, settings.max_delay),
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock `{key}` still busy after {attempts} attempts")]
    Contention { key: String, attempts: u32 },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Acquires per-resource locks as `SET NX PX`. Each acquisition writes its
/// own token, prefixed with the instance holder, so a guard whose lock
/// expired cannot release a successor's lock.
#[derive(Clone)]
pub struct DistributedLock {
    tier: Arc<dyn CacheTier>,
    holder: String,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new(tier: Arc<dyn CacheTier>, holder: impl Into<String>, config: LockConfig) -> Self {
        Self {
            tier,
            holder: holder.into(),
            config,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Single acquisition attempt.
    pub async fn try_acquire(&self, post_id: Uuid) -> Result<Option<LockGuard>, CacheError> {
        let key = post_lock_key(post_id);
        let token = format!("{}:{}", self.holder, Uuid::new_v4());
        let acquired = self.tier.set_nx_px(&key, &token, self.config.ttl).await?;
        Ok(acquired.then(|| LockGuard {
            tier: Arc::clone(&self.tier),
            key,
            token,
            released: false,
        }))
    }

    /// Acquire with bounded retries, failing with [`LockError::Contention`]
    /// once the retry budget is spent. Tier errors abort immediately.
    pub async fn acquire(&self, post_id: Uuid) -> Result<LockGuard, LockError> {
        let policy = self.config.retry;
        for attempt in 1..=policy.max_attempts() {
            if let Some(guard) = self.try_acquire(post_id).await? {
                debug!(
                    target = SOURCE,
                    post_id = %post_id,
                    attempt,
                    "Acquired post lock"
                );
                return Ok(guard);
            }
            counter!("postrank_lock_contention_total").increment(1);
            if attempt < policy.max_attempts() {
                tokio::time::sleep(policy.backoff().delay(attempt)).await;
            }
        }

        let key = post_lock_key(post_id);
        warn!(
            target = SOURCE,
            key = %key,
            attempts = policy.max_attempts(),
            "Lock acquisition exhausted retries"
        );
        Err(LockError::Contention {
            key,
            attempts: policy.max_attempts(),
        })
    }
}

/// Held lock. Release explicitly with [`LockGuard::release`]; dropping the
/// guard schedules a release on the current runtime, and the TTL covers
/// everything else.
pub struct LockGuard {
    tier: Arc<dyn CacheTier>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Delete the lock record if this acquisition still owns it.
    pub async fn release(mut self) -> Result<bool, CacheError> {
        self.released = true;
        self.tier.delete_if_equals(&self.key, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                target = SOURCE,
                key = %self.key,
                "No runtime to release dropped lock; relying on expiry"
            );
            return;
        };
        let tier = Arc::clone(&self.tier);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(err) = tier.delete_if_equals(&key, &token).await {
                warn!(
                    target = SOURCE,
                    key = %key,
                    error = %err,
                    "Failed to release dropped lock; relying on expiry"
                );
            }
        });
    }
}
