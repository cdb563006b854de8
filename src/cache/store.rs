//! Cache-aside storage for post records and like membership.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::entities::PostRecord;

use super::config::CacheConfig;
use super::keys::{TTL_COUNTER_KEY, post_info_key, post_like_key};
use super::tier::{CacheError, CacheTier};

const SOURCE: &str = "cache::store";

/// Serialized [`PostRecord`] entries with jittered expiry.
#[derive(Clone)]
pub struct PostCache {
    tier: Arc<dyn CacheTier>,
    config: CacheConfig,
}

impl PostCache {
    pub fn new(tier: Arc<dyn CacheTier>, config: CacheConfig) -> Self {
        Self { tier, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached copy of a post. Tier failures and undecodable entries read as a miss.
    pub async fn get(&self, id: Uuid) -> Option<PostRecord> {
        let key = post_info_key(id);
        let raw = match self.tier.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                counter!("postrank_cache_miss_total").increment(1);
                return None;
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    post_id = %id,
                    error = %err,
                    "Cache read failed; treating as miss"
                );
                counter!("postrank_cache_miss_total").increment(1);
                return None;
            }
        };

        match serde_json::from_str::<PostRecord>(&raw) {
            Ok(post) => {
                counter!("postrank_cache_hit_total").increment(1);
                Some(post)
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    post_id = %id,
                    error = %err,
                    "Discarding undecodable cache entry"
                );
                counter!("postrank_cache_miss_total").increment(1);
                None
            }
        }
    }

    /// Store a whole-value copy of `post`. Without `ttl`, one is drawn from the
    /// shared rotating counter.
    pub async fn set(&self, post: &PostRecord, ttl: Option<Duration>) -> Result<(), CacheError> {
        let ttl = match ttl {
            Some(ttl) => ttl,
            None => self.next_ttl().await?,
        };
        let payload = serde_json::to_string(post)?;
        self.tier
            .set_ex(&post_info_key(post.id), &payload, ttl)
            .await?;
        debug!(
            target = SOURCE,
            post_id = %post.id,
            ttl_secs = ttl.as_secs(),
            "Cached post"
        );
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), CacheError> {
        self.delete_key(&post_info_key(id)).await
    }

    /// Delete a raw entry key, as carried by deferred invalidation messages.
    pub async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        self.tier.delete(key).await
    }

    async fn next_ttl(&self) -> Result<Duration, CacheError> {
        let counter = self
            .tier
            .incr_wrapping(
                TTL_COUNTER_KEY,
                self.config.counter_ceiling,
                self.config.counter_floor,
            )
            .await?;
        Ok(self.config.ttl_for(counter))
    }
}

/// Per-post set of actors who liked it.
#[derive(Clone)]
pub struct LikeSet {
    tier: Arc<dyn CacheTier>,
}

impl LikeSet {
    pub fn new(tier: Arc<dyn CacheTier>) -> Self {
        Self { tier }
    }

    pub async fn contains(&self, post_id: Uuid, actor_id: Uuid) -> Result<bool, CacheError> {
        self.tier
            .set_contains(&post_like_key(post_id), &actor_id.to_string())
            .await
    }

    pub async fn add(&self, post_id: Uuid, actor_id: Uuid) -> Result<bool, CacheError> {
        self.tier
            .set_add(&post_like_key(post_id), &actor_id.to_string())
            .await
    }

    pub async fn remove(&self, post_id: Uuid, actor_id: Uuid) -> Result<bool, CacheError> {
        self.tier
            .set_remove(&post_like_key(post_id), &actor_id.to_string())
            .await
    }
}
