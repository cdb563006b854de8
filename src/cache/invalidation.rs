//! Write-then-delete invalidation with local retries and a durable fallback.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::repos::InvalidationQueue;
use crate::domain::entities::DeferredInvalidation;
use crate::resilience::{BreakerError, CircuitBreaker, RetryPolicy};

use super::keys::post_info_key;
use super::store::PostCache;
use super::tier::CacheError;

const SOURCE: &str = "cache::invalidation";

pub const DEFAULT_LOCAL_RETRIES: u32 = 3;

/// What happened to a cache entry after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// Entry deleted after `attempts` tries.
    Deleted { attempts: u32 },
    /// Local retries exhausted; a deferred message was queued.
    Deferred { message_id: String },
    /// Neither the delete nor the enqueue succeeded. The entry expires on its TTL.
    Lost,
}

#[derive(Clone)]
pub struct CacheInvalidator {
    cache: PostCache,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    queue: Arc<dyn InvalidationQueue>,
}

impl CacheInvalidator {
    pub fn new(
        cache: PostCache,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        queue: Arc<dyn InvalidationQueue>,
    ) -> Self {
        Self {
            cache,
            breaker,
            retry,
            queue,
        }
    }

    /// Delete the cached copy of `post_id`. Never fails the caller: the
    /// source of truth is already correct, so failures degrade to staleness.
    pub async fn invalidate(&self, post_id: Uuid) -> InvalidationOutcome {
        let key = post_info_key(post_id);
        let mut failures = 0;
        let result = self
            .retry
            .run(
                || self.breaker.call(|| self.cache.delete(post_id)),
                |attempt, err: &BreakerError<CacheError>| {
                    failures = attempt;
                    warn!(
                        target = SOURCE,
                        post_id = %post_id,
                        attempt,
                        error = %err,
                        "Cache delete after write failed"
                    );
                },
            )
            .await;

        match result {
            Ok(()) => {
                debug!(target = SOURCE, post_id = %post_id, "Invalidated cached post");
                InvalidationOutcome::Deleted {
                    attempts: failures + 1,
                }
            }
            Err(exhausted) => {
                let message = DeferredInvalidation::delete(key.clone());
                match self.queue.enqueue_invalidation(&message).await {
                    Ok(message_id) => {
                        counter!("postrank_invalidation_deferred_total").increment(1);
                        error!(
                            target = SOURCE,
                            post_id = %post_id,
                            key = %key,
                            attempts = exhausted.attempts,
                            message_id = %message_id,
                            error = %exhausted.last_error,
                            "Cache delete retries exhausted; deferred to invalidation queue"
                        );
                        InvalidationOutcome::Deferred { message_id }
                    }
                    Err(err) => {
                        counter!("postrank_invalidation_lost_total").increment(1);
                        error!(
                            target = SOURCE,
                            post_id = %post_id,
                            key = %key,
                            error = %err,
                            "Failed to enqueue deferred invalidation; entry stays until expiry"
                        );
                        InvalidationOutcome::Lost
                    }
                }
            }
        }
    }
}
