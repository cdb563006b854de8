use apalis::prelude::{Data, Error as ApalisError};
use metrics::counter;
use tracing::{info, warn};

use crate::cache::keys::parse_post_info_key;
use crate::cache::{CacheError, PostCache};
use crate::domain::entities::{DeferredInvalidation, InvalidationKind};

use super::context::{JobWorkerContext, job_failed};

const SOURCE: &str = "application::jobs::invalidation";

/// Payload of a deferred invalidation job, stored as JSON by apalis.
pub type CacheInvalidationJob = DeferredInvalidation;

/// Act on one deferred message. Deleting an absent key succeeds, so
/// redelivered messages are harmless.
pub async fn consume_invalidation(
    cache: &PostCache,
    message: &DeferredInvalidation,
) -> Result<(), CacheError> {
    match message.kind {
        InvalidationKind::DeletePostInfo => {
            if parse_post_info_key(&message.key).is_none() {
                warn!(
                    target = SOURCE,
                    key = %message.key,
                    "Deferred invalidation carries an unexpected key shape; deleting anyway"
                );
            }
            cache.delete_key(&message.key).await?;
        }
    }
    counter!("postrank_invalidation_consumed_total").increment(1);
    info!(target = SOURCE, key = %message.key, "Deferred invalidation applied");
    Ok(())
}

/// apalis handler for the deferred invalidation worker. A failed delete
/// fails the job so it is re-delivered until its attempts run out.
pub async fn process_cache_invalidation_job(
    job: CacheInvalidationJob,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    consume_invalidation(&context.cache, &job)
        .await
        .map_err(|err| {
            warn!(
                target = SOURCE,
                key = %job.key,
                error = %err,
                "Deferred invalidation failed; leaving job for redelivery"
            );
            job_failed(err)
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::cache::CacheConfig;
    use crate::cache::keys::post_info_key;
    use crate::domain::entities::PostRecord;
    use crate::domain::types::PostStatus;
    use crate::infra::memory::MemoryCacheTier;

    fn post() -> PostRecord {
        let now = OffsetDateTime::now_utc();
        PostRecord {
            id: Uuid::new_v4(),
            title: "stale".into(),
            body: "body".into(),
            author: "ada".into(),
            owner_id: Uuid::new_v4(),
            status: PostStatus::Published,
            tags: vec!["default".into()],
            score: 1,
            view_count: 0,
            like_count: 0,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn consuming_deletes_the_cached_entry() {
        let tier = Arc::new(MemoryCacheTier::new());
        let cache = PostCache::new(tier, CacheConfig::default());
        let post = post();
        cache
            .set(&post, Some(Duration::from_secs(60)))
            .await
            .expect("cached");

        let message = DeferredInvalidation::delete(post_info_key(post.id));
        consume_invalidation(&cache, &message).await.expect("consumed");
        assert!(cache.get(post.id).await.is_none());

        consume_invalidation(&cache, &message)
            .await
            .expect("redelivery is harmless");
    }

    #[tokio::test]
    async fn tier_failure_fails_the_job() {
        let tier = Arc::new(MemoryCacheTier::new());
        tier.set_available(false);
        let context = JobWorkerContext {
            cache: PostCache::new(tier, CacheConfig::default()),
        };

        let result = process_cache_invalidation_job(
            DeferredInvalidation::delete(post_info_key(Uuid::new_v4())),
            Data::new(context),
        )
        .await;
        assert!(matches!(result, Err(ApalisError::Failed(_))));
    }
}
