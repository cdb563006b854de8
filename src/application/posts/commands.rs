use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::{CreatePostParams, UpdatePostParams};
use crate::domain::entities::PostRecord;
use crate::domain::error::validate_title;
use crate::domain::types::{Actor, PostStatus};

use super::service::PostService;
use super::types::{CreatePostCommand, UpdatePostCommand, normalize_tags};

const SOURCE: &str = "application::posts::commands";

fn now_nanos() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

impl PostService {
    #[instrument(skip(self, actor, command), fields(actor = %actor.id))]
    pub async fn create_post(
        &self,
        actor: &Actor,
        command: CreatePostCommand,
    ) -> Result<PostRecord, AppError> {
        validate_title(&command.title)?;

        let params = CreatePostParams {
            id: Uuid::new_v4(),
            title: command.title.trim().to_string(),
            body: command.body,
            author: actor.name.clone(),
            owner_id: actor.id,
            status: command.status.unwrap_or(PostStatus::Published),
            tags: normalize_tags(command.tags),
            score: command.score.unwrap_or_else(now_nanos),
        };

        let post = self
            .source
            .call(|| self.writer.create_post(params))
            .await?;
        info!(
            target = SOURCE,
            post_id = %post.id,
            score = post.score,
            "Post created"
        );

        self.after_write(post.id, Some(post.score)).await;
        Ok(post)
    }

    /// Partial update under the per-post lock, held until the cached copy is
    /// invalidated. Changing the status is reserved to administrators.
    #[instrument(skip(self, actor, command), fields(actor = %actor.id, post_id = %command.id))]
    pub async fn update_post(
        &self,
        actor: &Actor,
        command: UpdatePostCommand,
    ) -> Result<PostRecord, AppError> {
        if command.id.is_nil() {
            return Err(AppError::Invariant(
                "update requires a target post id".to_string(),
            ));
        }
        if command.status.is_some() && !actor.is_admin() {
            return Err(AppError::forbidden(
                "only administrators may change a post's status",
            ));
        }
        if let Some(title) = command.title.as_deref() {
            validate_title(title)?;
        }

        let guard = self.lock.acquire(command.id).await?;
        let result = self.apply_update(command).await;
        if let Ok(post) = &result {
            self.after_write(post.id, Some(post.score)).await;
        }
        if let Err(err) = guard.release().await {
            warn!(
                target = SOURCE,
                error = %err,
                "Failed to release post lock; relying on expiry"
            );
        }
        result
    }

    async fn apply_update(&self, command: UpdatePostCommand) -> Result<PostRecord, AppError> {
        let current = self.load_current(command.id).await?;

        let params = UpdatePostParams {
            id: current.id,
            title: command
                .title
                .map(|title| title.trim().to_string())
                .unwrap_or(current.title),
            body: command.body.unwrap_or(current.body),
            status: command.status.unwrap_or(current.status),
            tags: command.tags.map(normalize_tags).unwrap_or(current.tags),
            score: command.score.unwrap_or(current.score),
        };

        let post = self
            .source
            .call(|| self.writer.update_post(params))
            .await?;
        info!(
            target = SOURCE,
            post_id = %post.id,
            score = post.score,
            "Post updated"
        );
        Ok(post)
    }

    /// Soft delete under the per-post lock, then drop the post from the
    /// popularity index and the cache.
    #[instrument(skip(self), fields(post_id = %id))]
    pub async fn delete_post(&self, id: Uuid) -> Result<(), AppError> {
        let guard = self.lock.acquire(id).await?;
        let result = self.apply_delete(id).await;
        if result.is_ok() {
            self.after_write(id, None).await;
        }
        if let Err(err) = guard.release().await {
            warn!(
                target = SOURCE,
                error = %err,
                "Failed to release post lock; relying on expiry"
            );
        }
        result
    }

    async fn apply_delete(&self, id: Uuid) -> Result<(), AppError> {
        self.load_current(id).await?;
        self.source
            .call(|| self.writer.soft_delete_post(id))
            .await?;
        info!(target = SOURCE, post_id = %id, "Post deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::application::posts::test_support::{Harness, sample_post};
    use crate::cache::keys::post_info_key;
    use crate::cache::{CacheTier, DistributedLock, LockConfig};
    use crate::resilience::RetryPolicy;

    fn create(title: &str, score: Option<i64>) -> CreatePostCommand {
        CreatePostCommand {
            title: title.to_string(),
            body: "body".to_string(),
            status: None,
            tags: Vec::new(),
            score,
        }
    }

    #[tokio::test]
    async fn create_fills_defaults_from_actor() {
        let harness = Harness::new();
        let actor = Actor::member(Uuid::new_v4(), "ada");

        let post = harness
            .service
            .create_post(&actor, create("  Hello  ", None))
            .await
            .expect("created");

        assert_eq!(post.title, "Hello");
        assert_eq!(post.author, "ada");
        assert_eq!(post.owner_id, actor.id);
        assert_eq!(post.tags, vec!["default".to_string()]);
        assert_eq!(post.status, PostStatus::Published);
        assert!(post.score > 0);
    }

    #[tokio::test]
    async fn create_rejects_blank_title_without_io() {
        let harness = Harness::new();
        let actor = Actor::member(Uuid::new_v4(), "ada");

        let err = harness
            .service
            .create_post(&actor, create("   ", Some(1)))
            .await
            .expect_err("blank");
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(harness.store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_indexes_the_new_post() {
        let harness = Harness::new();
        let actor = Actor::member(Uuid::new_v4(), "ada");
        let post = harness
            .service
            .create_post(&actor, create("A", Some(100)))
            .await
            .expect("created");

        let ranked = harness.index.range_by_rank_desc(0, 1).await.expect("range");
        assert_eq!(ranked[0].post_id, post.id);
        assert_eq!(ranked[0].score, 100.0);
    }

    #[tokio::test]
    async fn update_invalidates_cached_copy() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        harness.service.get_post(post.id).await.expect("warm cache");

        let updated = harness
            .service
            .update_post(
                &Actor::member(Uuid::new_v4(), "bob"),
                UpdatePostCommand::new(post.id).with_title("Renamed"),
            )
            .await
            .expect("updated");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.body, post.body);

        let cached = harness
            .tier
            .get(&post_info_key(post.id))
            .await
            .expect("tier up");
        assert!(cached.is_none());
        assert_eq!(
            harness.service.get_post(post.id).await.expect("read").title,
            "Renamed"
        );
    }

    #[tokio::test]
    async fn partial_update_merges_onto_the_stored_row_not_a_stale_cache() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        let actor = Actor::member(Uuid::new_v4(), "bob");
        harness.service.get_post(post.id).await.expect("warm cache");

        harness.tier.fail_next_deletes(4);
        harness
            .service
            .update_post(&actor, UpdatePostCommand::new(post.id).with_title("Renamed"))
            .await
            .expect("renamed");
        assert_eq!(
            harness.service.get_post(post.id).await.expect("cached").title,
            "Sample"
        );

        let rescored = harness
            .service
            .update_post(&actor, UpdatePostCommand::new(post.id).with_score(99))
            .await
            .expect("rescored");
        assert_eq!(rescored.title, "Renamed");
        let stored = harness.store.stored(post.id).expect("row");
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.score, 99);
    }

    #[tokio::test]
    async fn delete_checks_existence_against_the_source() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        harness.service.get_post(post.id).await.expect("warm cache");
        harness.store.fail_next_reads(1);

        let err = harness.service.delete_post(post.id).await.expect_err("read fails");
        assert!(matches!(err, AppError::Repo(_)));
        assert!(!harness.store.stored(post.id).expect("row").deleted);
    }

    #[tokio::test]
    async fn status_change_requires_admin() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        let command = UpdatePostCommand::new(post.id).with_status(PostStatus::Archived);

        let err = harness
            .service
            .update_post(&Actor::member(Uuid::new_v4(), "bob"), command.clone())
            .await
            .expect_err("member");
        assert!(matches!(err, AppError::Forbidden(_)));

        let updated = harness
            .service
            .update_post(&Actor::admin(Uuid::new_v4(), "root"), command)
            .await
            .expect("admin");
        assert_eq!(updated.status, PostStatus::Archived);
    }

    #[tokio::test]
    async fn update_of_missing_post_is_not_found_and_releases_lock() {
        let harness = Harness::new();
        let id = Uuid::new_v4();
        let actor = Actor::member(Uuid::new_v4(), "bob");

        let err = harness
            .service
            .update_post(&actor, UpdatePostCommand::new(id).with_score(5))
            .await
            .expect_err("missing");
        assert!(matches!(err, AppError::NotFound { .. }));

        let probe = DistributedLock::new(harness.tier.clone(), "probe", LockConfig::default());
        assert!(probe.try_acquire(id).await.expect("tier up").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn update_fails_with_contention_when_lock_is_held() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        let other = DistributedLock::new(
            harness.tier.clone(),
            "other-instance",
            LockConfig {
                ttl: Duration::from_secs(60),
                retry: RetryPolicy::immediate(0),
            },
        );
        let _held = other.acquire(post.id).await.expect("held elsewhere");

        let err = harness
            .service
            .update_post(
                &Actor::member(Uuid::new_v4(), "bob"),
                UpdatePostCommand::new(post.id).with_score(1),
            )
            .await
            .expect_err("contended");
        assert!(matches!(err, AppError::LockContention { attempts: 10, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn delete_removes_index_entry_and_hides_post() {
        let harness = Harness::new();
        let actor = Actor::member(Uuid::new_v4(), "ada");
        let post = harness
            .service
            .create_post(&actor, create("A", Some(7)))
            .await
            .expect("created");

        harness.service.delete_post(post.id).await.expect("deleted");

        assert!(
            harness
                .index
                .range_by_rank_desc(0, 10)
                .await
                .expect("range")
                .is_empty()
        );
        let err = harness.service.get_post(post.id).await.expect_err("gone");
        assert!(matches!(err, AppError::NotFound { .. }));

        let again = harness.service.delete_post(post.id).await.expect_err("twice");
        assert!(matches!(again, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn write_failure_surfaces_and_skips_invalidation() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        harness.service.get_post(post.id).await.expect("warm cache");
        harness.store.fail_next_writes(1);

        let err = harness
            .service
            .update_post(
                &Actor::member(Uuid::new_v4(), "bob"),
                UpdatePostCommand::new(post.id).with_score(99),
            )
            .await
            .expect_err("write fails");
        assert!(matches!(err, AppError::Repo(_)));
        assert_eq!(
            harness.service.get_post(post.id).await.expect("cached").score,
            10
        );
    }
}
