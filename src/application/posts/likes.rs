use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::domain::entities::PostRecord;
use crate::domain::types::{Actor, LikeIntent};

use super::service::PostService;

const SOURCE: &str = "application::posts::likes";

impl PostService {
    /// Idempotent like/unlike. Membership in the post's like set gates the
    /// counter change, so repeating an intent leaves the counter untouched.
    ///
    /// The like set and the counter are not updated atomically; a crash in
    /// between leaves them out of step until reprocessed.
    #[instrument(skip(self, actor, post_id, intent), fields(actor = %actor.id, post_id = %post_id, intent = ?intent))]
    pub async fn toggle_like(
        &self,
        actor: &Actor,
        post_id: Uuid,
        intent: LikeIntent,
    ) -> Result<PostRecord, AppError> {
        let guard = self.lock.acquire(post_id).await?;
        let result = self.apply_like(actor.id, post_id, intent).await;
        if let Ok((post, true)) = &result {
            self.after_write(post.id, Some(post.score)).await;
        }
        if let Err(err) = guard.release().await {
            warn!(
                target = SOURCE,
                error = %err,
                "Failed to release post lock; relying on expiry"
            );
        }
        result.map(|(post, _)| post)
    }

    async fn apply_like(
        &self,
        actor_id: Uuid,
        post_id: Uuid,
        intent: LikeIntent,
    ) -> Result<(PostRecord, bool), AppError> {
        let current = self.get_post(post_id).await?;
        let liked = self.likes.contains(post_id, actor_id).await?;

        match (intent, liked) {
            (LikeIntent::Liked, true) | (LikeIntent::Unliked, false) => {
                return Ok((current, false));
            }
            (LikeIntent::Liked, false) => {
                self.likes.add(post_id, actor_id).await?;
            }
            (LikeIntent::Unliked, true) => {
                self.likes.remove(post_id, actor_id).await?;
            }
        }

        let delta = intent.delta();
        match self
            .source
            .call(|| self.writer.adjust_like_count(post_id, delta))
            .await
        {
            Ok(post) => {
                info!(
                    target = SOURCE,
                    post_id = %post_id,
                    like_count = post.like_count,
                    "Like counter adjusted"
                );
                Ok((post, true))
            }
            Err(err) => {
                self.restore_membership(post_id, actor_id, liked).await;
                Err(err.into())
            }
        }
    }

    async fn restore_membership(&self, post_id: Uuid, actor_id: Uuid, liked: bool) {
        let restored = if liked {
            self.likes.add(post_id, actor_id).await
        } else {
            self.likes.remove(post_id, actor_id).await
        };
        if let Err(err) = restored {
            warn!(
                target = SOURCE,
                post_id = %post_id,
                actor_id = %actor_id,
                error = %err,
                "Failed to restore like membership after counter failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::posts::test_support::{Harness, sample_post};

    #[tokio::test]
    async fn liking_twice_counts_once() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        let actor = Actor::member(Uuid::new_v4(), "ada");

        let first = harness
            .service
            .toggle_like(&actor, post.id, LikeIntent::Liked)
            .await
            .expect("liked");
        let second = harness
            .service
            .toggle_like(&actor, post.id, LikeIntent::Liked)
            .await
            .expect("liked again");

        assert_eq!(first.like_count, 1);
        assert_eq!(second.like_count, 1);
        assert_eq!(harness.store.stored(post.id).expect("row").like_count, 1);
    }

    #[tokio::test]
    async fn unliking_never_goes_below_zero() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        let actor = Actor::member(Uuid::new_v4(), "ada");

        for _ in 0..3 {
            let current = harness
                .service
                .toggle_like(&actor, post.id, LikeIntent::Unliked)
                .await
                .expect("unliked");
            assert_eq!(current.like_count, 0);
        }

        harness
            .service
            .toggle_like(&actor, post.id, LikeIntent::Liked)
            .await
            .expect("liked");
        let after = harness
            .service
            .toggle_like(&actor, post.id, LikeIntent::Unliked)
            .await
            .expect("unliked");
        assert_eq!(after.like_count, 0);
    }

    #[tokio::test]
    async fn distinct_actors_each_count() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));

        for name in ["ada", "bob"] {
            harness
                .service
                .toggle_like(&Actor::member(Uuid::new_v4(), name), post.id, LikeIntent::Liked)
                .await
                .expect("liked");
        }
        let read = harness.service.get_post(post.id).await.expect("read");
        assert_eq!(read.like_count, 2);
    }

    #[tokio::test]
    async fn counter_failure_restores_membership() {
        let harness = Harness::new();
        let post = harness.store.insert(sample_post(10));
        let actor = Actor::member(Uuid::new_v4(), "ada");
        harness.store.fail_next_writes(1);

        let err = harness
            .service
            .toggle_like(&actor, post.id, LikeIntent::Liked)
            .await
            .expect_err("counter fails");
        assert!(matches!(err, AppError::Repo(_)));

        let retried = harness
            .service
            .toggle_like(&actor, post.id, LikeIntent::Liked)
            .await
            .expect("liked");
        assert_eq!(retried.like_count, 1);
    }

    #[tokio::test]
    async fn liking_a_missing_post_is_not_found() {
        let harness = Harness::new();
        let err = harness
            .service
            .toggle_like(
                &Actor::member(Uuid::new_v4(), "ada"),
                Uuid::new_v4(),
                LikeIntent::Liked,
            )
            .await
            .expect_err("missing");
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
