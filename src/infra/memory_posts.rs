//! In-process source of truth and deferred-invalidation queue.
//!
//! Mirrors the Postgres adapter's observable behaviour (soft deletes hidden
//! from reads, like counter floored at zero) and exposes counters and fault
//! injection for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    CreatePostParams, InvalidationQueue, PostsRepo, PostsWriteRepo, RepoError, UpdatePostParams,
};
use crate::cache::lock::mutex_lock;
use crate::domain::entities::{DeferredInvalidation, PostRecord, ScoreEntry};

const SOURCE: &str = "infra::memory_posts";

#[derive(Debug, Default)]
pub struct MemoryPostStore {
    /// Insertion order doubles as recency order.
    posts: Mutex<Vec<PostRecord>>,
    deferred: Mutex<Vec<DeferredInvalidation>>,
    read_delay_ms: AtomicU64,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    failing_enqueue: AtomicBool,
    pub finds: AtomicU32,
    pub lists: AtomicU32,
    pub score_lists: AtomicU32,
    pub writes: AtomicU32,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing write accounting.
    pub fn insert(&self, post: PostRecord) -> PostRecord {
        mutex_lock(&self.posts, SOURCE, "insert").push(post.clone());
        post
    }

    /// Raw stored record, deleted or not.
    pub fn stored(&self, id: Uuid) -> Option<PostRecord> {
        mutex_lock(&self.posts, SOURCE, "stored")
            .iter()
            .find(|post| post.id == id)
            .cloned()
    }

    pub fn deferred(&self) -> Vec<DeferredInvalidation> {
        mutex_lock(&self.deferred, SOURCE, "deferred").clone()
    }

    /// Every point lookup sleeps for `delay` before answering.
    pub fn set_read_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.read_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn set_enqueue_failing(&self, failing: bool) {
        self.failing_enqueue.store(failing, Ordering::SeqCst);
    }

    fn live_sorted(&self, op: &'static str, by_score: bool) -> Vec<PostRecord> {
        let posts = mutex_lock(&self.posts, SOURCE, op);
        let mut live: Vec<PostRecord> = posts.iter().rev().filter(|p| !p.deleted).cloned().collect();
        if by_score {
            live.sort_by(|a, b| b.score.cmp(&a.score).then(b.id.cmp(&a.id)));
        }
        live
    }

    fn with_live<R>(
        &self,
        op: &'static str,
        id: Uuid,
        f: impl FnOnce(&mut PostRecord) -> R,
    ) -> Result<R, RepoError> {
        let mut posts = mutex_lock(&self.posts, SOURCE, op);
        let post = posts
            .iter_mut()
            .find(|post| post.id == id && !post.deleted)
            .ok_or(RepoError::NotFound)?;
        Ok(f(post))
    }

    fn write_fault(&self) -> Result<(), RepoError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        take_fault(&self.failing_writes, "injected write failure")
    }
}

fn take_fault(counter: &AtomicU32, message: &str) -> Result<(), RepoError> {
    let fault = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok();
    if fault {
        return Err(RepoError::from_persistence(message));
    }
    Ok(())
}

fn page(posts: Vec<PostRecord>, offset: i64, limit: i64) -> Vec<PostRecord> {
    let offset = usize::try_from(offset).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);
    posts.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl PostsRepo for MemoryPostStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        take_fault(&self.failing_reads, "injected read failure")?;

        Ok(mutex_lock(&self.posts, SOURCE, "find_by_id")
            .iter()
            .find(|post| post.id == id && !post.deleted)
            .cloned())
    }

    async fn list_recent(&self, offset: i64, limit: i64) -> Result<Vec<PostRecord>, RepoError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(page(self.live_sorted("list_recent", false), offset, limit))
    }

    async fn list_by_score(&self, offset: i64, limit: i64) -> Result<Vec<PostRecord>, RepoError> {
        self.score_lists.fetch_add(1, Ordering::SeqCst);
        Ok(page(self.live_sorted("list_by_score", true), offset, limit))
    }

    async fn list_scores(&self, limit: Option<i64>) -> Result<Vec<ScoreEntry>, RepoError> {
        let ranked = self.live_sorted("list_scores", true);
        let limit = limit.unwrap_or(i64::MAX);
        Ok(page(ranked, 0, limit)
            .into_iter()
            .map(|post| ScoreEntry {
                post_id: post.id,
                score: post.score,
            })
            .collect())
    }
}

#[async_trait]
impl PostsWriteRepo for MemoryPostStore {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        self.write_fault()?;
        let now = OffsetDateTime::now_utc();
        let mut posts = mutex_lock(&self.posts, SOURCE, "create_post");
        if posts.iter().any(|post| post.id == params.id) {
            return Err(RepoError::Duplicate {
                constraint: "posts_pkey".to_string(),
            });
        }
        let post = PostRecord {
            id: params.id,
            title: params.title,
            body: params.body,
            author: params.author,
            owner_id: params.owner_id,
            status: params.status,
            tags: params.tags,
            score: params.score,
            view_count: 0,
            like_count: 0,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        posts.push(post.clone());
        Ok(post)
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        self.write_fault()?;
        self.with_live("update_post", params.id, |post| {
            post.title = params.title;
            post.body = params.body;
            post.status = params.status;
            post.tags = params.tags;
            post.score = params.score;
            post.updated_at = OffsetDateTime::now_utc();
            post.clone()
        })
    }

    async fn soft_delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        self.write_fault()?;
        self.with_live("soft_delete_post", id, |post| {
            post.deleted = true;
            post.updated_at = OffsetDateTime::now_utc();
        })
    }

    async fn adjust_like_count(&self, id: Uuid, delta: i64) -> Result<PostRecord, RepoError> {
        self.write_fault()?;
        self.with_live("adjust_like_count", id, |post| {
            post.like_count = post.like_count.saturating_add(delta).max(0);
            post.clone()
        })
    }
}

#[async_trait]
impl InvalidationQueue for MemoryPostStore {
    async fn enqueue_invalidation(
        &self,
        message: &DeferredInvalidation,
    ) -> Result<String, RepoError> {
        if self.failing_enqueue.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("invalidation queue unavailable"));
        }
        let mut deferred = mutex_lock(&self.deferred, SOURCE, "enqueue_invalidation");
        deferred.push(message.clone());
        Ok(format!("memory-{}", deferred.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PostStatus;

    fn params(score: i64) -> CreatePostParams {
        CreatePostParams {
            id: Uuid::new_v4(),
            title: "title".into(),
            body: "body".into(),
            author: "ada".into(),
            owner_id: Uuid::new_v4(),
            status: PostStatus::Published,
            tags: vec!["default".into()],
            score,
        }
    }

    #[tokio::test]
    async fn like_count_never_goes_negative() {
        let store = MemoryPostStore::new();
        let post = store.create_post(params(1)).await.expect("created");

        let post = store.adjust_like_count(post.id, -1).await.expect("adjusted");
        assert_eq!(post.like_count, 0);
        let post = store.adjust_like_count(post.id, 1).await.expect("adjusted");
        assert_eq!(post.like_count, 1);
    }

    #[tokio::test]
    async fn deleted_posts_are_hidden_from_reads() {
        let store = MemoryPostStore::new();
        let kept = store.create_post(params(1)).await.expect("created");
        let gone = store.create_post(params(2)).await.expect("created");
        store.soft_delete_post(gone.id).await.expect("deleted");

        assert!(store.find_by_id(gone.id).await.expect("read").is_none());
        let scores = store.list_scores(None).await.expect("scores");
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].post_id, kept.id);
        assert!(matches!(
            store.soft_delete_post(gone.id).await,
            Err(RepoError::NotFound)
        ));
        assert!(store.stored(gone.id).expect("raw row").deleted);
    }

    #[tokio::test]
    async fn score_listing_orders_highest_first() {
        let store = MemoryPostStore::new();
        let low = store.create_post(params(1)).await.expect("created");
        let high = store.create_post(params(9)).await.expect("created");

        let listed = store.list_by_score(0, 10).await.expect("listed");
        assert_eq!(listed[0].id, high.id);
        assert_eq!(listed[1].id, low.id);
        assert_eq!(store.list_scores(Some(1)).await.expect("top").len(), 1);
    }
}
