use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::{PostsRepo, PostsWriteRepo, RepoError};
use crate::cache::{
    CacheInvalidator, Coalescer, DistributedLock, InvalidationOutcome, LikeSet, PopularityIndex,
    PostCache,
};
use crate::domain::entities::PostRecord;
use crate::resilience::{Backoff, BreakerError, CircuitBreaker, RetryPolicy};

const SOURCE: &str = "application::posts";

/// Attempts made by the read path against the source of truth.
pub const READ_ATTEMPTS: u32 = 3;

type SourceError = BreakerError<RepoError>;
type SharedLoad = Result<Option<PostRecord>, Arc<SourceError>>;

/// Collaborators of [`PostService`], all constructed once at startup.
#[derive(Clone)]
pub struct PostServiceParts {
    pub reader: Arc<dyn PostsRepo>,
    pub writer: Arc<dyn PostsWriteRepo>,
    pub cache: PostCache,
    pub likes: LikeSet,
    pub index: PopularityIndex,
    pub invalidator: CacheInvalidator,
    pub lock: DistributedLock,
    /// Guards every statement against the source of truth.
    pub source: Arc<CircuitBreaker>,
}

/// Post reads, writes, listings and likes with cache-aside consistency.
#[derive(Clone)]
pub struct PostService {
    pub(crate) reader: Arc<dyn PostsRepo>,
    pub(crate) writer: Arc<dyn PostsWriteRepo>,
    pub(crate) cache: PostCache,
    pub(crate) likes: LikeSet,
    pub(crate) index: PopularityIndex,
    pub(crate) invalidator: CacheInvalidator,
    pub(crate) lock: DistributedLock,
    pub(crate) source: Arc<CircuitBreaker>,
    reads: Arc<Coalescer<Uuid, SharedLoad>>,
    read_retry: RetryPolicy,
}

impl PostService {
    pub fn new(parts: PostServiceParts) -> Self {
        let PostServiceParts {
            reader,
            writer,
            cache,
            likes,
            index,
            invalidator,
            lock,
            source,
        } = parts;
        Self {
            reader,
            writer,
            cache,
            likes,
            index,
            invalidator,
            lock,
            source,
            reads: Arc::new(Coalescer::new()),
            read_retry: RetryPolicy::new(READ_ATTEMPTS, Backoff::None),
        }
    }

    pub fn source_breaker(&self) -> &CircuitBreaker {
        &self.source
    }

    /// Cache-aside read. Concurrent misses for one id share a single
    /// database read, which also repopulates the cache.
    #[instrument(skip(self), fields(post_id = %id))]
    pub async fn get_post(&self, id: Uuid) -> Result<PostRecord, AppError> {
        if let Some(post) = self.cache.get(id).await {
            if post.deleted {
                return Err(AppError::NotFound { entity: "post" });
            }
            return Ok(post);
        }

        match self.reads.do_once(id, || self.load_and_fill(id)).await {
            Ok(Some(post)) => Ok(post),
            Ok(None) => Err(AppError::NotFound { entity: "post" }),
            Err(err) => Err(shared_source_error(&err)),
        }
    }

    /// Current row straight from the database, bypassing the cache. Used by
    /// read-modify-write paths, which must not merge onto a stale copy.
    pub(crate) async fn load_current(&self, id: Uuid) -> Result<PostRecord, AppError> {
        self.source
            .call(|| self.reader.find_by_id(id))
            .await?
            .ok_or(AppError::NotFound { entity: "post" })
    }

    async fn load_and_fill(&self, id: Uuid) -> SharedLoad {
        let found = self
            .read_retry
            .run_when(
                || self.source.call(|| self.reader.find_by_id(id)),
                |err: &SourceError| !err.is_rejection(),
                |attempt, err: &SourceError| {
                    warn!(
                        target = SOURCE,
                        post_id = %id,
                        attempt,
                        error = %err,
                        "Post lookup failed"
                    );
                },
            )
            .await
            .map_err(|exhausted| Arc::new(exhausted.last_error))?;

        if let Some(post) = found.as_ref()
            && let Err(err) = self.cache.set(post, None).await
        {
            warn!(
                target = SOURCE,
                post_id = %id,
                error = %err,
                "Failed to populate post cache"
            );
        }
        Ok(found)
    }

    /// Index update and cache invalidation that follow every successful write.
    /// Neither step fails the write.
    pub(crate) async fn after_write(&self, post_id: Uuid, score: Option<i64>) {
        let indexed = match score {
            Some(score) => self.index.add_or_update(post_id, score).await,
            None => self.index.remove(post_id).await,
        };
        if let Err(err) = indexed {
            warn!(
                target = SOURCE,
                post_id = %post_id,
                error = %err,
                "Popularity index update failed; next resync repairs it"
            );
        }

        match self.invalidator.invalidate(post_id).await {
            InvalidationOutcome::Deleted { attempts } => {
                debug!(target = SOURCE, post_id = %post_id, attempts, "Post cache invalidated");
            }
            InvalidationOutcome::Deferred { message_id } => {
                debug!(
                    target = SOURCE,
                    post_id = %post_id,
                    message_id = %message_id,
                    "Post cache invalidation deferred"
                );
            }
            InvalidationOutcome::Lost => {}
        }
    }
}

/// Rebuild an owned error from the copy shared among coalesced readers.
fn shared_source_error(err: &SourceError) -> AppError {
    match err {
        BreakerError::Open(breaker) | BreakerError::TooManyRequests(breaker) => {
            AppError::Degraded { breaker }
        }
        BreakerError::Inner(RepoError::NotFound) => AppError::NotFound { entity: "post" },
        BreakerError::Inner(RepoError::Timeout) => AppError::Repo(RepoError::Timeout),
        BreakerError::Inner(inner) => AppError::Repo(RepoError::from_persistence(inner)),
    }
}
