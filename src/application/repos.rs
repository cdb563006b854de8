//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{DeferredInvalidation, PostRecord, ScoreEntry};
use crate::domain::types::PostStatus;
use crate::resilience::TripsBreaker;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl TripsBreaker for RepoError {
    fn trips_breaker(&self) -> bool {
        matches!(self, RepoError::Persistence(_) | RepoError::Timeout)
    }
}

#[derive(Debug, Clone)]
pub struct CreatePostParams {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub author: String,
    pub owner_id: Uuid,
    pub status: PostStatus,
    pub tags: Vec<String>,
    pub score: i64,
}

/// Full replacement of the mutable fields of a live post.
#[derive(Debug, Clone)]
pub struct UpdatePostParams {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub status: PostStatus,
    pub tags: Vec<String>,
    pub score: i64,
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    /// Live (not soft-deleted) post by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError>;

    /// Live posts, newest first.
    async fn list_recent(&self, offset: i64, limit: i64) -> Result<Vec<PostRecord>, RepoError>;

    /// Live posts, highest score first.
    async fn list_by_score(&self, offset: i64, limit: i64) -> Result<Vec<PostRecord>, RepoError>;

    /// `(id, score)` of live posts, highest score first. `None` returns all.
    async fn list_scores(&self, limit: Option<i64>) -> Result<Vec<ScoreEntry>, RepoError>;
}

#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError>;

    /// Fails with [`RepoError::NotFound`] when the post is missing or deleted.
    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError>;

    async fn soft_delete_post(&self, id: Uuid) -> Result<(), RepoError>;

    /// Add `delta` to the like counter, never going below zero.
    async fn adjust_like_count(&self, id: Uuid, delta: i64) -> Result<PostRecord, RepoError>;
}

/// Durable queue receiving cache deletions that exhausted their local retries.
#[async_trait]
pub trait InvalidationQueue: Send + Sync {
    /// Returns the queue-assigned message id.
    async fn enqueue_invalidation(
        &self,
        message: &DeferredInvalidation,
    ) -> Result<String, RepoError>;
}
