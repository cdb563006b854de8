//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::PostStatus;

/// Content record as stored in the source of truth.
///
/// Cached copies are whole-value projections of this struct; they are never
/// authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub author: String,
    pub owner_id: Uuid,
    pub status: PostStatus,
    pub tags: Vec<String>,
    pub score: i64,
    pub view_count: i64,
    pub like_count: i64,
    pub deleted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PostRecord {
    pub fn preview(&self) -> PostPreview {
        PostPreview::from(self)
    }
}

/// Listing projection of [`PostRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPreview {
    pub id: Uuid,
    pub title: String,
    pub excerpt: String,
    pub author: String,
    pub status: PostStatus,
    pub tags: Vec<String>,
    pub score: i64,
    pub view_count: i64,
    pub like_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

pub const PREVIEW_EXCERPT_CHARS: usize = 200;

impl From<&PostRecord> for PostPreview {
    fn from(post: &PostRecord) -> Self {
        Self {
            id: post.id,
            title: post.title.clone(),
            excerpt: excerpt(&post.body),
            author: post.author.clone(),
            status: post.status,
            tags: post.tags.clone(),
            score: post.score,
            view_count: post.view_count,
            like_count: post.like_count,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(PREVIEW_EXCERPT_CHARS).collect()
}

/// A `(post, score)` pair read from the source of truth for index seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreEntry {
    pub post_id: Uuid,
    pub score: i64,
}

/// Kind tag carried by deferred invalidation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationKind {
    /// Delete a `post:post_info:{id}` entry.
    DeletePostInfo,
}

/// Cache deletion that could not complete synchronously.
///
/// Delivery is at-least-once; acting on it is an idempotent delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredInvalidation {
    pub kind: InvalidationKind,
    pub key: String,
}

impl DeferredInvalidation {
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: InvalidationKind::DeletePostInfo,
            key: key.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post(body: &str) -> PostRecord {
        PostRecord {
            id: Uuid::new_v4(),
            title: "Title".into(),
            body: body.into(),
            author: "ada".into(),
            owner_id: Uuid::new_v4(),
            status: PostStatus::Published,
            tags: vec!["default".into()],
            score: 42,
            view_count: 3,
            like_count: 1,
            deleted: false,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn preview_truncates_body_on_char_boundary() {
        let body = "é".repeat(PREVIEW_EXCERPT_CHARS + 10);
        let preview = sample_post(&body).preview();
        assert_eq!(preview.excerpt.chars().count(), PREVIEW_EXCERPT_CHARS);
        assert_eq!(preview.score, 42);
    }

    #[test]
    fn record_survives_json_encoding() {
        let post = sample_post("hello");
        let json = serde_json::to_string(&post).expect("serialize");
        let decoded: PostRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, post);
    }
}
