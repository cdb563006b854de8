use uuid::Uuid;

use crate::domain::types::PostStatus;

pub const DEFAULT_TAG: &str = "default";

#[derive(Debug, Clone)]
pub struct CreatePostCommand {
    pub title: String,
    pub body: String,
    /// Defaults to [`PostStatus::Published`].
    pub status: Option<PostStatus>,
    /// Defaults to `["default"]` when empty.
    pub tags: Vec<String>,
    /// Defaults to the creation instant in nanoseconds since the epoch.
    pub score: Option<i64>,
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct UpdatePostCommand {
    pub id: Uuid,
    pub title: Option<String>,
    pub body: Option<String>,
    pub status: Option<PostStatus>,
    pub tags: Option<Vec<String>>,
    pub score: Option<i64>,
}

impl UpdatePostCommand {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_status(mut self, status: PostStatus) -> Self {
        self.status = Some(status);
        self
    }
}

pub(crate) fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !normalized.iter().any(|existing| existing == tag) {
            normalized.push(tag.to_string());
        }
    }
    if normalized.is_empty() {
        normalized.push(DEFAULT_TAG.to_string());
    }
    normalized
}
