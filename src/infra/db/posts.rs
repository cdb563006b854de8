use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    CreatePostParams, PostsRepo, PostsWriteRepo, RepoError, UpdatePostParams,
};
use crate::domain::entities::{PostRecord, ScoreEntry};
use crate::domain::types::PostStatus;

use super::{PostgresRepositories, map_sqlx_error};

const POST_COLUMNS: &str = "id, title, body, author, owner_id, status, tags, score, \
    view_count, like_count, deleted, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    title: String,
    body: String,
    author: String,
    owner_id: Uuid,
    status: PostStatus,
    tags: Vec<String>,
    score: i64,
    view_count: i64,
    like_count: i64,
    deleted: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            body: row.body,
            author: row.author,
            owner_id: row.owner_id,
            status: row.status,
            tags: row.tags,
            score: row.score,
            view_count: row.view_count,
            like_count: row.like_count,
            deleted: row.deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ScoreRow {
    id: Uuid,
    score: i64,
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1 AND NOT deleted");
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(PostRecord::from))
    }

    async fn list_recent(&self, offset: i64, limit: i64) -> Result<Vec<PostRecord>, RepoError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE NOT deleted \
             ORDER BY created_at DESC, id DESC OFFSET $1 LIMIT $2"
        );
        let rows = sqlx::query_as::<_, PostRow>(&sql)
            .bind(offset)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(PostRecord::from).collect())
    }

    async fn list_by_score(&self, offset: i64, limit: i64) -> Result<Vec<PostRecord>, RepoError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE NOT deleted \
             ORDER BY score DESC, id DESC OFFSET $1 LIMIT $2"
        );
        let rows = sqlx::query_as::<_, PostRow>(&sql)
            .bind(offset)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(PostRecord::from).collect())
    }

    async fn list_scores(&self, limit: Option<i64>) -> Result<Vec<ScoreEntry>, RepoError> {
        // LIMIT NULL means no limit in Postgres.
        let rows = sqlx::query_as::<_, ScoreRow>(
            "SELECT id, score FROM posts WHERE NOT deleted ORDER BY score DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows
            .into_iter()
            .map(|row| ScoreEntry {
                post_id: row.id,
                score: row.score,
            })
            .collect())
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "INSERT INTO posts (id, title, body, author, owner_id, status, tags, score) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(params.id)
            .bind(params.title)
            .bind(params.body)
            .bind(params.author)
            .bind(params.owner_id)
            .bind(params.status)
            .bind(params.tags)
            .bind(params.score)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "UPDATE posts SET title = $2, body = $3, status = $4, tags = $5, score = $6, \
             updated_at = now() WHERE id = $1 AND NOT deleted RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(params.id)
            .bind(params.title)
            .bind(params.body)
            .bind(params.status)
            .bind(params.tags)
            .bind(params.score)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(PostRecord::from).ok_or(RepoError::NotFound)
    }

    async fn soft_delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE posts SET deleted = TRUE, updated_at = now() WHERE id = $1 AND NOT deleted",
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn adjust_like_count(&self, id: Uuid, delta: i64) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "UPDATE posts SET like_count = GREATEST(like_count + $2, 0), updated_at = now() \
             WHERE id = $1 AND NOT deleted RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .bind(delta)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(PostRecord::from).ok_or(RepoError::NotFound)
    }
}
