use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{InvalidationQueue, RepoError};
use crate::domain::entities::DeferredInvalidation;

use super::{PostgresRepositories, map_sqlx_error};

/// apalis job type the invalidation worker consumes.
pub const INVALIDATION_NAMESPACE: &str = "postrank::cache-invalidation";

pub(super) const DEFAULT_MAX_ATTEMPTS: i32 = 10;

/// Invalidations jump ahead of any other work sharing the table.
const INVALIDATION_PRIORITY: i32 = 10;

#[async_trait]
impl InvalidationQueue for PostgresRepositories {
    async fn enqueue_invalidation(
        &self,
        message: &DeferredInvalidation,
    ) -> Result<String, RepoError> {
        let payload = serde_json::to_value(message).map_err(RepoError::from_persistence)?;
        let id: String = sqlx::query_scalar(
            "SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id",
        )
        .bind(INVALIDATION_NAMESPACE)
        .bind(payload)
        .bind("Pending")
        .bind(OffsetDateTime::now_utc())
        .bind(self.invalidation_max_attempts)
        .bind(INVALIDATION_PRIORITY)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(id)
    }
}
