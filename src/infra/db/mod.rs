//! Postgres-backed repository implementations.

mod jobs;
mod posts;
mod util;

pub use jobs::INVALIDATION_NAMESPACE;
pub use util::map_sqlx_error;

use std::sync::Arc;

use apalis_sql::postgres::PostgresStorage;
use sqlx::{
    query,
    postgres::{PgPool, PgPoolOptions},
};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    invalidation_max_attempts: i32,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            invalidation_max_attempts: jobs::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Attempts the queue grants each deferred invalidation before giving up.
    pub fn with_invalidation_max_attempts(mut self, max_attempts: i32) -> Self {
        self.invalidation_max_attempts = max_attempts.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    /// Apply the post schema and the apalis job tables. Both migrators share
    /// `_sqlx_migrations`, so each ignores versions owned by the other.
    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut schema = sqlx::migrate!("./migrations");
        schema.set_ignore_missing(true);
        schema.run(pool).await?;

        let mut queue = PostgresStorage::<()>::migrations();
        queue.set_ignore_missing(true);
        queue.run(pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
