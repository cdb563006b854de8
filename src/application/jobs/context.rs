use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use crate::cache::PostCache;

/// Shared context passed to job workers so they can reach the cache tier.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub cache: PostCache,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`] so apalis re-delivers the job.
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
