mod context;
mod invalidation;

pub use context::{JobWorkerContext, job_failed};
pub use invalidation::{
    CacheInvalidationJob, consume_invalidation, process_cache_invalidation_job,
};
