//! Postrank cache system
//!
//! Everything that lives in the shared cache tier:
//!
//! - **Post entries**: cache-aside copies of posts with jittered expiry
//! - **Popularity index**: a sorted set of post ids by score, warmed at
//!   startup and resynced periodically
//! - **Like sets**: per-post membership of actors who liked it
//! - **Locks**: short-TTL per-post mutual exclusion
//!
//! Writes never update entries in place; they delete them and let the next
//! read repopulate. Deletes that keep failing are handed to the deferred
//! invalidation queue.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! ttl_min_minutes = 10
//! ttl_span_minutes = 40
//! ```

mod coalesce;
mod config;
mod distributed_lock;
mod invalidation;
pub mod keys;
pub(crate) mod lock;
mod ranking;
mod resync;
mod store;
mod tier;

pub use coalesce::Coalescer;
pub use config::{CacheConfig, RankingConfig};
pub use distributed_lock::{DistributedLock, LockConfig, LockError, LockGuard};
pub use invalidation::{CacheInvalidator, DEFAULT_LOCAL_RETRIES, InvalidationOutcome};
pub use ranking::{IndexError, PopularityIndex, RankedId};
pub use resync::{IndexSeeder, ResyncError, ResyncTask};
pub use store::{LikeSet, PostCache};
pub use tier::{CacheError, CacheTier};
