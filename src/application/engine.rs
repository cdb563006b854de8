//! Startup wiring shared by the binary and the end-to-end tests.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::jobs::JobWorkerContext;
use crate::application::posts::{PostService, PostServiceParts};
use crate::application::repos::{InvalidationQueue, PostsRepo, PostsWriteRepo};
use crate::cache::{
    CacheConfig, CacheInvalidator, CacheTier, DEFAULT_LOCAL_RETRIES, DistributedLock, IndexSeeder,
    LikeSet, LockConfig, PopularityIndex, PostCache, RankingConfig,
};
use crate::config::Settings;
use crate::resilience::{BreakerConfig, CircuitBreaker, RetryPolicy};

/// Name of the breaker guarding database statements.
pub const SOURCE_BREAKER: &str = "source";
/// Name of the breaker guarding cache deletes and popularity index commands.
pub const CACHE_BREAKER: &str = "cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub lock: LockConfig,
    pub ranking: RankingConfig,
    /// Cache delete retries after the first attempt, before deferring.
    pub local_retries: u32,
    /// Owner token written into lock values.
    pub holder: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            lock: LockConfig::default(),
            ranking: RankingConfig::default(),
            local_retries: DEFAULT_LOCAL_RETRIES,
            holder: instance_holder(),
        }
    }
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            cache: CacheConfig::from(&settings.cache),
            breaker: BreakerConfig::from(&settings.breaker),
            lock: LockConfig::from(&settings.lock),
            ranking: RankingConfig::from(&settings.ranking),
            local_retries: settings.invalidation.local_retries,
            holder: instance_holder(),
        }
    }
}

fn instance_holder() -> String {
    format!("postrank-{}", Uuid::new_v4())
}

/// External systems the engine runs against.
#[derive(Clone)]
pub struct Backends {
    pub tier: Arc<dyn CacheTier>,
    pub reader: Arc<dyn PostsRepo>,
    pub writer: Arc<dyn PostsWriteRepo>,
    pub queue: Arc<dyn InvalidationQueue>,
}

/// Fully wired components. Clones share breakers and the read coalescer.
#[derive(Clone)]
pub struct Engine {
    pub posts: PostService,
    pub seeder: Arc<IndexSeeder>,
    pub index: PopularityIndex,
    pub cache: PostCache,
    pub source_breaker: Arc<CircuitBreaker>,
    pub cache_breaker: Arc<CircuitBreaker>,
}

impl Engine {
    pub fn new(backends: Backends, config: EngineConfig) -> Self {
        let Backends {
            tier,
            reader,
            writer,
            queue,
        } = backends;

        let source_breaker = Arc::new(CircuitBreaker::new(SOURCE_BREAKER, config.breaker));
        let cache_breaker = Arc::new(CircuitBreaker::new(CACHE_BREAKER, config.breaker));

        let cache = PostCache::new(tier.clone(), config.cache);
        let index = PopularityIndex::new(tier.clone(), cache_breaker.clone());
        let invalidator = CacheInvalidator::new(
            cache.clone(),
            cache_breaker.clone(),
            RetryPolicy::immediate(config.local_retries),
            queue,
        );
        let lock = DistributedLock::new(tier.clone(), config.holder, config.lock);
        let seeder = Arc::new(IndexSeeder::new(
            reader.clone(),
            index.clone(),
            config.ranking,
        ));

        let posts = PostService::new(PostServiceParts {
            reader,
            writer,
            cache: cache.clone(),
            likes: LikeSet::new(tier),
            index: index.clone(),
            invalidator,
            lock,
            source: source_breaker.clone(),
        });

        Self {
            posts,
            seeder,
            index,
            cache,
            source_breaker,
            cache_breaker,
        }
    }

    pub fn job_context(&self) -> JobWorkerContext {
        JobWorkerContext {
            cache: self.cache.clone(),
        }
    }
}
