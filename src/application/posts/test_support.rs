use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::engine::{Backends, Engine, EngineConfig};
use crate::cache::PopularityIndex;
use crate::domain::entities::PostRecord;
use crate::domain::types::PostStatus;
use crate::infra::memory::MemoryCacheTier;
use crate::infra::memory_posts::MemoryPostStore;
use crate::resilience::CircuitBreaker;

use super::service::PostService;

pub(crate) fn sample_post(score: i64) -> PostRecord {
    let now = OffsetDateTime::now_utc();
    PostRecord {
        id: Uuid::new_v4(),
        title: "Sample".to_string(),
        body: "Sample body".to_string(),
        author: "ada".to_string(),
        owner_id: Uuid::new_v4(),
        status: PostStatus::Published,
        tags: vec!["default".to_string()],
        score,
        view_count: 0,
        like_count: 0,
        deleted: false,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) struct Harness {
    pub service: PostService,
    pub store: Arc<MemoryPostStore>,
    pub tier: Arc<MemoryCacheTier>,
    pub index: PopularityIndex,
    pub cache_breaker: Arc<CircuitBreaker>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryPostStore::new());
        let tier = Arc::new(MemoryCacheTier::new());
        let engine = Engine::new(
            Backends {
                tier: tier.clone(),
                reader: store.clone(),
                writer: store.clone(),
                queue: store.clone(),
            },
            EngineConfig::default(),
        );

        Self {
            service: engine.posts,
            store,
            tier,
            index: engine.index,
            cache_breaker: engine.cache_breaker,
        }
    }
}
