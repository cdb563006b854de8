//! Popularity index: a sorted set of post ids ordered by score.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::domain::entities::ScoreEntry;
use crate::resilience::{BreakerError, CircuitBreaker};

use super::keys::HOT_RANK_KEY;
use super::tier::{CacheError, CacheTier};

const SOURCE: &str = "cache::ranking";

pub type IndexError = BreakerError<CacheError>;

/// One ranked position read from the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedId {
    pub post_id: Uuid,
    pub score: f64,
}

/// Every operation runs through the cache-tier breaker so a failing tier
/// is detected by the ranked listing and bypassed.
#[derive(Clone)]
pub struct PopularityIndex {
    tier: Arc<dyn CacheTier>,
    breaker: Arc<CircuitBreaker>,
    key: String,
}

impl PopularityIndex {
    pub fn new(tier: Arc<dyn CacheTier>, breaker: Arc<CircuitBreaker>) -> Self {
        Self::with_key(tier, breaker, HOT_RANK_KEY)
    }

    pub fn with_key(
        tier: Arc<dyn CacheTier>,
        breaker: Arc<CircuitBreaker>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            tier,
            breaker,
            key: key.into(),
        }
    }

    pub async fn add_or_update(&self, post_id: Uuid, score: i64) -> Result<(), IndexError> {
        self.add_many(&[ScoreEntry { post_id, score }]).await
    }

    /// Upsert a batch of entries in one round trip.
    pub async fn add_many(&self, entries: &[ScoreEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let members: Vec<(String, f64)> = entries
            .iter()
            .map(|entry| (entry.post_id.to_string(), entry.score as f64))
            .collect();
        self.breaker
            .call(|| self.tier.zset_add(&self.key, &members))
            .await
    }

    pub async fn remove(&self, post_id: Uuid) -> Result<(), IndexError> {
        let member = post_id.to_string();
        self.breaker
            .call(|| self.tier.zset_remove(&self.key, &member))
            .await
    }

    /// Up to `limit` entries starting at rank `offset`, highest score first.
    pub async fn range_by_rank_desc(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<RankedId>, IndexError> {
        if limit <= 0 || offset < 0 {
            return Ok(Vec::new());
        }
        let stop = offset.saturating_add(limit - 1);
        let members = self
            .breaker
            .call(|| self.tier.zset_rev_range_with_scores(&self.key, offset, stop))
            .await?;

        Ok(members
            .into_iter()
            .filter_map(|(member, score)| match Uuid::parse_str(&member) {
                Ok(post_id) => Some(RankedId { post_id, score }),
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        member = %member,
                        error = %err,
                        "Skipping malformed popularity index member"
                    );
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryCacheTier;
    use crate::resilience::BreakerConfig;

    fn index() -> (Arc<MemoryCacheTier>, Arc<CircuitBreaker>, PopularityIndex) {
        let tier = Arc::new(MemoryCacheTier::new());
        let breaker = Arc::new(CircuitBreaker::new("cache", BreakerConfig::default()));
        let index = PopularityIndex::new(tier.clone(), breaker.clone());
        (tier, breaker, index)
    }

    #[tokio::test]
    async fn pages_are_disjoint_and_descending() {
        let (_, _, index) = index();
        let entries: Vec<ScoreEntry> = (0..25)
            .map(|score| ScoreEntry {
                post_id: Uuid::new_v4(),
                score,
            })
            .collect();
        index.add_many(&entries).await.expect("seed");

        let first = index.range_by_rank_desc(0, 10).await.expect("first page");
        let second = index.range_by_rank_desc(10, 10).await.expect("second page");
        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 10);

        let scores: Vec<f64> = first.iter().chain(&second).map(|r| r.score).collect();
        let expected: Vec<f64> = (5..25).rev().map(|s| s as f64).collect();
        assert_eq!(scores, expected);
        assert!(
            first
                .iter()
                .all(|a| second.iter().all(|b| a.post_id != b.post_id))
        );
    }

    #[tokio::test]
    async fn upsert_replaces_score_and_remove_drops_member() {
        let (_, _, index) = index();
        let id = Uuid::new_v4();
        index.add_or_update(id, 100).await.expect("add");
        index.add_or_update(id, 50).await.expect("update");

        let page = index.range_by_rank_desc(0, 10).await.expect("range");
        assert_eq!(page, vec![RankedId { post_id: id, score: 50.0 }]);

        index.remove(id).await.expect("remove");
        assert!(index.range_by_rank_desc(0, 10).await.expect("range").is_empty());
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_touching_tier() {
        let (_, breaker, index) = index();
        breaker.force_open();
        let err = index
            .range_by_rank_desc(0, 10)
            .await
            .expect_err("breaker rejects");
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn malformed_members_are_skipped() {
        let (tier, _, index) = index();
        let id = Uuid::new_v4();
        tier.zset_add(
            HOT_RANK_KEY,
            &[("garbage".to_string(), 9.0), (id.to_string(), 1.0)],
        )
        .await
        .expect("raw add");
        let page = index.range_by_rank_desc(0, 10).await.expect("range");
        assert_eq!(page, vec![RankedId { post_id: id, score: 1.0 }]);
    }
}
