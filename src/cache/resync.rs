//! Popularity index warm-up and periodic resynchronisation from the source of truth.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::repos::{PostsRepo, RepoError};

use super::config::RankingConfig;
use super::ranking::{IndexError, PopularityIndex};

const SOURCE: &str = "cache::resync";

/// Entries written per sorted-set command during a full load.
const SEED_BATCH: usize = 500;

#[derive(Debug, Error)]
pub enum ResyncError {
    #[error("failed to read scores: {0}")]
    Source(#[from] RepoError),
    #[error("failed to write popularity index: {0}")]
    Index(#[from] IndexError),
}

/// Rebuilds the popularity index by upserting every live post's score.
///
/// Reloads only upsert; entries for posts deleted outside the write path
/// are left in place and skipped by the ranked listing.
pub struct IndexSeeder {
    posts: Arc<dyn PostsRepo>,
    index: PopularityIndex,
    config: RankingConfig,
}

impl IndexSeeder {
    pub fn new(posts: Arc<dyn PostsRepo>, index: PopularityIndex, config: RankingConfig) -> Self {
        Self {
            posts,
            index,
            config,
        }
    }

    /// Seed the top-K posts. Run before serving traffic.
    pub async fn warm_up(&self) -> Result<usize, ResyncError> {
        let seeded = self.seed(Some(self.config.warmup_top_k), "warm_up").await?;
        info!(
            target = SOURCE,
            seeded,
            top_k = self.config.warmup_top_k,
            "Popularity index warmed"
        );
        Ok(seeded)
    }

    /// Full reload of every live post.
    pub async fn resync_now(&self) -> Result<usize, ResyncError> {
        let seeded = self.seed(None, "full").await?;
        info!(target = SOURCE, seeded, "Popularity index resynced");
        Ok(seeded)
    }

    async fn seed(&self, limit: Option<i64>, phase: &'static str) -> Result<usize, ResyncError> {
        let started = Instant::now();
        let entries = self.posts.list_scores(limit).await?;
        for chunk in entries.chunks(SEED_BATCH) {
            self.index.add_many(chunk).await?;
        }
        histogram!("postrank_index_resync_ms", "phase" => phase)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(entries.len())
    }

    /// Start the background loop: a full load now, then one every
    /// `resync_interval` until cancelled.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> ResyncTask {
        let trigger = Arc::new(Notify::new());
        let handle = tokio::spawn({
            let trigger = Arc::clone(&trigger);
            let cancel = cancel.clone();
            async move {
                loop {
                    if let Err(err) = self.resync_now().await {
                        error!(
                            target = SOURCE,
                            error = %err,
                            "Popularity index resync failed; retrying next period"
                        );
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.resync_interval) => {}
                        _ = trigger.notified() => {}
                    }
                }
                info!(target = SOURCE, "Popularity index resync loop stopped");
            }
        });
        ResyncTask {
            cancel,
            trigger,
            handle,
        }
    }
}

/// Handle to the running resync loop.
pub struct ResyncTask {
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl ResyncTask {
    /// Run the next reload now instead of waiting for the timer.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await
            && err.is_panic()
        {
            error!(target = SOURCE, error = %err, "Resync task panicked");
        }
    }
}
