use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::application::error::AppError;
use crate::domain::entities::PostPreview;
use crate::domain::error::Paging;
use crate::domain::types::ListOrder;

use super::service::PostService;

const SOURCE: &str = "application::posts::queries";

impl PostService {
    /// One page of previews. `Hot` pages come from the popularity index and
    /// degrade to a score-ordered database query when the index or the read
    /// path is unavailable.
    #[instrument(skip(self, order), fields(order = order.as_str()))]
    pub async fn list_previews(
        &self,
        page: i64,
        page_size: i64,
        order: ListOrder,
    ) -> Result<Vec<PostPreview>, AppError> {
        let paging = Paging::new(page, page_size)?;
        match order {
            ListOrder::Recent => self.list_recent(paging).await,
            ListOrder::Hot => match self.list_ranked(paging).await {
                Ok(previews) => Ok(previews),
                Err(err) if should_fall_back(&err) => {
                    warn!(
                        target = SOURCE,
                        error = %err,
                        page = paging.page(),
                        "Ranked listing degraded; serving score-ordered query"
                    );
                    counter!("postrank_ranking_fallback_total", "reason" => fallback_reason(&err))
                        .increment(1);
                    self.list_by_score_fallback(paging).await
                }
                Err(err) => Err(err),
            },
        }
    }

    async fn list_recent(&self, paging: Paging) -> Result<Vec<PostPreview>, AppError> {
        let posts = self
            .source
            .call(|| self.reader.list_recent(paging.offset(), paging.page_size()))
            .await?;
        Ok(posts.iter().map(|post| post.preview()).collect())
    }

    async fn list_ranked(&self, paging: Paging) -> Result<Vec<PostPreview>, AppError> {
        let ranked = self
            .index
            .range_by_rank_desc(paging.offset(), paging.page_size())
            .await?;

        let mut previews = Vec::with_capacity(ranked.len());
        for entry in ranked {
            match self.get_post(entry.post_id).await {
                Ok(post) => previews.push(post.preview()),
                Err(AppError::NotFound { .. }) => {
                    debug!(
                        target = SOURCE,
                        post_id = %entry.post_id,
                        "Skipping ranked id with no live post"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(previews)
    }

    /// Direct query that bypasses both breakers.
    async fn list_by_score_fallback(&self, paging: Paging) -> Result<Vec<PostPreview>, AppError> {
        let posts = self
            .reader
            .list_by_score(paging.offset(), paging.page_size())
            .await?;
        Ok(posts.iter().map(|post| post.preview()).collect())
    }
}

fn should_fall_back(err: &AppError) -> bool {
    matches!(err, AppError::Degraded { .. } | AppError::Cache(_))
}

fn fallback_reason(err: &AppError) -> &'static str {
    match err {
        AppError::Degraded { breaker } => breaker,
        _ => "cache_error",
    }
}
