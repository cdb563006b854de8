use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "postrank_cache_hit_total",
            Unit::Count,
            "Post reads served from the cache tier."
        );
        describe_counter!(
            "postrank_cache_miss_total",
            Unit::Count,
            "Post reads that fell through to the source of truth."
        );
        describe_counter!(
            "postrank_coalesced_reads_total",
            Unit::Count,
            "Cache-miss reads that joined an in-flight load instead of querying."
        );
        describe_counter!(
            "postrank_breaker_transition_total",
            Unit::Count,
            "Circuit breaker state changes, labelled by breaker and target state."
        );
        describe_counter!(
            "postrank_breaker_rejected_total",
            Unit::Count,
            "Calls rejected by an open or saturated half-open breaker."
        );
        describe_counter!(
            "postrank_lock_contention_total",
            Unit::Count,
            "Per-post lock acquisitions that exhausted their attempts."
        );
        describe_counter!(
            "postrank_invalidation_deferred_total",
            Unit::Count,
            "Cache deletions handed to the deferred invalidation queue."
        );
        describe_counter!(
            "postrank_invalidation_lost_total",
            Unit::Count,
            "Cache deletions that could neither be applied nor enqueued."
        );
        describe_counter!(
            "postrank_invalidation_consumed_total",
            Unit::Count,
            "Deferred invalidations processed by the worker, labelled by outcome."
        );
        describe_counter!(
            "postrank_ranking_fallback_total",
            Unit::Count,
            "Hot listings served from the source of truth instead of the index."
        );
        describe_histogram!(
            "postrank_index_resync_ms",
            Unit::Milliseconds,
            "Popularity index seeding latency in milliseconds."
        );
    });
}
