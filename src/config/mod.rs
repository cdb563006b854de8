//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CacheOverride, CliArgs, Command, DatabaseOverride, MigrateArgs, ResyncArgs, ServeArgs,
    ServeOverrides,
};

use std::{
    num::{NonZeroU32, NonZeroU64},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::resilience::BackoffKind;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "postrank";
const ENV_PREFIX: &str = "POSTRANK";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_TTL_MIN_MINUTES: u64 = 10;
const DEFAULT_TTL_SPAN_MINUTES: u64 = 40;
const DEFAULT_COUNTER_CEILING: i64 = 1_000_000;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_INTERVAL_SECS: u64 = 0;
const DEFAULT_BREAKER_OPEN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BREAKER_HALF_OPEN_MAX_REQUESTS: u32 = 1;
const DEFAULT_LOCK_TTL_MS: u64 = 5_000;
const DEFAULT_LOCK_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_LOCK_BASE_DELAY_MS: u64 = 1;
const DEFAULT_LOCK_MAX_DELAY_MS: u64 = 500;
const DEFAULT_WARMUP_TOP_K: u32 = 100;
const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_INVALIDATION_LOCAL_RETRIES: u32 = 3;
const DEFAULT_INVALIDATION_WORKER_CONCURRENCY: u32 = 2;
const DEFAULT_INVALIDATION_JOB_MAX_ATTEMPTS: u32 = 10;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub breaker: BreakerSettings,
    pub lock: LockSettings,
    pub ranking: RankingSettings,
    pub invalidation: InvalidationSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub migrate_on_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(format!("unknown cache backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub ttl_min_minutes: u64,
    pub ttl_span_minutes: NonZeroU64,
    pub counter_ceiling: i64,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: NonZeroU32,
    pub interval: Duration,
    pub open_timeout: Duration,
    pub half_open_max_requests: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub ttl: Duration,
    pub max_attempts: NonZeroU32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: BackoffKind,
}

#[derive(Debug, Clone)]
pub struct RankingSettings {
    pub warmup_top_k: NonZeroU32,
    pub resync_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct InvalidationSettings {
    pub local_retries: u32,
    pub worker_concurrency: NonZeroU32,
    pub job_max_attempts: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Resync(args)) => {
            raw.apply_database_override(&args.database);
            raw.apply_cache_override(&args.cache);
        }
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    breaker: RawBreakerSettings,
    lock: RawLockSettings,
    ranking: RawRankingSettings,
    invalidation: RawInvalidationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_database_override(&overrides.database);
        self.apply_cache_override(&overrides.cache);

        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(migrate) = overrides.database_migrate_on_start {
            self.database.migrate_on_start = Some(migrate);
        }
        if let Some(top_k) = overrides.ranking_warmup_top_k {
            self.ranking.warmup_top_k = Some(top_k);
        }
        if let Some(seconds) = overrides.ranking_resync_interval_seconds {
            self.ranking.resync_interval_seconds = Some(seconds);
        }
        if let Some(value) = overrides.invalidation_worker_concurrency {
            self.invalidation.worker_concurrency = Some(value);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_cache_override(&mut self, overrides: &CacheOverride) {
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            breaker,
            lock,
            ranking,
            invalidation,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            breaker: build_breaker_settings(breaker)?,
            lock: build_lock_settings(lock)?,
            ranking: build_ranking_settings(ranking)?,
            invalidation: build_invalidation_settings(invalidation)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        migrate_on_start: database.migrate_on_start.unwrap_or(false),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackend::Redis,
    };

    let redis_url = cache
        .redis_url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
    if backend == CacheBackend::Redis && redis_url.is_empty() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when the redis backend is selected",
        ));
    }

    let ttl_span_minutes = NonZeroU64::new(
        cache
            .ttl_span_minutes
            .unwrap_or(DEFAULT_TTL_SPAN_MINUTES),
    )
    .ok_or_else(|| LoadError::invalid("cache.ttl_span_minutes", "must be greater than zero"))?;

    let counter_ceiling = cache.counter_ceiling.unwrap_or(DEFAULT_COUNTER_CEILING);
    if counter_ceiling <= 1 {
        return Err(LoadError::invalid(
            "cache.counter_ceiling",
            "must be greater than one",
        ));
    }

    Ok(CacheSettings {
        backend,
        redis_url,
        ttl_min_minutes: cache.ttl_min_minutes.unwrap_or(DEFAULT_TTL_MIN_MINUTES),
        ttl_span_minutes,
        counter_ceiling,
    })
}

fn build_breaker_settings(breaker: RawBreakerSettings) -> Result<BreakerSettings, LoadError> {
    let open_timeout_secs = breaker
        .open_timeout_seconds
        .unwrap_or(DEFAULT_BREAKER_OPEN_TIMEOUT_SECS);
    if open_timeout_secs == 0 {
        return Err(LoadError::invalid(
            "breaker.open_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(BreakerSettings {
        failure_threshold: non_zero_u32(
            breaker
                .failure_threshold
                .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD)
                .into(),
            "breaker.failure_threshold",
        )?,
        interval: Duration::from_secs(
            breaker
                .interval_seconds
                .unwrap_or(DEFAULT_BREAKER_INTERVAL_SECS),
        ),
        open_timeout: Duration::from_secs(open_timeout_secs),
        half_open_max_requests: non_zero_u32(
            breaker
                .half_open_max_requests
                .unwrap_or(DEFAULT_BREAKER_HALF_OPEN_MAX_REQUESTS)
                .into(),
            "breaker.half_open_max_requests",
        )?,
    })
}

fn build_lock_settings(lock: RawLockSettings) -> Result<LockSettings, LoadError> {
    let ttl_ms = lock.ttl_ms.unwrap_or(DEFAULT_LOCK_TTL_MS);
    if ttl_ms == 0 {
        return Err(LoadError::invalid("lock.ttl_ms", "must be greater than zero"));
    }

    let base_delay_ms = lock.base_delay_ms.unwrap_or(DEFAULT_LOCK_BASE_DELAY_MS);
    let max_delay_ms = lock.max_delay_ms.unwrap_or(DEFAULT_LOCK_MAX_DELAY_MS);
    if max_delay_ms < base_delay_ms {
        return Err(LoadError::invalid(
            "lock.max_delay_ms",
            "must not be smaller than lock.base_delay_ms",
        ));
    }

    Ok(LockSettings {
        ttl: Duration::from_millis(ttl_ms),
        max_attempts: non_zero_u32(
            lock.max_attempts.unwrap_or(DEFAULT_LOCK_MAX_ATTEMPTS).into(),
            "lock.max_attempts",
        )?,
        base_delay: Duration::from_millis(base_delay_ms),
        max_delay: Duration::from_millis(max_delay_ms),
        backoff: lock.backoff.unwrap_or_default(),
    })
}

fn build_ranking_settings(ranking: RawRankingSettings) -> Result<RankingSettings, LoadError> {
    let resync_secs = ranking
        .resync_interval_seconds
        .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECS);
    if resync_secs == 0 {
        return Err(LoadError::invalid(
            "ranking.resync_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RankingSettings {
        warmup_top_k: non_zero_u32(
            ranking.warmup_top_k.unwrap_or(DEFAULT_WARMUP_TOP_K).into(),
            "ranking.warmup_top_k",
        )?,
        resync_interval: Duration::from_secs(resync_secs),
    })
}

fn build_invalidation_settings(
    invalidation: RawInvalidationSettings,
) -> Result<InvalidationSettings, LoadError> {
    let job_max_attempts = non_zero_u32(
        invalidation
            .job_max_attempts
            .unwrap_or(DEFAULT_INVALIDATION_JOB_MAX_ATTEMPTS)
            .into(),
        "invalidation.job_max_attempts",
    )?;
    i32::try_from(job_max_attempts.get()).map_err(|_| {
        LoadError::invalid(
            "invalidation.job_max_attempts",
            "value exceeds supported range for i32",
        )
    })?;

    Ok(InvalidationSettings {
        local_retries: invalidation
            .local_retries
            .unwrap_or(DEFAULT_INVALIDATION_LOCAL_RETRIES),
        worker_concurrency: non_zero_u32(
            invalidation
                .worker_concurrency
                .unwrap_or(DEFAULT_INVALIDATION_WORKER_CONCURRENCY)
                .into(),
            "invalidation.worker_concurrency",
        )?,
        job_max_attempts,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    migrate_on_start: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    ttl_min_minutes: Option<u64>,
    ttl_span_minutes: Option<u64>,
    counter_ceiling: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBreakerSettings {
    failure_threshold: Option<u32>,
    interval_seconds: Option<u64>,
    open_timeout_seconds: Option<u64>,
    half_open_max_requests: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLockSettings {
    ttl_ms: Option<u64>,
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff: Option<BackoffKind>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRankingSettings {
    warmup_top_k: Option<u32>,
    resync_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    local_retries: Option<u32>,
    worker_concurrency: Option<u32>,
    job_max_attempts: Option<u32>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
