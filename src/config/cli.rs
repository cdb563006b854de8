use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the postrank binary.
#[derive(Debug, Parser)]
#[command(
    name = "postrank",
    version,
    about = "Post cache consistency and popularity ranking engine"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "POSTRANK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Warm the popularity index and run the background workers.
    Serve(Box<ServeArgs>),
    /// Rebuild the popularity index from the database once and exit.
    Resync(ResyncArgs),
    /// Apply schema migrations and the job queue tables, then exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverride {
    /// Override the cache backend (redis|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverride,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Run pending migrations before serving.
    #[arg(
        long = "database-migrate-on-start",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub database_migrate_on_start: Option<bool>,

    /// Override the number of posts seeded before serving.
    #[arg(long = "ranking-warmup-top-k", value_name = "COUNT")]
    pub ranking_warmup_top_k: Option<u32>,

    /// Override the period of the full index reload.
    #[arg(long = "ranking-resync-interval-seconds", value_name = "SECONDS")]
    pub ranking_resync_interval_seconds: Option<u64>,

    /// Override the deferred invalidation worker concurrency.
    #[arg(long = "invalidation-worker-concurrency", value_name = "COUNT")]
    pub invalidation_worker_concurrency: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ResyncArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}
