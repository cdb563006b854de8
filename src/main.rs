use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use postrank::{
    application::{
        engine::{Backends, Engine, EngineConfig},
        error::AppError,
        jobs::{CacheInvalidationJob, JobWorkerContext, process_cache_invalidation_job},
    },
    cache::CacheTier,
    config::{self, CacheBackend, CacheSettings},
    infra::{
        db::{INVALIDATION_NAMESPACE, PostgresRepositories},
        error::InfraError,
        memory::MemoryCacheTier,
        redis::RedisCacheTier,
        telemetry,
    },
};
use sqlx::postgres::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "postrank::main";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Resync(_) => run_resync(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    if settings.database.migrate_on_start {
        migrate(&pool).await?;
    }
    let repositories = Arc::new(
        PostgresRepositories::new(pool.clone()).with_invalidation_max_attempts(
            i32::try_from(settings.invalidation.job_max_attempts.get()).unwrap_or(i32::MAX),
        ),
    );
    let engine = build_engine(&settings, repositories).await?;

    if let Err(err) = engine.seeder.warm_up().await {
        warn!(
            target = SOURCE,
            error = %err,
            "Popularity index warm-up failed; ranked listings fall back until the next resync"
        );
    }

    let monitor_handle = spawn_job_monitor(
        pool,
        engine.job_context(),
        settings.invalidation.worker_concurrency.get() as usize,
    );

    let shutdown = CancellationToken::new();
    let resync = Arc::clone(&engine.seeder).spawn(shutdown.child_token());

    info!(
        target = SOURCE,
        backend = ?settings.cache.backend,
        resync_interval_secs = settings.ranking.resync_interval.as_secs(),
        "postrank running; press Ctrl-C to stop"
    );

    let signal = tokio::signal::ctrl_c().await;

    shutdown.cancel();
    resync.stop().await;
    monitor_handle.abort();
    let _ = monitor_handle.await;
    info!(target = SOURCE, "postrank stopped");

    signal.map_err(|err| AppError::unexpected(format!("failed to listen for Ctrl-C: {err}")))
}

async fn run_resync(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    let repositories = Arc::new(PostgresRepositories::new(pool));
    let engine = build_engine(&settings, repositories).await?;

    let seeded = engine
        .seeder
        .resync_now()
        .await
        .map_err(|err| AppError::unexpected(format!("resync failed: {err}")))?;

    println!("Resynced popularity index with {seeded} posts");
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    migrate(&pool).await?;
    println!("Database schema and job queue tables are up to date");
    Ok(())
}

async fn connect_database(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

async fn migrate(pool: &PgPool) -> Result<(), AppError> {
    PostgresRepositories::run_migrations(pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!(target = SOURCE, "Migrations applied");
    Ok(())
}

async fn connect_cache(cache: &CacheSettings) -> Result<Arc<dyn CacheTier>, AppError> {
    match cache.backend {
        CacheBackend::Redis => {
            let tier = RedisCacheTier::connect(&cache.redis_url)
                .await
                .map_err(AppError::from)?;
            Ok(Arc::new(tier))
        }
        CacheBackend::Memory => {
            warn!(
                target = SOURCE,
                "Using the in-process cache tier; locks and entries are not shared between instances"
            );
            Ok(Arc::new(MemoryCacheTier::new()))
        }
    }
}

async fn build_engine(
    settings: &config::Settings,
    repositories: Arc<PostgresRepositories>,
) -> Result<Engine, AppError> {
    let tier = connect_cache(&settings.cache).await?;
    Ok(Engine::new(
        Backends {
            tier,
            reader: repositories.clone(),
            writer: repositories.clone(),
            queue: repositories,
        },
        EngineConfig::from(settings),
    ))
}

fn spawn_job_monitor(
    pool: PgPool,
    context: JobWorkerContext,
    concurrency: usize,
) -> tokio::task::JoinHandle<()> {
    let storage: PostgresStorage<CacheInvalidationJob> =
        PostgresStorage::new_with_config(pool, ApalisSqlConfig::new(INVALIDATION_NAMESPACE));

    let invalidation_worker = WorkerBuilder::new("cache-invalidation-worker")
        .concurrency(concurrency)
        .data(context)
        .backend(storage)
        .build_fn(process_cache_invalidation_job);

    let monitor = Monitor::new().register(invalidation_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(target = SOURCE, error = %err, "job monitor stopped");
        }
    })
}
