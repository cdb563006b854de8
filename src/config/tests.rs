use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.ranking.warmup_top_k = Some(50);

    let overrides = ServeOverrides {
        log_level: Some("debug".to_string()),
        ranking_warmup_top_k: Some(250),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.ranking.warmup_top_k.get(), 250);
}

#[test]
fn defaults_match_documented_constants() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.cache.backend, CacheBackend::Redis);
    assert_eq!(settings.cache.redis_url, DEFAULT_REDIS_URL);
    assert_eq!(settings.cache.ttl_min_minutes, 10);
    assert_eq!(settings.cache.ttl_span_minutes.get(), 40);
    assert_eq!(settings.cache.counter_ceiling, 1_000_000);

    assert_eq!(settings.breaker.failure_threshold.get(), 5);
    assert_eq!(settings.breaker.interval, Duration::ZERO);
    assert_eq!(settings.breaker.open_timeout, Duration::from_secs(60));
    assert_eq!(settings.breaker.half_open_max_requests.get(), 1);

    assert_eq!(settings.lock.ttl, Duration::from_secs(5));
    assert_eq!(settings.lock.max_attempts.get(), 10);
    assert_eq!(settings.lock.base_delay, Duration::from_millis(1));
    assert_eq!(settings.lock.max_delay, Duration::from_millis(500));
    assert_eq!(settings.lock.backoff, BackoffKind::Exponential);

    assert_eq!(settings.ranking.warmup_top_k.get(), 100);
    assert_eq!(settings.ranking.resync_interval, Duration::from_secs(1800));

    assert_eq!(settings.invalidation.local_retries, 3);
    assert_eq!(settings.invalidation.job_max_attempts.get(), 10);
    assert!(!settings.database.migrate_on_start);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn unknown_cache_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("memcached".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid backend");
    assert!(matches!(err, LoadError::Invalid { key: "cache.backend", .. }));
}

#[test]
fn memory_backend_is_case_insensitive() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("Memory".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.backend, CacheBackend::Memory);
}

#[test]
fn zero_ttl_span_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.ttl_span_minutes = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero span");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.ttl_span_minutes",
            ..
        }
    ));
}

#[test]
fn lock_delay_bounds_are_checked() {
    let mut raw = RawSettings::default();
    raw.lock.base_delay_ms = Some(100);
    raw.lock.max_delay_ms = Some(10);

    let err = Settings::from_raw(raw).expect_err("inverted delays");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "lock.max_delay_ms",
            ..
        }
    ));
}

#[test]
fn fixed_lock_backoff_can_be_selected() {
    let mut raw = RawSettings::default();
    raw.lock.backoff = Some(BackoffKind::Fixed);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.lock.backoff, BackoffKind::Fixed);
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn zero_worker_concurrency_is_rejected() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        invalidation_worker_concurrency: Some(0),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["postrank"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "postrank",
        "serve",
        "--database-url",
        "postgres://override",
        "--cache-backend",
        "memory",
        "--database-migrate-on-start",
        "true",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(
                serve.overrides.database.database_url.as_deref(),
                Some("postgres://override")
            );
            assert_eq!(serve.overrides.cache.cache_backend.as_deref(), Some("memory"));
            assert_eq!(serve.overrides.database_migrate_on_start, Some(true));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_resync_arguments() {
    let args = CliArgs::parse_from([
        "postrank",
        "resync",
        "--database-url",
        "postgres://example",
        "--cache-redis-url",
        "redis://cache:6379",
    ]);

    match args.command.expect("resync command") {
        Command::Resync(resync) => {
            assert_eq!(
                resync.database.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(
                resync.cache.cache_redis_url.as_deref(),
                Some("redis://cache:6379")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from([
        "postrank",
        "migrate",
        "--database-url",
        "postgres://example",
    ]);

    match args.command.expect("migrate command") {
        Command::Migrate(migrate) => {
            assert_eq!(
                migrate.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
