//! Shared startup for the ratingstats binaries.
//!
//! Resolves XDG paths, loads configuration, starts logging and wires the
//! SQLite host, the configured cache store and the statistics service.

use anyhow::{Context, Result};
use ratingstats_core::logging::LoggingGuard;
use ratingstats_core::{Config, Database, StatisticsCache, StatisticsService};
use std::sync::Arc;

pub struct Runtime {
    pub config: Config,
    pub db: Arc<Database>,
    pub service: Arc<StatisticsService>,
    _log_guard: LoggingGuard,
}

impl Runtime {
    pub fn open(name: &str) -> Result<Self> {
        // Ensure XDG environment variables are set before using core library
        Config::ensure_xdg_env();

        let config = Config::load().context("failed to load configuration")?;

        let log_guard = ratingstats_core::logging::init(&config.logging, name)
            .context("failed to initialize logging")?;

        tracing::info!(binary = name, "starting");

        let db_path = Config::database_path();
        tracing::info!(path = %db_path.display(), "Opening database");
        let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
        db.migrate().context("failed to run database migrations")?;

        let cache =
            StatisticsCache::from_config(&config.cache).context("failed to open statistics cache")?;

        let service = StatisticsService::builder()
            .source(db.clone())
            .cache(Arc::new(cache))
            .build()
            .context("failed to build statistics service")?;

        Ok(Self {
            config,
            db,
            service: Arc::new(service),
            _log_guard: log_guard,
        })
    }
}
