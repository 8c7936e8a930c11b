//! # ratingstats-core
//!
//! Core library for ratingstats - statistics for star, emoji and NPS rating
//! fields on form submissions.
//!
//! This library provides:
//! - Rating field configuration and value formatting
//! - The aggregation engine (averages, medians, distributions, NPS, trends)
//! - A statistics cache with file and external key-value stores
//! - Batched cache regeneration jobs, a worker and a schedule ticker
//! - CSV/JSON exports and endpoint semantics
//! - A SQLite reference host implementing the collaborator traits
//!
//! ## Architecture
//!
//! Requests flow through three layers:
//! - **Host:** forms and submissions behind [`FormRegistry`] and [`SubmissionReader`]
//! - **Service:** [`StatisticsService`] resolves fields and consults the cache
//! - **Engine:** [`analytics`] computes results from plain rating values
//!
//! ## Example
//!
//! ```rust,no_run
//! use ratingstats_core::{Config, Database, StatisticsCache, StatisticsService};
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let cache = StatisticsCache::from_config(&config.cache).expect("failed to open cache");
//! let service = StatisticsService::builder()
//!     .source(Arc::new(db))
//!     .cache(Arc::new(cache))
//!     .build()
//!     .expect("missing collaborator");
//! ```

// Re-export commonly used items at the crate root
pub use cache::{CacheKey, StatisticsCache};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use events::SubmissionEvents;
pub use field::{RatingFieldConfig, RatingType};
pub use jobs::{CacheRegenerationJob, JobQueue, Schedule, Worker};
pub use service::{FormOverview, StatisticsService};
pub use source::{FormRegistry, FormSource, SubmissionReader};
pub use types::*;

// Public modules
pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod export;
pub mod field;
pub mod format;
pub mod jobs;
pub mod logging;
pub mod service;
pub mod source;
pub mod types;
