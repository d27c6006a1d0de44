//! # callstats-core
//!
//! Core library for callstats - an hourly call-center summary engine.
//!
//! This library provides:
//! - Domain types for call records, group keys and metric groups
//! - Database storage layer with SQLite
//! - The incremental summarization engine (full and windowed refresh)
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Source:** `call_records` and `clients`, written by the telephony platform
//! - **Canonical:** typed, sentinel-free [`CallRecord`]s built during extraction
//! - **Derived:** the `call_summary` table, one row per [`GroupKey`] (regenerable)
//!
//! ## Example
//!
//! ```rust,no_run
//! use callstats_core::{Config, Database, RefreshEngine};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&config.effective_database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let engine = RefreshEngine::new(config.refresh.clone());
//! let report = engine.run_full_refresh(&db).expect("refresh failed");
//! println!("{} summary rows written", report.groups_written);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, SummaryFilter};
pub use error::{Error, Result};
pub use summary::{RefreshEngine, RefreshOutcome, RefreshReport};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod summary;
pub mod types;
