//! Incremental summarization engine
//!
//! Maintains the `call_summary` table from the append-mostly `call_records`
//! source. Both refresh modes share one pipeline:
//!
//! ```text
//! ┌───────────────┐     ┌───────────────┐     ┌───────────────┐
//! │   Extractor   │ ──► │  Aggregator   │ ──► │  Reconciler   │
//! │ (CallSource)  │     │ (GroupKey →   │     │ (transaction  │
//! │ window filter │     │  MetricGroup) │     │  per cycle)   │
//! └───────────────┘     └───────────────┘     └───────────────┘
//!         │                                            │
//!         ▼                                            ▼
//!  call_records + clients                        call_summary
//! ```
//!
//! - **Full** refresh scans everything and replaces the whole table.
//! - **Incremental** refresh scans a trailing window and replaces only the
//!   keys that window touched. Rows outside the window keep their last
//!   computed values unless [`RetentionPolicy::Expire`] is configured.
//!
//! Only one refresh may run against a summary table at a time. The engine
//! does not enforce this; callers hold a process lock.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use callstats_core::{Config, Database};
//! use callstats_core::summary::RefreshEngine;
//!
//! let config = Config::load()?;
//! let db = Database::open(&config.effective_database_path())?;
//! db.migrate()?;
//!
//! let engine = RefreshEngine::new(config.refresh.clone());
//! let report = engine.run_incremental_refresh(&db, 2)?;
//! println!("{} groups written", report.groups_written);
//! ```
//!
//! [`RetentionPolicy::Expire`]: crate::types::RetentionPolicy::Expire

pub mod aggregate;
mod engine;
pub mod extract;
pub mod reconcile;

pub use aggregate::Aggregator;
pub use engine::{RefreshEngine, RefreshOutcome, RefreshReport, RefreshRun, RefreshRunStatus};
pub use extract::{CallSource, ExtractStats, MalformedStats, ScanFilter, SourceRow};
pub use reconcile::ReconcileStats;
