//! Database layer for callstats
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Source tables (`call_records`, `clients`) read by the extractor
//! - The derived `call_summary` table and the `refresh_runs` log

pub mod repo;
pub mod schema;

pub use repo::{Database, SummaryFilter};
