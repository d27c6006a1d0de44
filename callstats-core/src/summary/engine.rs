//! Refresh engine: runs one Extractor → Aggregator → Reconciler cycle

use super::aggregate::Aggregator;
use super::extract::{self, CallSource, ExtractStats, MalformedStats, ScanFilter};
use super::reconcile::{self, ReconcileStats};
use crate::config::RefreshConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::RefreshMode;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// How a successful refresh ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Groups were reconciled into the summary table
    Applied,
    /// The incremental window held no records; nothing was touched
    EmptyWindow,
}

impl RefreshOutcome {
    /// Convert to string for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Applied => "applied",
            RefreshOutcome::EmptyWindow => "empty_window",
        }
    }

    /// Parse outcome string from storage.
    pub fn from_storage(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(RefreshOutcome::Applied),
            "empty_window" => Some(RefreshOutcome::EmptyWindow),
            _ => None,
        }
    }
}

/// Summary of one successful refresh cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub run_id: String,
    pub mode: RefreshMode,
    /// Lower bound on `start_time`; `None` for full refreshes
    pub threshold: Option<NaiveDateTime>,
    pub records_scanned: usize,
    pub malformed: MalformedStats,
    pub groups_written: usize,
    pub rows_deleted: usize,
    pub outcome: RefreshOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Status of a refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshRunStatus {
    Success,
    Error,
}

impl RefreshRunStatus {
    /// Convert to string for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshRunStatus::Success => "success",
            RefreshRunStatus::Error => "error",
        }
    }

    /// Parse status string from storage.
    pub fn from_storage(value: &str) -> Self {
        match value {
            "success" => RefreshRunStatus::Success,
            _ => RefreshRunStatus::Error,
        }
    }
}

/// A refresh run as stored in the `refresh_runs` table.
///
/// Written for successful and failed cycles alike.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRun {
    pub run_id: String,
    pub mode: RefreshMode,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: RefreshRunStatus,
    /// `None` for failed runs
    pub outcome: Option<RefreshOutcome>,
    pub error_message: Option<String>,
    pub window_start: Option<NaiveDateTime>,
    pub records_scanned: usize,
    pub malformed_records: usize,
    pub groups_written: usize,
    pub rows_deleted: usize,
}

impl From<&RefreshReport> for RefreshRun {
    fn from(report: &RefreshReport) -> Self {
        Self {
            run_id: report.run_id.clone(),
            mode: report.mode,
            started_at: report.started_at,
            duration_ms: report.duration_ms,
            status: RefreshRunStatus::Success,
            outcome: Some(report.outcome),
            error_message: None,
            window_start: report.threshold,
            records_scanned: report.records_scanned,
            malformed_records: report.malformed.total(),
            groups_written: report.groups_written,
            rows_deleted: report.rows_deleted,
        }
    }
}

/// Runs refresh cycles against a summary table.
///
/// Callers must ensure only one refresh runs against a given database at a
/// time.
pub struct RefreshEngine {
    config: RefreshConfig,
}

impl RefreshEngine {
    pub fn new(config: RefreshConfig) -> Self {
        Self { config }
    }

    /// Recompute every group from the whole source and replace the table.
    pub fn run_full_refresh(&self, db: &Database) -> Result<RefreshReport> {
        self.run_full_refresh_from(db, db)
    }

    /// Like [`Self::run_full_refresh`], reading records from `source`.
    pub fn run_full_refresh_from(
        &self,
        source: &dyn CallSource,
        db: &Database,
    ) -> Result<RefreshReport> {
        let today = Local::now().date_naive();
        self.run(source, db, RefreshMode::Full, None, today)
    }

    /// Recompute the groups touched in the last `window_hours` hours.
    pub fn run_incremental_refresh(&self, db: &Database, window_hours: u32) -> Result<RefreshReport> {
        self.run_incremental_refresh_at(db, db, window_hours, Local::now().naive_local())
    }

    /// Incremental refresh with an explicit clock reading.
    pub fn run_incremental_refresh_at(
        &self,
        source: &dyn CallSource,
        db: &Database,
        window_hours: u32,
        now: NaiveDateTime,
    ) -> Result<RefreshReport> {
        if window_hours == 0 {
            return Err(Error::Config(
                "incremental window must be at least 1 hour".to_string(),
            ));
        }
        let threshold = window_start(now, window_hours);
        self.run(
            source,
            db,
            RefreshMode::Incremental,
            Some(threshold),
            now.date(),
        )
    }

    fn run(
        &self,
        source: &dyn CallSource,
        db: &Database,
        mode: RefreshMode,
        threshold: Option<NaiveDateTime>,
        today: NaiveDate,
    ) -> Result<RefreshReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("refresh", run_id = %run_id, mode = %mode);
        let _enter = span.enter();

        let started_at = Utc::now();
        let start = Instant::now();

        tracing::info!(threshold = ?threshold, "Starting refresh");

        match self.execute(source, db, mode, threshold, today) {
            Ok((extracted, reconciled)) => {
                let outcome = if reconciled.is_some() {
                    RefreshOutcome::Applied
                } else {
                    RefreshOutcome::EmptyWindow
                };
                let reconciled = reconciled.unwrap_or_default();

                let report = RefreshReport {
                    run_id,
                    mode,
                    threshold,
                    records_scanned: extracted.records_scanned,
                    malformed: extracted.malformed,
                    groups_written: reconciled.groups_written,
                    rows_deleted: reconciled.rows_deleted,
                    outcome,
                    started_at,
                    duration_ms: start.elapsed().as_millis() as i64,
                };

                if !report.malformed.is_empty() {
                    tracing::warn!(
                        malformed = report.malformed.total(),
                        records_skipped = report.malformed.records_skipped,
                        "Refresh dropped malformed call record fields"
                    );
                }

                Self::record_refresh_run(db, &RefreshRun::from(&report));

                tracing::info!(
                    outcome = outcome.as_str(),
                    records_scanned = report.records_scanned,
                    groups_written = report.groups_written,
                    rows_deleted = report.rows_deleted,
                    duration_ms = report.duration_ms,
                    "Refresh completed"
                );

                Ok(report)
            }
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as i64;
                tracing::error!(error = %e, duration_ms, "Refresh failed");

                Self::record_refresh_run(
                    db,
                    &RefreshRun {
                        run_id,
                        mode,
                        started_at,
                        duration_ms,
                        status: RefreshRunStatus::Error,
                        outcome: None,
                        error_message: Some(e.to_string()),
                        window_start: threshold,
                        records_scanned: 0,
                        malformed_records: 0,
                        groups_written: 0,
                        rows_deleted: 0,
                    },
                );

                Err(e)
            }
        }
    }

    /// Returns `None` for the reconcile stats when an incremental window
    /// was empty and nothing was written.
    fn execute(
        &self,
        source: &dyn CallSource,
        db: &Database,
        mode: RefreshMode,
        threshold: Option<NaiveDateTime>,
        today: NaiveDate,
    ) -> Result<(ExtractStats, Option<ReconcileStats>)> {
        let filter = ScanFilter {
            since: threshold,
            excluded_statuses: &self.config.excluded_statuses,
        };

        let mut aggregator = Aggregator::new();
        let extracted = extract::extract(source, &filter, &mut |record| aggregator.push(record))?;

        if mode == RefreshMode::Incremental && aggregator.is_empty() {
            tracing::info!("No call records in window, summary left unchanged");
            return Ok((extracted, None));
        }

        let groups = aggregator.finish();
        let computed_at = Utc::now();

        let reconciled = match mode {
            RefreshMode::Full => reconcile::full_replace(db, &groups, computed_at)?,
            RefreshMode::Incremental => reconcile::replace_keys(
                db,
                &groups,
                self.config.retention,
                today,
                computed_at,
            )?,
        };

        Ok((extracted, Some(reconciled)))
    }

    fn record_refresh_run(db: &Database, run: &RefreshRun) {
        if let Err(e) = db.insert_refresh_run(run) {
            tracing::warn!(error = %e, "Failed to record refresh run");
        }
    }
}

/// Start of the incremental window: `window_hours` before `now`, floored to
/// the hour.
///
/// Groups are keyed by hour, so the threshold has to land on a key boundary.
/// Otherwise the oldest recomputed key would see only part of its records
/// and overwrite a complete row with an undercount.
pub fn window_start(now: NaiveDateTime, window_hours: u32) -> NaiveDateTime {
    let threshold = now - chrono::Duration::hours(i64::from(window_hours));
    threshold
        .date()
        .and_hms_opt(threshold.hour(), 0, 0)
        .unwrap_or(threshold)
}
