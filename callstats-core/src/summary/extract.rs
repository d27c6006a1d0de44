//! Extraction: source rows to classified records
//!
//! The source store encodes "unset" with sentinels (`\N`, empty strings and
//! the zero date). [`RawCallRow::normalize`] is the only place those are
//! recognized; everything after it works with `Option`.

use crate::error::{Error, Result};
use crate::types::{CallRecord, ClassifiedRecord, RawCallRow, RawSeconds};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Storage format of source timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCEPTED_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const NULL_SENTINEL: &str = "\\N";
const ZERO_DATE: &str = "0000-00-00";

/// A source row as read from the call store, with its client join applied.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub id: i64,
    pub row: RawCallRow,
    /// `None` when the client reference is missing
    pub client_name: Option<String>,
}

/// Predicate pushed down to the source scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanFilter<'a> {
    /// Only rows with `start_time >= since`
    pub since: Option<NaiveDateTime>,
    /// Rows with one of these statuses are never returned
    pub excluded_statuses: &'a [String],
}

/// A readable store of call records.
pub trait CallSource {
    /// Stream every row matching `filter` to `visit`, in source order.
    fn scan_calls(&self, filter: &ScanFilter<'_>, visit: &mut dyn FnMut(SourceRow)) -> Result<()>;
}

/// Per-field counts of malformed source values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MalformedStats {
    pub start_time: usize,
    pub answer_time: usize,
    pub end_time: usize,
    pub talk_time: usize,
    pub post_call_time: usize,
    /// Records dropped because they could not be keyed
    pub records_skipped: usize,
}

impl MalformedStats {
    /// Total malformed field occurrences.
    pub fn total(&self) -> usize {
        self.start_time + self.answer_time + self.end_time + self.talk_time + self.post_call_time
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Counters from one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    /// Rows returned by the source
    pub records_scanned: usize,
    /// Rows that became classified records
    pub records_classified: usize,
    pub malformed: MalformedStats,
}

/// Parse a source timestamp.
///
/// Returns `Ok(None)` for the unset sentinels and `Err` for anything else
/// that does not parse.
pub fn parse_timestamp(raw: Option<&str>) -> std::result::Result<Option<NaiveDateTime>, String> {
    let value = match raw.map(str::trim) {
        None => return Ok(None),
        Some(v) if v.is_empty() || v == NULL_SENTINEL || v.starts_with(ZERO_DATE) => {
            return Ok(None)
        }
        Some(v) => v,
    };

    ACCEPTED_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(Some)
        .ok_or_else(|| format!("unparseable timestamp {:?}", value))
}

/// Parse a source duration in whole seconds.
///
/// Returns `Ok(None)` for the unset sentinels and `Err` for negative,
/// fractional or non-numeric values.
pub fn parse_seconds(raw: Option<&RawSeconds>) -> std::result::Result<Option<i64>, String> {
    let secs = match raw {
        None => return Ok(None),
        Some(RawSeconds::Integer(n)) => *n,
        Some(RawSeconds::Real(f)) if f.is_finite() && f.fract() == 0.0 => *f as i64,
        Some(RawSeconds::Real(f)) => return Err(format!("non-integer seconds {}", f)),
        Some(RawSeconds::Text(t)) => match t.trim() {
            v if v.is_empty() || v == NULL_SENTINEL => return Ok(None),
            v => v
                .parse::<i64>()
                .map_err(|_| format!("non-numeric seconds {:?}", v))?,
        },
    };

    if secs < 0 {
        return Err(format!("negative seconds {}", secs));
    }
    Ok(Some(secs))
}

fn text(raw: &Option<String>) -> Option<String> {
    match raw.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() && v != NULL_SENTINEL => Some(v.to_string()),
        _ => None,
    }
}

impl RawCallRow {
    /// Translate sentinels and parse typed fields.
    ///
    /// Malformed optional fields are dropped and counted in `stats`. Returns
    /// `None` when `start_time` is unusable, since such a record has no key.
    pub fn normalize(&self, id: i64, stats: &mut MalformedStats) -> Option<CallRecord> {
        let start_time = match parse_timestamp(Some(self.start_time.as_str())) {
            Ok(Some(t)) => t,
            Ok(None) | Err(_) => {
                tracing::warn!(
                    record_id = id,
                    start_time = %self.start_time,
                    "Skipping call record with unusable start_time"
                );
                stats.start_time += 1;
                stats.records_skipped += 1;
                return None;
            }
        };

        // An unparseable answer time leaves the call unanswered
        let answer_time = match parse_timestamp(self.answer_time.as_deref()) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(record_id = id, error = %e, "Malformed answer_time");
                stats.answer_time += 1;
                None
            }
        };

        let end_time = match parse_timestamp(self.end_time.as_deref()) {
            Ok(Some(end)) if end < start_time => {
                tracing::warn!(record_id = id, %end, %start_time, "end_time precedes start_time");
                stats.end_time += 1;
                None
            }
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(record_id = id, error = %e, "Malformed end_time");
                stats.end_time += 1;
                None
            }
        };

        let talk_time = match parse_seconds(self.talk_time.as_ref()) {
            Ok(secs) => secs,
            Err(e) => {
                tracing::warn!(record_id = id, error = %e, "Malformed talk_time");
                stats.talk_time += 1;
                None
            }
        };

        let post_call_time = match parse_seconds(self.post_call_time.as_ref()) {
            Ok(secs) => secs,
            Err(e) => {
                tracing::warn!(record_id = id, error = %e, "Malformed post_call_time");
                stats.post_call_time += 1;
                None
            }
        };

        Some(CallRecord {
            id,
            client_id: self.client_id.trim().to_string(),
            agent_id: text(&self.agent_id),
            agent_name: text(&self.agent_name),
            start_time,
            answer_time,
            end_time,
            talk_time,
            post_call_time,
            status: self.status.clone(),
            direction: text(&self.direction),
            marker_type: text(&self.marker_type),
            campaign_name: text(&self.campaign_name),
        })
    }
}

/// Scan `source` and hand every classified record to `sink`.
///
/// Records before `filter.since` are dropped even if the source returned
/// them. Any failure to read the source is reported as
/// [`Error::SourceUnavailable`]. Nothing has been written at that point.
pub fn extract(
    source: &dyn CallSource,
    filter: &ScanFilter<'_>,
    sink: &mut dyn FnMut(ClassifiedRecord),
) -> Result<ExtractStats> {
    let mut stats = ExtractStats::default();

    source
        .scan_calls(filter, &mut |source_row| {
            stats.records_scanned += 1;
            let Some(record) = source_row.row.normalize(source_row.id, &mut stats.malformed)
            else {
                return;
            };
            // The pushed-down predicate compares text; recheck on the parsed value
            if filter.since.is_some_and(|since| record.start_time < since) {
                return;
            }
            stats.records_classified += 1;
            sink(ClassifiedRecord::classify(record, source_row.client_name));
        })
        .map_err(|e| match e {
            Error::SourceUnavailable(_) => e,
            other => Error::SourceUnavailable(other.to_string()),
        })?;

    tracing::debug!(
        records_scanned = stats.records_scanned,
        records_classified = stats.records_classified,
        malformed = stats.malformed.total(),
        "Extraction complete"
    );

    Ok(stats)
}
