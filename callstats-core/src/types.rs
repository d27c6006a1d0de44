//! Core domain types for callstats
//!
//! These types describe the three layers the summary engine works across:
//! - **Source:** raw call rows as the telephony platform writes them ([`RawCallRow`])
//! - **Canonical:** normalized, typed records ([`CallRecord`], [`ClassifiedRecord`])
//! - **Derived:** per-hour aggregates keyed by [`GroupKey`] ([`MetricGroup`])
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Client** | The customer account a call is handled for |
//! | **Marker** | A classification tag the platform attaches to a call |
//! | **Handle time** | Wall-clock time from call start to call end |
//! | **After-call work** | Post-call administrative time logged by an agent |
//! | **Abandonment bucket** | A fixed range of ring/wait seconds for an unanswered call |

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used for absent text dimensions in a group key.
///
/// A null value and the placeholder group together.
pub const PLACEHOLDER: &str = "N/A";

/// Number of abandonment buckets.
pub const BUCKET_COUNT: usize = 14;

// ============================================
// Refresh modes
// ============================================

/// Which refresh strategy produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Whole-table recompute and replace
    Full,
    /// Trailing-window recompute of the touched keys only
    Incremental,
}

impl RefreshMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshMode::Full => "full",
            RefreshMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(RefreshMode::Full),
            "incremental" => Ok(RefreshMode::Incremental),
            _ => Err(format!("unknown refresh mode: {}", s)),
        }
    }
}

/// What an incremental refresh does with summary rows outside its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Rows outside the window keep their last computed values forever.
    #[default]
    PinLastKnown,
    /// Rows whose call date is older than `max_age_days` are deleted.
    Expire { max_age_days: u32 },
}

// ============================================
// Source layer
// ============================================

/// A call row exactly as stored by the telephony platform.
///
/// Text columns may carry the `\N` sentinel and timestamp columns may carry
/// the zero date (`0000-00-00 00:00:00`). Nothing past
/// [`crate::summary::extract`] sees these sentinels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCallRow {
    pub client_id: String,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS`, local wall-clock time
    pub start_time: String,
    pub answer_time: Option<String>,
    pub end_time: Option<String>,
    /// Seconds
    pub talk_time: Option<RawSeconds>,
    /// Seconds of after-call work
    pub post_call_time: Option<RawSeconds>,
    pub status: String,
    pub direction: Option<String>,
    pub marker_type: Option<String>,
    pub campaign_name: Option<String>,
}

/// A duration column exactly as the source stored it.
///
/// SQLite columns are dynamically typed, so an INTEGER column can still hold
/// `'12s'` or `7.5`. Whether the value is usable is decided during
/// normalization, where unusable values are counted as malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSeconds {
    Integer(i64),
    Real(f64),
    Text(String),
}

/// Client reference data, joined onto call records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub client_id: String,
    pub client_name: Option<String>,
}

// ============================================
// Canonical layer
// ============================================

/// A normalized call record with explicit optional values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Source row id
    pub id: i64,
    pub client_id: String,
    /// `None` when no agent was assigned
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub start_time: NaiveDateTime,
    /// `None` when the call was never answered
    pub answer_time: Option<NaiveDateTime>,
    /// `None` when unset or unusable; never earlier than `start_time`
    pub end_time: Option<NaiveDateTime>,
    /// Seconds; `None` when unset or out of range
    pub talk_time: Option<i64>,
    /// Seconds; `None` when unset or out of range
    pub post_call_time: Option<i64>,
    pub status: String,
    pub direction: Option<String>,
    pub marker_type: Option<String>,
    pub campaign_name: Option<String>,
}

impl CallRecord {
    /// Handle time in seconds, if the end time is known.
    pub fn handle_time_secs(&self) -> Option<i64> {
        self.end_time
            .map(|end| end.signed_duration_since(self.start_time).num_seconds())
    }
}

/// A call record tagged as answered or unanswered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRecord {
    pub record: CallRecord,
    /// From the client reference join; `None` when the client is unknown
    pub client_name: Option<String>,
    pub answered: bool,
}

impl ClassifiedRecord {
    /// Classify a record: answered means an agent was assigned and the call
    /// has an answer time.
    pub fn classify(record: CallRecord, client_name: Option<String>) -> Self {
        let answered = record.agent_id.is_some() && record.answer_time.is_some();
        Self {
            record,
            client_name,
            answered,
        }
    }
}

// ============================================
// Derived layer
// ============================================

/// The dimension key of a summary row.
///
/// Every text dimension is normalized to [`PLACEHOLDER`] when absent, so the
/// key is total and two keys compare equal exactly when their stored rows
/// would.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub client_id: String,
    pub direction: String,
    pub marker_type: String,
    pub agent_id: String,
    pub agent_name: String,
    pub campaign_name: String,
    pub call_date: NaiveDate,
    pub call_hour: u32,
}

impl GroupKey {
    /// Derive the key for a record, truncating its start time to the hour.
    pub fn for_record(record: &CallRecord) -> Self {
        Self {
            client_id: record.client_id.clone(),
            direction: or_placeholder(record.direction.as_deref()),
            marker_type: or_placeholder(record.marker_type.as_deref()),
            agent_id: or_placeholder(record.agent_id.as_deref()),
            agent_name: or_placeholder(record.agent_name.as_deref()),
            campaign_name: or_placeholder(record.campaign_name.as_deref()),
            call_date: record.start_time.date(),
            call_hour: record.start_time.hour(),
        }
    }
}

/// Returns the value, or the placeholder when it is absent or blank.
pub fn or_placeholder(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => PLACEHOLDER.to_string(),
    }
}

/// Counts of unanswered calls by how long they rang before abandonment.
///
/// Ranges are closed, disjoint and contiguous; the last one is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AbandonBuckets {
    counts: [i64; BUCKET_COUNT],
}

impl AbandonBuckets {
    /// Inclusive upper bound of every bucket except the last.
    pub const UPPER_BOUNDS: [i64; BUCKET_COUNT - 1] =
        [5, 10, 15, 20, 25, 30, 40, 50, 60, 120, 180, 240, 300];

    /// Column names in the summary table, in bucket order.
    pub const COLUMNS: [&'static str; BUCKET_COUNT] = [
        "abandon_0_5",
        "abandon_6_10",
        "abandon_11_15",
        "abandon_16_20",
        "abandon_21_25",
        "abandon_26_30",
        "abandon_31_40",
        "abandon_41_50",
        "abandon_51_60",
        "abandon_61_120",
        "abandon_121_180",
        "abandon_181_240",
        "abandon_241_300",
        "abandon_over_300",
    ];

    /// Index of the bucket a non-negative talk time falls into.
    pub fn bucket_index(talk_time_secs: i64) -> usize {
        Self::UPPER_BOUNDS
            .iter()
            .position(|&upper| talk_time_secs <= upper)
            .unwrap_or(BUCKET_COUNT - 1)
    }

    /// Count one abandoned call.
    pub fn record(&mut self, talk_time_secs: i64) {
        self.counts[Self::bucket_index(talk_time_secs)] += 1;
    }

    pub fn from_counts(counts: [i64; BUCKET_COUNT]) -> Self {
        Self { counts }
    }

    pub fn counts(&self) -> &[i64; BUCKET_COUNT] {
        &self.counts
    }

    /// Count for the bucket stored in `column`.
    pub fn get(&self, column: &str) -> Option<i64> {
        Self::COLUMNS
            .iter()
            .position(|c| *c == column)
            .map(|i| self.counts[i])
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// Human-readable range label for a bucket, e.g. `"6-10s"`.
    pub fn label(index: usize) -> String {
        match index {
            0 => format!("0-{}s", Self::UPPER_BOUNDS[0]),
            i if i < BUCKET_COUNT - 1 => {
                format!("{}-{}s", Self::UPPER_BOUNDS[i - 1] + 1, Self::UPPER_BOUNDS[i])
            }
            _ => format!("{}s+", Self::UPPER_BOUNDS[BUCKET_COUNT - 2] + 1),
        }
    }
}

/// Aggregated metrics for one group key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricGroup {
    pub key: GroupKey,
    pub client_name: Option<String>,
    pub total_calls: i64,
    pub total_answered: i64,
    pub total_unanswered: i64,
    pub buckets: AbandonBuckets,
    /// Unanswered calls whose talk time was missing or out of range
    pub abandoned_unknown: i64,
    /// Mean of end - start over all calls with a known end time
    pub avg_handle_time_sec: Option<f64>,
    /// Mean after-call work over answered calls only; `None` if there are none
    pub avg_after_call_work_sec: Option<f64>,
}

/// A persisted summary row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    #[serde(flatten)]
    pub group: MetricGroup,
    pub computed_at: DateTime<Utc>,
}
