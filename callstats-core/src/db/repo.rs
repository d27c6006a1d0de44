//! Database repository layer
//!
//! Provides query and insert operations for the source tables, the summary
//! table and the refresh run log.

use crate::error::{Error, Result};
use crate::summary::extract::{CallSource, ScanFilter, SourceRow, TIMESTAMP_FORMAT};
use crate::summary::{RefreshOutcome, RefreshRun, RefreshRunStatus};
use crate::types::*;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SUMMARY_ORDER: &str =
    "call_date, call_hour, client_id, direction, marker_type, agent_id, agent_name, campaign_name";

/// Filter for summary listings.
#[derive(Debug, Default, Clone)]
pub struct SummaryFilter {
    /// Only rows for this call date
    pub call_date: Option<NaiveDate>,
    /// Only rows for this client
    pub client_id: Option<String>,
    /// Maximum number of rows to return
    pub limit: Option<usize>,
}

/// Database handle with a single guarded connection
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets dashboard readers keep reading the previous summary while
        // a refresh transaction is open
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Source operations
    // ============================================

    /// Insert or update a client reference
    pub fn upsert_client(&self, client: &ClientRef) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO clients (client_id, client_name)
            VALUES (?1, ?2)
            ON CONFLICT(client_id) DO UPDATE SET
                client_name = excluded.client_name
            "#,
            params![client.client_id, client.client_name],
        )?;
        Ok(())
    }

    /// Append multiple call rows in a transaction
    pub fn insert_call_records(&self, rows: &[RawCallRow]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        for row in rows {
            Self::write_call_row(&tx, row)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn write_call_row(conn: &Connection, row: &RawCallRow) -> rusqlite::Result<usize> {
        conn.execute(
            r#"
            INSERT INTO call_records (client_id, agent_id, agent_name, start_time, answer_time,
                                      end_time, talk_time, post_call_time, status, direction,
                                      marker_type, campaign_name)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                row.client_id,
                row.agent_id,
                row.agent_name,
                row.start_time,
                row.answer_time,
                row.end_time,
                row.talk_time,
                row.post_call_time,
                row.status,
                row.direction,
                row.marker_type,
                row.campaign_name,
            ],
        )
    }

    /// Count all call rows in the source table
    pub fn count_call_records(&self) -> Result<i64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM call_records", [], |r| r.get(0))?;
        Ok(count)
    }

    // Source columns are read by storage class rather than declared type, so
    // a stray value becomes a malformed field instead of a failed scan.
    fn row_to_source_row(row: &Row) -> rusqlite::Result<SourceRow> {
        Ok(SourceRow {
            id: row.get("id")?,
            client_name: text_column(row, "client_name")?,
            row: RawCallRow {
                client_id: text_column(row, "client_id")?.unwrap_or_default(),
                agent_id: text_column(row, "agent_id")?,
                agent_name: text_column(row, "agent_name")?,
                start_time: text_column(row, "start_time")?.unwrap_or_default(),
                answer_time: text_column(row, "answer_time")?,
                end_time: text_column(row, "end_time")?,
                talk_time: seconds_column(row, "talk_time")?,
                post_call_time: seconds_column(row, "post_call_time")?,
                status: text_column(row, "status")?.unwrap_or_default(),
                direction: text_column(row, "direction")?,
                marker_type: text_column(row, "marker_type")?,
                campaign_name: text_column(row, "campaign_name")?,
            },
        })
    }

    // ============================================
    // Summary operations
    // ============================================

    /// List summary rows in key order
    pub fn list_summary(&self, filter: &SummaryFilter) -> Result<Vec<SummaryRow>> {
        let conn = self.lock();

        let mut sql = String::from("SELECT * FROM call_summary WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(date) = &filter.call_date {
            sql.push_str(" AND call_date = ?");
            params.push(Box::new(date.format(DATE_FORMAT).to_string()));
        }

        if let Some(client_id) = &filter.client_id {
            sql.push_str(" AND client_id = ?");
            params.push(Box::new(client_id.clone()));
        }

        sql.push_str(&format!(" ORDER BY {}", SUMMARY_ORDER));

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_refs.as_slice(), Self::row_to_summary)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Get the summary row for one key
    pub fn get_summary_row(&self, key: &GroupKey) -> Result<Option<SummaryRow>> {
        let conn = self.lock();
        conn.query_row(
            r#"
            SELECT * FROM call_summary
            WHERE client_id = ?1 AND direction = ?2 AND marker_type = ?3 AND agent_id = ?4
              AND agent_name = ?5 AND campaign_name = ?6 AND call_date = ?7 AND call_hour = ?8
            "#,
            params![
                key.client_id,
                key.direction,
                key.marker_type,
                key.agent_id,
                key.agent_name,
                key.campaign_name,
                key.call_date.format(DATE_FORMAT).to_string(),
                key.call_hour,
            ],
            Self::row_to_summary,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Count rows in the summary table
    pub fn count_summary_rows(&self) -> Result<i64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM call_summary", [], |r| r.get(0))?;
        Ok(count)
    }

    /// SHA-256 digest of the summary table contents.
    ///
    /// Rows are hashed in key order without `computed_at`, so two refreshes
    /// over the same source produce the same digest.
    pub fn summary_digest(&self) -> Result<String> {
        let rows = self.list_summary(&SummaryFilter::default())?;
        let mut hasher = Sha256::new();
        for row in &rows {
            hasher.update(serde_json::to_vec(&row.group)?);
            hasher.update(b"\n");
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Insert one summary row. Callers run this inside a reconciliation
    /// transaction after removing any previous row for the key.
    pub(crate) fn write_summary_row(
        conn: &Connection,
        group: &MetricGroup,
        computed_at: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        let key = &group.key;
        let b = group.buckets.counts();
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO call_summary (client_id, direction, marker_type, agent_id, agent_name,
                                      campaign_name, call_date, call_hour, client_name,
                                      total_calls, total_answered, total_unanswered,
                                      abandon_0_5, abandon_6_10, abandon_11_15, abandon_16_20,
                                      abandon_21_25, abandon_26_30, abandon_31_40, abandon_41_50,
                                      abandon_51_60, abandon_61_120, abandon_121_180,
                                      abandon_181_240, abandon_241_300, abandon_over_300,
                                      abandoned_unknown, avg_handle_time_sec,
                                      avg_after_call_work_sec, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                    ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)
            "#,
        )?;
        stmt.execute(params![
            key.client_id,
            key.direction,
            key.marker_type,
            key.agent_id,
            key.agent_name,
            key.campaign_name,
            key.call_date.format(DATE_FORMAT).to_string(),
            key.call_hour,
            group.client_name,
            group.total_calls,
            group.total_answered,
            group.total_unanswered,
            b[0],
            b[1],
            b[2],
            b[3],
            b[4],
            b[5],
            b[6],
            b[7],
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            group.abandoned_unknown,
            group.avg_handle_time_sec,
            group.avg_after_call_work_sec,
            computed_at.to_rfc3339(),
        ])?;
        Ok(())
    }

    /// Delete the summary row for one key, returning how many rows went away.
    pub(crate) fn delete_summary_row(conn: &Connection, key: &GroupKey) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(
            r#"
            DELETE FROM call_summary
            WHERE client_id = ?1 AND direction = ?2 AND marker_type = ?3 AND agent_id = ?4
              AND agent_name = ?5 AND campaign_name = ?6 AND call_date = ?7 AND call_hour = ?8
            "#,
        )?;
        stmt.execute(params![
            key.client_id,
            key.direction,
            key.marker_type,
            key.agent_id,
            key.agent_name,
            key.campaign_name,
            key.call_date.format(DATE_FORMAT).to_string(),
            key.call_hour,
        ])
    }

    /// Delete every summary row.
    pub(crate) fn clear_summary(conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute("DELETE FROM call_summary", [])
    }

    /// Delete summary rows with a call date before `cutoff`.
    pub(crate) fn expire_summary_before(
        conn: &Connection,
        cutoff: NaiveDate,
    ) -> rusqlite::Result<usize> {
        conn.execute(
            "DELETE FROM call_summary WHERE call_date < ?1",
            [cutoff.format(DATE_FORMAT).to_string()],
        )
    }

    fn row_to_summary(row: &Row) -> rusqlite::Result<SummaryRow> {
        let call_date_str: String = row.get("call_date")?;
        let computed_at_str: String = row.get("computed_at")?;

        let call_date = NaiveDate::parse_from_str(&call_date_str, DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let mut counts = [0i64; BUCKET_COUNT];
        for (slot, column) in counts.iter_mut().zip(AbandonBuckets::COLUMNS) {
            *slot = row.get(column)?;
        }

        Ok(SummaryRow {
            group: MetricGroup {
                key: GroupKey {
                    client_id: row.get("client_id")?,
                    direction: row.get("direction")?,
                    marker_type: row.get("marker_type")?,
                    agent_id: row.get("agent_id")?,
                    agent_name: row.get("agent_name")?,
                    campaign_name: row.get("campaign_name")?,
                    call_date,
                    call_hour: row.get("call_hour")?,
                },
                client_name: row.get("client_name")?,
                total_calls: row.get("total_calls")?,
                total_answered: row.get("total_answered")?,
                total_unanswered: row.get("total_unanswered")?,
                buckets: AbandonBuckets::from_counts(counts),
                abandoned_unknown: row.get("abandoned_unknown")?,
                avg_handle_time_sec: row.get("avg_handle_time_sec")?,
                avg_after_call_work_sec: row.get("avg_after_call_work_sec")?,
            },
            computed_at: DateTime::parse_from_rfc3339(&computed_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    // ============================================
    // Refresh run log
    // ============================================

    /// Insert a refresh run record for observability.
    ///
    /// Returns the ID of the inserted record.
    pub fn insert_refresh_run(&self, run: &RefreshRun) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO refresh_runs (run_id, mode, started_at, duration_ms, status, outcome,
                                      error_message, window_start, records_scanned,
                                      malformed_records, groups_written, rows_deleted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                run.run_id,
                run.mode.as_str(),
                run.started_at.to_rfc3339(),
                run.duration_ms,
                run.status.as_str(),
                run.outcome.map(|o| o.as_str()),
                run.error_message,
                run.window_start
                    .map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
                run.records_scanned as i64,
                run.malformed_records as i64,
                run.groups_written as i64,
                run.rows_deleted as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get the most recent refresh runs, newest first.
    pub fn get_refresh_runs(&self, limit: usize) -> Result<Vec<RefreshRun>> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT run_id, mode, started_at, duration_ms, status, outcome, error_message,
                   window_start, records_scanned, malformed_records, groups_written, rows_deleted
            FROM refresh_runs
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )?;

        let runs = stmt
            .query_map([limit as i64], |row| {
                let mode_str: String = row.get(1)?;
                let started_at_str: String = row.get(2)?;
                let status_str: String = row.get(4)?;
                let outcome_str: Option<String> = row.get(5)?;
                let window_start_str: Option<String> = row.get(7)?;
                Ok(RefreshRun {
                    run_id: row.get(0)?,
                    mode: mode_str.parse().unwrap_or(RefreshMode::Incremental),
                    started_at: DateTime::parse_from_rfc3339(&started_at_str)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    duration_ms: row.get(3)?,
                    status: RefreshRunStatus::from_storage(&status_str),
                    outcome: outcome_str.as_deref().and_then(RefreshOutcome::from_storage),
                    error_message: row.get(6)?,
                    window_start: window_start_str.and_then(|s| {
                        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).ok()
                    }),
                    records_scanned: row.get::<_, i64>(8)? as usize,
                    malformed_records: row.get::<_, i64>(9)? as usize,
                    groups_written: row.get::<_, i64>(10)? as usize,
                    rows_deleted: row.get::<_, i64>(11)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}

impl CallSource for Database {
    fn scan_calls(&self, filter: &ScanFilter<'_>, visit: &mut dyn FnMut(SourceRow)) -> Result<()> {
        let conn = self.lock();

        let mut sql = String::from(
            r#"
            SELECT c.id, c.client_id, c.agent_id, c.agent_name, c.start_time, c.answer_time,
                   c.end_time, c.talk_time, c.post_call_time, c.status, c.direction,
                   c.marker_type, c.campaign_name, cl.client_name
            FROM call_records c
            LEFT JOIN clients cl ON cl.client_id = c.client_id
            WHERE 1=1
            "#,
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(since) = &filter.since {
            sql.push_str(" AND c.start_time >= ?");
            params.push(Box::new(since.format(TIMESTAMP_FORMAT).to_string()));
        }

        if !filter.excluded_statuses.is_empty() {
            let placeholders = vec!["?"; filter.excluded_statuses.len()].join(", ");
            sql.push_str(&format!(" AND c.status NOT IN ({})", placeholders));
            for status in filter.excluded_statuses {
                params.push(Box::new(status.clone()));
            }
        }

        sql.push_str(" ORDER BY c.id");

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_refs.as_slice())?;
        while let Some(row) = rows.next()? {
            visit(Self::row_to_source_row(row)?);
        }

        Ok(())
    }
}

fn text_column(row: &Row, column: &str) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(column)? {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(n.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    })
}

fn seconds_column(row: &Row, column: &str) -> rusqlite::Result<Option<RawSeconds>> {
    Ok(match row.get_ref(column)? {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(RawSeconds::Integer(n)),
        ValueRef::Real(f) => Some(RawSeconds::Real(f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(RawSeconds::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    })
}

impl ToSql for RawSeconds {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            RawSeconds::Integer(n) => ToSqlOutput::Owned(Value::Integer(*n)),
            RawSeconds::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            RawSeconds::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_row(client_id: &str, start_time: &str, status: &str) -> RawCallRow {
        RawCallRow {
            client_id: client_id.to_string(),
            agent_id: Some("1001".to_string()),
            agent_name: Some("Ana".to_string()),
            start_time: start_time.to_string(),
            answer_time: Some(start_time.to_string()),
            end_time: Some(start_time.to_string()),
            talk_time: Some(RawSeconds::Integer(60)),
            post_call_time: Some(RawSeconds::Integer(10)),
            status: status.to_string(),
            direction: Some("inbound".to_string()),
            marker_type: Some("sale".to_string()),
            campaign_name: None,
        }
    }

    fn create_test_group(client_id: &str, hour: u32, total_calls: i64) -> MetricGroup {
        let mut buckets = AbandonBuckets::default();
        buckets.record(7);
        MetricGroup {
            key: GroupKey {
                client_id: client_id.to_string(),
                direction: "inbound".to_string(),
                marker_type: PLACEHOLDER.to_string(),
                agent_id: PLACEHOLDER.to_string(),
                agent_name: PLACEHOLDER.to_string(),
                campaign_name: PLACEHOLDER.to_string(),
                call_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                call_hour: hour,
            },
            client_name: Some("Acme".to_string()),
            total_calls,
            total_answered: total_calls - 1,
            total_unanswered: 1,
            buckets,
            abandoned_unknown: 0,
            avg_handle_time_sec: Some(42.5),
            avg_after_call_work_sec: None,
        }
    }

    fn scan(db: &Database, filter: &ScanFilter<'_>) -> Vec<SourceRow> {
        let mut rows = Vec::new();
        db.scan_calls(filter, &mut |row| rows.push(row)).unwrap();
        rows
    }

    #[test]
    fn test_scan_joins_client_and_filters() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        db.upsert_client(&ClientRef {
            client_id: "acme".to_string(),
            client_name: Some("Acme Corp".to_string()),
        })
        .unwrap();
        db.insert_call_records(&[
            create_test_row("acme", "2024-03-05 09:00:00", "completed"),
            create_test_row("acme", "2024-03-05 11:30:00", "recording"),
            create_test_row("ghost", "2024-03-05 12:15:00", "completed"),
        ])
        .unwrap();
        assert_eq!(db.count_call_records().unwrap(), 3);

        let excluded = vec!["recording".to_string()];
        let rows = scan(
            &db,
            &ScanFilter {
                since: None,
                excluded_statuses: &excluded,
            },
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].client_name.as_deref(), Some("Acme Corp"));
        // Missing client is tolerated by the left join
        assert_eq!(rows[1].row.client_id, "ghost");
        assert_eq!(rows[1].client_name, None);

        let since = NaiveDateTime::parse_from_str("2024-03-05 10:00:00", TIMESTAMP_FORMAT).unwrap();
        let rows = scan(
            &db,
            &ScanFilter {
                since: Some(since),
                excluded_statuses: &excluded,
            },
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.start_time, "2024-03-05 12:15:00");

        let rows = scan(
            &db,
            &ScanFilter {
                since: Some(since),
                excluded_statuses: &[],
            },
        );
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_scan_keeps_loosely_typed_columns() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        db.connection()
            .execute_batch(
                r#"
                INSERT INTO call_records (client_id, agent_id, start_time, answer_time,
                                          talk_time, post_call_time, status)
                VALUES ('acme', 1001, '2024-03-05 09:00:00', 20240305, '12s', 7.5, 'completed');
                "#,
            )
            .unwrap();

        let rows = scan(
            &db,
            &ScanFilter {
                since: None,
                excluded_statuses: &[],
            },
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0].row;
        // TEXT affinity stores the integer agent id as text
        assert_eq!(row.agent_id.as_deref(), Some("1001"));
        assert_eq!(row.answer_time.as_deref(), Some("20240305"));
        assert_eq!(row.talk_time, Some(RawSeconds::Text("12s".to_string())));
        assert_eq!(row.post_call_time, Some(RawSeconds::Real(7.5)));
    }

    #[test]
    fn test_summary_row_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        let group = create_test_group("acme", 14, 5);
        let computed_at = Utc::now();
        {
            let conn = db.connection();
            Database::write_summary_row(&conn, &group, computed_at).unwrap();
        }

        let row = db.get_summary_row(&group.key).unwrap().expect("row exists");
        assert_eq!(row.group, group);
        assert_eq!(row.group.avg_after_call_work_sec, None);
        assert_eq!(db.count_summary_rows().unwrap(), 1);

        let deleted = Database::delete_summary_row(&db.connection(), &group.key).unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_summary_row(&group.key).unwrap().is_none());
    }

    #[test]
    fn test_list_summary_filters_and_orders() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        {
            let conn = db.connection();
            let now = Utc::now();
            Database::write_summary_row(&conn, &create_test_group("zeta", 9, 1), now).unwrap();
            Database::write_summary_row(&conn, &create_test_group("acme", 15, 2), now).unwrap();
            Database::write_summary_row(&conn, &create_test_group("acme", 9, 3), now).unwrap();
        }

        let all = db.list_summary(&SummaryFilter::default()).unwrap();
        let order: Vec<(String, u32)> = all
            .iter()
            .map(|r| (r.group.key.client_id.clone(), r.group.key.call_hour))
            .collect();
        assert_eq!(
            order,
            vec![
                ("acme".to_string(), 9),
                ("zeta".to_string(), 9),
                ("acme".to_string(), 15)
            ]
        );

        let acme = db
            .list_summary(&SummaryFilter {
                client_id: Some("acme".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(acme.len(), 2);

        let other_day = db
            .list_summary(&SummaryFilter {
                call_date: NaiveDate::from_ymd_opt(2024, 3, 6),
                ..Default::default()
            })
            .unwrap();
        assert!(other_day.is_empty());
    }

    #[test]
    fn test_summary_digest_ignores_computed_at() {
        let a = Database::open_in_memory().unwrap();
        a.migrate().unwrap();
        let b = Database::open_in_memory().unwrap();
        b.migrate().unwrap();

        let group = create_test_group("acme", 14, 5);
        Database::write_summary_row(&a.connection(), &group, Utc::now()).unwrap();
        Database::write_summary_row(
            &b.connection(),
            &group,
            Utc::now() - chrono::Duration::hours(3),
        )
        .unwrap();

        assert_eq!(a.summary_digest().unwrap(), b.summary_digest().unwrap());

        Database::clear_summary(&b.connection()).unwrap();
        assert_ne!(a.summary_digest().unwrap(), b.summary_digest().unwrap());
    }

    #[test]
    fn test_refresh_run_log() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        let run = RefreshRun {
            run_id: "run-1".to_string(),
            mode: RefreshMode::Incremental,
            started_at: Utc::now(),
            duration_ms: 12,
            status: RefreshRunStatus::Success,
            outcome: Some(RefreshOutcome::EmptyWindow),
            error_message: None,
            window_start: NaiveDateTime::parse_from_str("2024-03-05 12:00:00", TIMESTAMP_FORMAT)
                .ok(),
            records_scanned: 0,
            malformed_records: 0,
            groups_written: 0,
            rows_deleted: 0,
        };
        db.insert_refresh_run(&run).unwrap();

        let runs = db.get_refresh_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run-1");
        assert_eq!(runs[0].mode, RefreshMode::Incremental);
        assert_eq!(runs[0].outcome, Some(RefreshOutcome::EmptyWindow));
        assert_eq!(runs[0].window_start, run.window_start);
    }
}
