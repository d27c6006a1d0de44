//! Reconciliation: merging computed groups into `call_summary`
//!
//! Each cycle is one transaction. On an insert failure the transaction is
//! rolled back explicitly and the table keeps its previous contents.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{MetricGroup, RefreshMode, RetentionPolicy};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;

/// Row counts from one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub groups_written: usize,
    pub rows_deleted: usize,
}

/// Replace the whole summary table with `groups`.
pub fn full_replace(
    db: &Database,
    groups: &[MetricGroup],
    computed_at: DateTime<Utc>,
) -> Result<ReconcileStats> {
    in_transaction(db, RefreshMode::Full, |conn| {
        let rows_deleted = Database::clear_summary(conn)?;
        for group in groups {
            Database::write_summary_row(conn, group, computed_at)?;
        }
        Ok(ReconcileStats {
            groups_written: groups.len(),
            rows_deleted,
        })
    })
}

/// Replace the rows for exactly the keys in `groups`.
///
/// Rows for other keys are left alone unless `retention` expires them
/// relative to `today`.
pub fn replace_keys(
    db: &Database,
    groups: &[MetricGroup],
    retention: RetentionPolicy,
    today: NaiveDate,
    computed_at: DateTime<Utc>,
) -> Result<ReconcileStats> {
    in_transaction(db, RefreshMode::Incremental, |conn| {
        let mut rows_deleted = 0;

        for group in groups {
            rows_deleted += Database::delete_summary_row(conn, &group.key)?;
        }

        if let RetentionPolicy::Expire { max_age_days } = retention {
            let cutoff = today - chrono::Duration::days(i64::from(max_age_days));
            let expired = Database::expire_summary_before(conn, cutoff)?;
            if expired > 0 {
                tracing::info!(expired, %cutoff, "Expired summary rows past retention");
            }
            rows_deleted += expired;
        }

        for group in groups {
            Database::write_summary_row(conn, group, computed_at)?;
        }

        Ok(ReconcileStats {
            groups_written: groups.len(),
            rows_deleted,
        })
    })
}

fn in_transaction<F>(db: &Database, mode: RefreshMode, work: F) -> Result<ReconcileStats>
where
    F: FnOnce(&Connection) -> rusqlite::Result<ReconcileStats>,
{
    let mut conn = db.connection();
    let tx = conn
        .transaction()
        .map_err(|source| Error::Reconciliation { mode, source })?;

    match work(&tx) {
        Ok(stats) => {
            tx.commit()
                .map_err(|source| Error::Reconciliation { mode, source })?;
            tracing::debug!(
                %mode,
                groups_written = stats.groups_written,
                rows_deleted = stats.rows_deleted,
                "Reconciliation committed"
            );
            Ok(stats)
        }
        Err(source) => Err(failure(mode, source, tx.rollback())),
    }
}

/// Classify a failed reconciliation by whether its rollback completed.
fn failure(mode: RefreshMode, source: rusqlite::Error, rollback: rusqlite::Result<()>) -> Error {
    match rollback {
        Ok(()) => {
            tracing::error!(%mode, error = %source, "Reconciliation failed, rolled back");
            Error::Reconciliation { mode, source }
        }
        Err(rollback_err) => {
            tracing::error!(
                %mode,
                error = %source,
                rollback_error = %rollback_err,
                "Reconciliation failed and rollback did not complete"
            );
            Error::PartialReconciliation {
                mode,
                message: format!("{}; rollback failed: {}", source, rollback_err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AbandonBuckets, GroupKey, PLACEHOLDER};

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn group(client_id: &str, date: &str, hour: u32, total_calls: i64) -> MetricGroup {
        MetricGroup {
            key: GroupKey {
                client_id: client_id.to_string(),
                direction: "inbound".to_string(),
                marker_type: PLACEHOLDER.to_string(),
                agent_id: "1001".to_string(),
                agent_name: PLACEHOLDER.to_string(),
                campaign_name: PLACEHOLDER.to_string(),
                call_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                call_hour: hour,
            },
            client_name: None,
            total_calls,
            total_answered: total_calls,
            total_unanswered: 0,
            buckets: AbandonBuckets::default(),
            abandoned_unknown: 0,
            avg_handle_time_sec: Some(60.0),
            avg_after_call_work_sec: Some(10.0),
        }
    }

    fn install_failing_insert(db: &Database) {
        db.connection()
            .execute_batch(
                "CREATE TRIGGER fail_boom BEFORE INSERT ON call_summary
                 WHEN NEW.client_id = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    #[test]
    fn test_full_replace_mirrors_input() {
        let db = db();
        full_replace(
            &db,
            &[group("a", "2024-03-05", 9, 1), group("b", "2024-03-05", 9, 2)],
            Utc::now(),
        )
        .unwrap();

        let stats = full_replace(&db, &[group("a", "2024-03-05", 9, 5)], Utc::now()).unwrap();
        assert_eq!(stats.rows_deleted, 2);
        assert_eq!(stats.groups_written, 1);
        assert_eq!(db.count_summary_rows().unwrap(), 1);

        let row = db
            .get_summary_row(&group("a", "2024-03-05", 9, 5).key)
            .unwrap()
            .unwrap();
        assert_eq!(row.group.total_calls, 5);
    }

    #[test]
    fn test_replace_keys_leaves_other_rows() {
        let db = db();
        full_replace(
            &db,
            &[group("a", "2024-03-05", 9, 1), group("a", "2024-03-05", 10, 2)],
            Utc::now(),
        )
        .unwrap();

        let stats = replace_keys(
            &db,
            &[group("a", "2024-03-05", 10, 7), group("a", "2024-03-05", 11, 3)],
            RetentionPolicy::PinLastKnown,
            today(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(stats.rows_deleted, 1);
        assert_eq!(stats.groups_written, 2);
        assert_eq!(db.count_summary_rows().unwrap(), 3);

        let untouched = db
            .get_summary_row(&group("a", "2024-03-05", 9, 0).key)
            .unwrap()
            .unwrap();
        assert_eq!(untouched.group.total_calls, 1);
        let replaced = db
            .get_summary_row(&group("a", "2024-03-05", 10, 0).key)
            .unwrap()
            .unwrap();
        assert_eq!(replaced.group.total_calls, 7);
    }

    #[test]
    fn test_expire_retention_drops_old_rows() {
        let db = db();
        full_replace(
            &db,
            &[group("a", "2024-01-01", 9, 1), group("a", "2024-03-01", 9, 1)],
            Utc::now(),
        )
        .unwrap();

        let stats = replace_keys(
            &db,
            &[group("a", "2024-03-05", 12, 1)],
            RetentionPolicy::Expire { max_age_days: 30 },
            today(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(stats.rows_deleted, 1);
        assert!(db
            .get_summary_row(&group("a", "2024-01-01", 9, 0).key)
            .unwrap()
            .is_none());
        assert_eq!(db.count_summary_rows().unwrap(), 2);
    }

    #[test]
    fn test_failed_full_replace_rolls_back() {
        let db = db();
        full_replace(&db, &[group("a", "2024-03-05", 9, 4)], Utc::now()).unwrap();
        let before = db.summary_digest().unwrap();
        install_failing_insert(&db);

        let err = full_replace(
            &db,
            &[group("a", "2024-03-05", 9, 9), group("boom", "2024-03-05", 9, 1)],
            Utc::now(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Reconciliation {
                mode: RefreshMode::Full,
                ..
            }
        ));
        assert!(!err.is_partial_reconciliation());
        assert_eq!(db.summary_digest().unwrap(), before);
    }

    #[test]
    fn test_failed_replace_keys_rolls_back() {
        let db = db();
        full_replace(&db, &[group("a", "2024-03-05", 9, 4)], Utc::now()).unwrap();
        let before = db.summary_digest().unwrap();
        install_failing_insert(&db);

        let err = replace_keys(
            &db,
            &[group("a", "2024-03-05", 9, 9), group("boom", "2024-03-05", 9, 1)],
            RetentionPolicy::PinLastKnown,
            today(),
            Utc::now(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Reconciliation {
                mode: RefreshMode::Incremental,
                ..
            }
        ));
        assert_eq!(db.summary_digest().unwrap(), before);
    }

    #[test]
    fn test_failed_rollback_is_partial_reconciliation() {
        let rolled_back = failure(
            RefreshMode::Full,
            rusqlite::Error::InvalidQuery,
            Ok(()),
        );
        assert!(matches!(
            rolled_back,
            Error::Reconciliation {
                mode: RefreshMode::Full,
                ..
            }
        ));
        assert!(!rolled_back.is_partial_reconciliation());

        let partial = failure(
            RefreshMode::Incremental,
            rusqlite::Error::InvalidQuery,
            Err(rusqlite::Error::ExecuteReturnedResults),
        );
        assert!(partial.is_partial_reconciliation());
        match partial {
            Error::PartialReconciliation { mode, message } => {
                assert_eq!(mode, RefreshMode::Incremental);
                assert!(message.contains("rollback failed"), "got: {message}");
            }
            other => panic!("expected partial reconciliation, got {other:?}"),
        }
    }
}
