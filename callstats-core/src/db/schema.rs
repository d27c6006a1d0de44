//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: source tables and the hourly summary
    r#"
    -- ============================================
    -- SOURCE: written by the telephony platform (append-mostly)
    -- ============================================

    CREATE TABLE IF NOT EXISTS clients (
        client_id        TEXT PRIMARY KEY,
        client_name      TEXT
    );

    CREATE TABLE IF NOT EXISTS call_records (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id        TEXT NOT NULL,
        agent_id         TEXT,               -- '\N' when unassigned
        agent_name       TEXT,
        start_time       TEXT NOT NULL,      -- 'YYYY-MM-DD HH:MM:SS'
        answer_time      TEXT,               -- '0000-00-00 00:00:00' when never answered
        end_time         TEXT,
        talk_time        INTEGER,            -- seconds
        post_call_time   INTEGER,            -- seconds of after-call work
        status           TEXT NOT NULL,
        direction        TEXT,
        marker_type      TEXT,
        campaign_name    TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_call_records_start ON call_records(start_time);

    -- ============================================
    -- DERIVED: one row per group key (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS call_summary (
        client_id               TEXT NOT NULL,
        direction               TEXT NOT NULL,
        marker_type             TEXT NOT NULL,
        agent_id                TEXT NOT NULL,
        agent_name              TEXT NOT NULL,
        campaign_name           TEXT NOT NULL,
        call_date               TEXT NOT NULL,   -- 'YYYY-MM-DD'
        call_hour               INTEGER NOT NULL,
        client_name             TEXT,

        total_calls             INTEGER NOT NULL,
        total_answered          INTEGER NOT NULL,
        total_unanswered        INTEGER NOT NULL,

        abandon_0_5             INTEGER NOT NULL DEFAULT 0,
        abandon_6_10            INTEGER NOT NULL DEFAULT 0,
        abandon_11_15           INTEGER NOT NULL DEFAULT 0,
        abandon_16_20           INTEGER NOT NULL DEFAULT 0,
        abandon_21_25           INTEGER NOT NULL DEFAULT 0,
        abandon_26_30           INTEGER NOT NULL DEFAULT 0,
        abandon_31_40           INTEGER NOT NULL DEFAULT 0,
        abandon_41_50           INTEGER NOT NULL DEFAULT 0,
        abandon_51_60           INTEGER NOT NULL DEFAULT 0,
        abandon_61_120          INTEGER NOT NULL DEFAULT 0,
        abandon_121_180         INTEGER NOT NULL DEFAULT 0,
        abandon_181_240         INTEGER NOT NULL DEFAULT 0,
        abandon_241_300         INTEGER NOT NULL DEFAULT 0,
        abandon_over_300        INTEGER NOT NULL DEFAULT 0,
        abandoned_unknown       INTEGER NOT NULL DEFAULT 0,

        avg_handle_time_sec     REAL,
        avg_after_call_work_sec REAL,            -- NULL when nothing was answered

        computed_at             TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_call_summary_key ON call_summary(
        client_id, direction, marker_type, agent_id, agent_name, campaign_name, call_date, call_hour
    );
    CREATE INDEX IF NOT EXISTS idx_call_summary_date ON call_summary(call_date);
    "#,
    // Version 2: refresh run log
    r#"
    CREATE TABLE IF NOT EXISTS refresh_runs (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id            TEXT NOT NULL,
        mode              TEXT NOT NULL,       -- 'full', 'incremental'
        started_at        DATETIME NOT NULL,
        duration_ms       INTEGER NOT NULL,
        status            TEXT NOT NULL,       -- 'success', 'error'
        outcome           TEXT,                -- 'applied', 'empty_window'
        error_message     TEXT,
        window_start      TEXT,
        records_scanned   INTEGER NOT NULL DEFAULT 0,
        malformed_records INTEGER NOT NULL DEFAULT 0,
        groups_written    INTEGER NOT NULL DEFAULT 0,
        rows_deleted      INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_refresh_runs_started ON refresh_runs(started_at DESC);
    CREATE INDEX IF NOT EXISTS idx_refresh_runs_status ON refresh_runs(status) WHERE status != 'success';
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
