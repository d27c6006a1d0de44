//! callstats-refresh - CLI to refresh and inspect the hourly call summary
//!
//! Meant to be invoked by an external scheduler (cron, systemd timer). A
//! refresh takes a per-database process lock, so overlapping invocations
//! fail fast instead of racing on the summary table.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/callstats/callstats.db (~/.local/share/callstats/callstats.db)
//! - Logs: $XDG_STATE_HOME/callstats/ (~/.local/state/callstats/)
//! - Config: $XDG_CONFIG_HOME/callstats/config.toml (~/.config/callstats/config.toml)

mod process_lock;

use callstats_core::format::{format_avg_seconds, format_duration_ms, format_relative_time};
use callstats_core::summary::{RefreshEngine, RefreshOutcome, RefreshReport};
use callstats_core::{AbandonBuckets, Config, Database, SummaryFilter, SummaryRow};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use process_lock::acquire_refresh_guard;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit status when a failed refresh may have left the summary degraded.
const EXIT_PARTIAL_RECONCILIATION: u8 = 3;

#[derive(Parser)]
#[command(name = "callstats-refresh")]
#[command(about = "Refresh and inspect the hourly call-center summary table")]
#[command(version)]
struct Args {
    /// Database path (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Config file path (defaults to the XDG config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v shows malformed record breakdowns and bucket detail)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recompute every summary row from the full call history
    Full,

    /// Recompute only the rows touched by recent calls
    Incremental {
        /// Trailing window in hours (defaults to refresh.window_hours)
        #[arg(long)]
        window_hours: Option<u32>,
    },

    /// Print summary rows
    Show {
        /// Only rows for this call date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Only rows for this client id
        #[arg(long)]
        client: Option<String>,

        /// Maximum number of rows
        #[arg(long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print recent refresh runs and the summary digest
    Status {
        /// Number of runs to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let status = exit_status(&e);
            if status == EXIT_PARTIAL_RECONCILIATION {
                eprintln!("error: summary table may be missing rows: {:#}", e);
                eprintln!("hint: re-run the same refresh mode to restore consistency");
            } else {
                eprintln!("error: {:#}", e);
            }
            ExitCode::from(status)
        }
    }
}

/// Process exit status for a failed command.
fn exit_status(error: &anyhow::Error) -> u8 {
    let partial = error
        .downcast_ref::<callstats_core::Error>()
        .is_some_and(|core| core.is_partial_reconciliation());

    if partial {
        EXIT_PARTIAL_RECONCILIATION
    } else {
        1
    }
}

fn run(args: &Args) -> Result<()> {
    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        callstats_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config.effective_database_path());

    match &args.command {
        Command::Full => {
            let _guard = acquire_refresh_guard(&db_path).context("failed to acquire refresh lock")?;
            let db = open_database(&db_path)?;
            let engine = RefreshEngine::new(config.refresh.clone());
            let report = engine.run_full_refresh(&db).context("full refresh failed")?;
            print_report(&report, args.verbose);
        }
        Command::Incremental { window_hours } => {
            let window_hours = window_hours.unwrap_or(config.refresh.window_hours);
            let _guard = acquire_refresh_guard(&db_path).context("failed to acquire refresh lock")?;
            let db = open_database(&db_path)?;
            let engine = RefreshEngine::new(config.refresh.clone());
            let report = engine
                .run_incremental_refresh(&db, window_hours)
                .context("incremental refresh failed")?;
            print_report(&report, args.verbose);
        }
        Command::Show {
            date,
            client,
            limit,
            format,
        } => {
            let db = open_database(&db_path)?;
            let rows = db.list_summary(&SummaryFilter {
                call_date: *date,
                client_id: client.clone(),
                limit: *limit,
            })?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Text => print_rows(&rows, args.verbose),
            }
        }
        Command::Status { limit } => {
            let db = open_database(&db_path)?;
            print_status(&db, *limit)?;
        }
    }

    Ok(())
}

fn open_database(path: &std::path::Path) -> Result<Database> {
    tracing::info!(path = %path.display(), "Opening database");
    let db = Database::open(path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(db)
}

fn print_report(report: &RefreshReport, verbose: u8) {
    match report.outcome {
        RefreshOutcome::Applied => println!("{} refresh complete:", report.mode),
        RefreshOutcome::EmptyWindow => {
            println!("{} refresh: no call records in window, summary unchanged", report.mode)
        }
    }
    println!("  Run:             {}", report.run_id);
    if let Some(threshold) = report.threshold {
        println!("  Window start:    {}", threshold);
    }
    println!("  Records scanned: {}", report.records_scanned);
    println!("  Groups written:  {}", report.groups_written);
    println!("  Rows deleted:    {}", report.rows_deleted);
    println!("  Duration:        {}", format_duration_ms(report.duration_ms));

    let malformed = &report.malformed;
    if !malformed.is_empty() {
        println!("  Malformed:       {}", malformed.total());
        if verbose >= 1 {
            println!("    start_time:     {}", malformed.start_time);
            println!("    answer_time:    {}", malformed.answer_time);
            println!("    end_time:       {}", malformed.end_time);
            println!("    talk_time:      {}", malformed.talk_time);
            println!("    post_call_time: {}", malformed.post_call_time);
            println!("    records skipped: {}", malformed.records_skipped);
        }
    }
}

fn print_rows(rows: &[SummaryRow], verbose: u8) {
    if rows.is_empty() {
        println!("No summary rows.");
        println!("Run 'callstats-refresh full' to build the summary.");
        return;
    }

    println!(
        "{:<10} {:>4}  {:<12} {:<9} {:<10} {:<14} {:<12} {:>6} {:>6} {:>6} {:>8} {:>8}",
        "DATE", "HOUR", "CLIENT", "DIR", "MARKER", "AGENT", "CAMPAIGN", "CALLS", "ANS", "UNANS",
        "AHT", "ACW"
    );

    for row in rows {
        let g = &row.group;
        let agent = if g.key.agent_name == g.key.agent_id {
            g.key.agent_id.clone()
        } else {
            format!("{} ({})", g.key.agent_name, g.key.agent_id)
        };
        println!(
            "{:<10} {:>4}  {:<12} {:<9} {:<10} {:<14} {:<12} {:>6} {:>6} {:>6} {:>8} {:>8}",
            g.key.call_date.to_string(),
            g.key.call_hour,
            g.key.client_id,
            g.key.direction,
            g.key.marker_type,
            agent,
            g.key.campaign_name,
            g.total_calls,
            g.total_answered,
            g.total_unanswered,
            format_avg_seconds(g.avg_handle_time_sec),
            format_avg_seconds(g.avg_after_call_work_sec),
        );

        if verbose >= 1 && g.total_unanswered > 0 {
            let mut parts: Vec<String> = g
                .buckets
                .counts()
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(i, count)| format!("{}={}", AbandonBuckets::label(i), count))
                .collect();
            if g.abandoned_unknown > 0 {
                parts.push(format!("unknown={}", g.abandoned_unknown));
            }
            println!("    abandoned: {}", parts.join(", "));
        }
    }

    println!("\n{} row(s)", rows.len());
}

fn latest_log_file() -> Option<PathBuf> {
    let entries = std::fs::read_dir(callstats_core::logging::log_dir()).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(callstats_core::logging::is_log_file_name)
        })
        .map(|entry| entry.path())
        .max()
}

fn print_status(db: &Database, limit: usize) -> Result<()> {
    let row_count = db.count_summary_rows()?;
    let digest = db.summary_digest()?;
    let runs = db.get_refresh_runs(limit)?;

    println!("Summary rows: {}", row_count);
    println!("Digest:       {}", digest);
    println!("Logs:         {}", callstats_core::logging::log_dir().display());
    if let Some(latest) = latest_log_file() {
        println!("Latest log:   {}", latest.display());
    }

    if runs.is_empty() {
        println!("\nNo refresh runs recorded.");
        return Ok(());
    }

    let now = Utc::now();
    println!("\nRecent runs:");
    for run in &runs {
        let outcome = run.outcome.map(|o| o.as_str()).unwrap_or("-");
        println!(
            "  {:<10} {:<12} {:<8} {:<13} scanned={} written={} deleted={} malformed={} ({})",
            format_relative_time(run.started_at, now),
            run.mode.as_str(),
            run.status.as_str(),
            outcome,
            run.records_scanned,
            run.groups_written,
            run.rows_deleted,
            run.malformed_records,
            format_duration_ms(run.duration_ms),
        );
        if let Some(message) = &run.error_message {
            println!("             error: {}", message);
        }
    }

    Ok(())
}
