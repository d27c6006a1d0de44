use callstats_core::{ClientRef, Database, RawCallRow, RawSeconds};
use chrono::{Duration, Local};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

const BIN: &str = "callstats-refresh";

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        for dir in [&home, &xdg_data, &xdg_config, &xdg_state, &xdg_runtime] {
            fs::create_dir_all(dir).expect("failed to create test directory");
        }

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("callstats/callstats.db")
    }

    fn seed(&self, rows: &[RawCallRow]) {
        let db = Database::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        db.upsert_client(&ClientRef {
            client_id: "acme".to_string(),
            client_name: Some("Acme Corp".to_string()),
        })
        .expect("failed to seed client");
        db.insert_call_records(rows).expect("failed to seed calls");
    }

    fn write_config(&self, content: &str) {
        let dir = self.xdg_config.join("callstats");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), content).expect("failed to write config");
    }
}

fn call(client_id: &str, start_time: &str, answered: bool, talk_time: i64) -> RawCallRow {
    RawCallRow {
        client_id: client_id.to_string(),
        agent_id: Some(if answered { "1001" } else { "\\N" }.to_string()),
        agent_name: Some("Ana".to_string()),
        start_time: start_time.to_string(),
        answer_time: Some(if answered {
            start_time.to_string()
        } else {
            "0000-00-00 00:00:00".to_string()
        }),
        end_time: Some(start_time.to_string()),
        talk_time: Some(RawSeconds::Integer(talk_time)),
        post_call_time: Some(RawSeconds::Integer(12)),
        status: "completed".to_string(),
        direction: Some("inbound".to_string()),
        marker_type: None,
        campaign_name: None,
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("callstats-refresh"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_runtime)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute {BIN}: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "{BIN} {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn run_ok(env: &CliTestEnv, args: &[&str]) -> String {
    let output = run_bin(env, args);
    assert_success(args, &output);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn full_refresh_builds_summary_visible_to_show_and_status() {
    let env = CliTestEnv::new();
    env.seed(&[
        call("acme", "2024-03-05 09:00:00", true, 80),
        call("acme", "2024-03-05 09:10:00", false, 7),
        call("acme", "2024-03-05 10:00:00", true, 30),
    ]);

    let stdout = run_ok(&env, &["full"]);
    assert!(stdout.contains("full refresh complete:"), "got:\n{stdout}");
    assert!(stdout.contains("Records scanned: 3"), "got:\n{stdout}");

    let json = run_ok(&env, &["show", "--format", "json"]);
    let rows: serde_json::Value = serde_json::from_str(&json).expect("show should print JSON");
    let rows = rows.as_array().expect("JSON array");
    assert_eq!(rows.len(), 3, "answered and unanswered agents key separately");
    let total: i64 = rows
        .iter()
        .map(|r| r["total_calls"].as_i64().unwrap())
        .sum();
    assert_eq!(total, 3);
    assert!(rows.iter().all(|r| r["client_name"] == "Acme Corp"));

    let status = run_ok(&env, &["status"]);
    assert!(status.contains("Summary rows: 3"), "got:\n{status}");
    assert!(status.contains("Digest:"), "got:\n{status}");
    assert!(status.contains("full"), "got:\n{status}");
    assert!(status.contains("applied"), "got:\n{status}");
}

#[test]
fn status_points_at_the_rotated_log_file() {
    let env = CliTestEnv::new();
    env.seed(&[call("acme", "2024-03-05 09:00:00", true, 80)]);
    run_ok(&env, &["full"]);

    let log_dir = env.xdg_state.join("callstats");
    let status = run_ok(&env, &["status"]);
    assert!(
        status.contains(&format!("Logs:         {}", log_dir.display())),
        "got:\n{status}"
    );

    let latest = status
        .lines()
        .find_map(|line| line.strip_prefix("Latest log:   "))
        .unwrap_or_else(|| panic!("no latest log line in:\n{status}"));
    let latest = PathBuf::from(latest);
    assert!(latest.exists(), "{} should exist", latest.display());
    let name = latest.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("callstats.") && name.ends_with(".log"), "got {name}");
    assert_ne!(name, "callstats.log");
}

#[test]
fn show_filters_by_date_and_prints_buckets_verbosely() {
    let env = CliTestEnv::new();
    env.seed(&[
        call("acme", "2024-03-05 09:10:00", false, 7),
        call("acme", "2024-03-06 11:00:00", true, 30),
    ]);
    run_ok(&env, &["full"]);

    let stdout = run_ok(&env, &["show", "--date", "2024-03-05", "-v"]);
    assert!(stdout.contains("2024-03-05"), "got:\n{stdout}");
    assert!(!stdout.contains("2024-03-06"), "got:\n{stdout}");
    assert!(stdout.contains("6-10s=1"), "got:\n{stdout}");
    assert!(stdout.contains("1 row(s)"), "got:\n{stdout}");
}

#[test]
fn incremental_with_empty_window_leaves_summary_unchanged() {
    let env = CliTestEnv::new();
    env.seed(&[call("acme", "2020-01-01 09:00:00", true, 30)]);
    run_ok(&env, &["full"]);
    let before = run_ok(&env, &["show", "--format", "json"]);

    let stdout = run_ok(&env, &["incremental", "--window-hours", "2"]);
    assert!(
        stdout.contains("no call records in window"),
        "got:\n{stdout}"
    );
    assert_eq!(run_ok(&env, &["show", "--format", "json"]), before);

    let status = run_ok(&env, &["status"]);
    assert!(status.contains("empty_window"), "got:\n{status}");
}

#[test]
fn incremental_refresh_picks_up_recent_calls() {
    let env = CliTestEnv::new();
    let recent = (Local::now() - Duration::minutes(10))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    env.seed(&[
        call("acme", "2020-01-01 09:00:00", true, 30),
        call("acme", &recent, true, 45),
    ]);

    let stdout = run_ok(&env, &["incremental"]);
    assert!(stdout.contains("incremental refresh complete:"), "got:\n{stdout}");
    assert!(stdout.contains("Records scanned: 1"), "got:\n{stdout}");
    assert!(stdout.contains("Groups written:  1"), "got:\n{stdout}");
}

#[test]
fn database_flag_overrides_default_location() {
    let env = CliTestEnv::new();
    let custom = env.home.join("custom.db");

    let stdout = run_ok(&env, &["--database", custom.to_str().unwrap(), "full"]);
    assert!(stdout.contains("Groups written:  0"), "got:\n{stdout}");
    assert!(custom.exists(), "database should be created at the override path");
    assert!(!env.db_path().exists());
}

#[test]
fn invalid_config_fails_with_message() {
    let env = CliTestEnv::new();
    env.write_config("[refresh]\nwindow_hours = 0\n");

    let output = run_bin(&env, &["incremental"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("window_hours"), "got:\n{stderr}");
}

#[test]
fn excluded_statuses_come_from_config() {
    let env = CliTestEnv::new();
    env.write_config("[refresh]\nexcluded_statuses = [\"recording\", \"test\"]\n");

    let mut test_call = call("acme", "2024-03-05 09:00:00", true, 30);
    test_call.status = "test".to_string();
    env.seed(&[test_call, call("acme", "2024-03-05 09:30:00", true, 30)]);

    let stdout = run_ok(&env, &["full"]);
    assert!(stdout.contains("Records scanned: 1"), "got:\n{stdout}");
}
