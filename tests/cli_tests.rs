//! Binary tests for the study-tracker CLI.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn tracker(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_study-tracker"));
    cmd.env("HOME", home)
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env_remove("STUDY_TRACKER_CONFIG")
        .env("NO_COLOR", "1");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    tracker(home).args(args).output().expect("Failed to execute binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_version_full() {
    let home = TempDir::new().unwrap();
    let output = run(home.path(), &["--version-full"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Study Tracker"));
}

#[test]
fn test_log_then_stats_and_kpis() {
    let home = TempDir::new().unwrap();
    let h = home.path();

    assert!(run(h, &["log", "AUTOSAR", "--hours", "2.5", "--date", "2024-01-01"]).status.success());
    assert!(run(h, &["log", "AUTOSAR", "--hours", "1", "--date", "2024-01-02", "--completion", "100"]).status.success());

    // Default database lands in the data directory
    assert!(h.join("data").join("study-tracker").join("tracker.db").exists());

    let output = run(h, &["stats", "--from", "2024-01-01", "--to", "2024-01-02"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("AUTOSAR"));
    assert!(out.contains("3.50"));

    let output = run(h, &["kpis", "--from", "2024-01-01", "--to", "2024-01-02"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Active days:        2"));

    let output = run(h, &["kpis", "--from", "2020-01-01", "--to", "2020-01-02"]);
    assert!(stdout(&output).contains("No entries in range."));
}

#[test]
fn test_invalid_input_fails_cleanly() {
    let home = TempDir::new().unwrap();
    let h = home.path();

    let output = run(h, &["log", "AUTOSAR", "--hours", "1", "--completion", "150"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));

    let output = run(h, &["delete-entry", "Nothing", "--date", "2024-01-01"]);
    assert!(!output.status.success());

    let output = run(h, &["stats", "--from", "2024-02-01", "--to", "2024-01-01"]);
    assert!(!output.status.success());
}

#[test]
fn test_activity_lifecycle() {
    let home = TempDir::new().unwrap();
    let h = home.path();

    assert!(run(h, &["activity", "add", "Math", "--target", "2", "--tags", "school"]).status.success());
    assert!(!run(h, &["activity", "add", "Math"]).status.success());
    assert!(run(h, &["activity", "edit", "Math", "--rename", "Algebra"]).status.success());
    assert!(run(h, &["activity", "delete", "Algebra"]).status.success());

    let output = run(h, &["activity", "list"]);
    assert!(stdout(&output).contains("No activities."));
    let output = run(h, &["activity", "list", "--all"]);
    assert!(stdout(&output).contains("Algebra"));
    assert!(stdout(&output).contains("archived"));
}

#[test]
fn test_export_writes_workbook() {
    let home = TempDir::new().unwrap();
    let h = home.path();
    let out = h.join("report.xlsx");

    assert!(run(h, &["log", "Bash", "--hours", "1", "--date", "2024-03-01"]).status.success());
    let output = run(
        h,
        &["export", "--from", "2024-03-01", "--to", "2024-03-01", "--output", out.to_str().unwrap()],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(out.exists());
    assert!(stdout(&output).contains("Exported 1 rows"));
}

#[test]
fn test_track_stops_on_end_of_input() {
    let home = TempDir::new().unwrap();
    let h = home.path();
    let db = h.join("track.db");

    let mut child = tracker(h)
        .args(["--db", db.to_str().unwrap(), "track", "Reading", "--date", "2024-05-05"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to execute binary");
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"s distracted\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Saved Reading on 2024-05-05"));

    let output = run(h, &["--db", db.to_str().unwrap(), "entries", "--from", "2024-05-05", "--to", "2024-05-05"]);
    let out = stdout(&output);
    assert!(out.contains("Reading"));
    assert!(out.contains("distracted"));
}

#[test]
fn test_config_file_overrides_database_path() {
    let home = TempDir::new().unwrap();
    let h = home.path();
    let db = h.join("custom").join("mine.db");
    let config = h.join("tracker.toml");
    std::fs::write(
        &config,
        format!("[database]\npath = \"{}\"\n", db.display()),
    )
    .unwrap();

    let output = run(
        h,
        &["--config", config.to_str().unwrap(), "log", "Math", "--hours", "1"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(db.exists());
}

#[test]
fn test_tasks_roundtrip_and_backup() {
    let home = TempDir::new().unwrap();
    let h = home.path();
    let file = h.join("tasks.json");

    assert!(run(h, &["activity", "add", "Math"]).status.success());
    assert!(run(h, &["tasks", "export", file.to_str().unwrap()]).status.success());
    let output = run(h, &["tasks", "import", file.to_str().unwrap()]);
    assert!(stdout(&output).contains("Imported 0 activities"));

    let output = run(h, &["backup"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Backup written to"));
}

#[test]
fn test_advise_is_neutral() {
    let home = TempDir::new().unwrap();
    let output = run(home.path(), &["advise"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("neutral score 0.00"));
}
