//! Session timer persisting into a real store.

use chrono::NaiveDate;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use study_tracker::timer::{ManualClock, TimerEvent};
use study_tracker::{Config, SessionOutcome, SessionTimer, SqliteDatabase, TimerState};
use tempfile::TempDir;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 2).unwrap()
}

fn open_db(dir: &TempDir) -> SqliteDatabase {
    SqliteDatabase::open(&dir.path().join("timer.db"), &Config::default()).unwrap()
}

#[test]
fn test_stop_twice_writes_one_upsert() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);
    let clock = ManualClock::new();
    let mut timer = SessionTimer::with_clock("AUTOSAR", Some(1.0), clock.clone());

    timer.start().unwrap();
    clock.advance(Duration::from_secs(5400));
    let outcome = SessionOutcome {
        stop_reason: Some("lunch".into()),
        completion_percent: Some(70.0),
        ..Default::default()
    };
    timer.stop(&db, day(), outcome.clone()).unwrap();
    assert!(timer.stop(&db, day(), outcome).unwrap().is_none());

    let entry = db.get_entry(day(), "AUTOSAR").unwrap().unwrap();
    assert!((entry.hours - 1.5).abs() < 1e-9);
    assert_eq!(entry.stop_reason.as_deref(), Some("lunch"));
    assert_eq!(entry.target_hours, Some(1.0));
}

#[test]
fn test_sessions_on_same_day_accumulate() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);
    let clock = ManualClock::new();
    let mut timer = SessionTimer::with_clock("Rust", None, clock.clone());

    for _ in 0..2 {
        timer.start().unwrap();
        clock.advance(Duration::from_secs(1800));
        timer.pause();
        clock.advance(Duration::from_secs(600));
        timer.finish(&db, day(), SessionOutcome::default()).unwrap();
        timer.reset();
    }

    let entries = db.entries_for_date(day()).unwrap();
    assert_eq!(entries.len(), 1);
    assert!((entries[0].hours - 1.0).abs() < 1e-9);
    assert_eq!(entries[0].completion_percent, Some(100.0));
}

#[test]
fn test_observer_sees_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);
    let clock = ManualClock::new();
    let mut timer = SessionTimer::with_clock("Math", Some(0.25), clock.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    timer.subscribe(move |event| {
        let name = match event {
            TimerEvent::Started => "started",
            TimerEvent::Paused { .. } => "paused",
            TimerEvent::Tick(_) => "tick",
            TimerEvent::TargetReached { .. } => "target",
            TimerEvent::Stopped { .. } => "stopped",
            TimerEvent::Reset => "reset",
        };
        log.lock().unwrap().push(name);
    });

    timer.start().unwrap();
    clock.advance(Duration::from_secs(1000));
    timer.tick();
    timer.pause();
    timer.stop(&db, day(), SessionOutcome::default()).unwrap();

    assert_eq!(timer.state(), TimerState::Stopped);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["started", "tick", "target", "paused", "stopped"]
    );
}
