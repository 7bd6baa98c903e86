use chrono::NaiveDate;
use study_tracker::config::KpiConfig;
use study_tracker::models::{DateRange, EntryUpdate};
use study_tracker::{compute_kpis, compute_stats, Config, SqliteDatabase};
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn seeded() -> (TempDir, SqliteDatabase) {
    let temp_dir = TempDir::new().unwrap();
    let db = SqliteDatabase::open(&temp_dir.path().join("stats.db"), &Config::default()).unwrap();
    (temp_dir, db)
}

#[test]
fn test_total_hours_across_days() {
    let (_dir, db) = seeded();
    db.upsert_daily_entry(date(2024, 1, 1), "AUTOSAR", &EntryUpdate::hours(2.5))
        .unwrap();
    db.upsert_daily_entry(date(2024, 1, 2), "AUTOSAR", &EntryUpdate::hours(1.0))
        .unwrap();

    let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 2)).unwrap();
    let rows = compute_stats(&db, &range, &[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].total_hours - 3.5).abs() < 1e-9);
    assert!((rows[0].avg_hours_per_day - 1.75).abs() < 1e-9);
    assert_eq!(rows[0].planned_vs_actual, None);
}

#[test]
fn test_stats_reflect_latest_writes() {
    let (_dir, db) = seeded();
    let range = DateRange::single(date(2024, 1, 1));
    db.upsert_daily_entry(date(2024, 1, 1), "Math", &EntryUpdate::hours(1.0))
        .unwrap();
    assert_eq!(compute_stats(&db, &range, &[]).unwrap()[0].total_hours, 1.0);

    db.upsert_daily_entry(date(2024, 1, 1), "Math", &EntryUpdate::hours(1.0))
        .unwrap();
    assert_eq!(compute_stats(&db, &range, &[]).unwrap()[0].total_hours, 2.0);
}

#[test]
fn test_kpis_overtime_and_planned_ratio() {
    let (_dir, db) = seeded();
    let day = date(2024, 1, 1);
    db.upsert_daily_entry(
        day,
        "Deep work",
        &EntryUpdate {
            hours_delta: 6.0,
            target_hours: Some(5.0),
            completion_percent: Some(100.0),
            ..Default::default()
        },
    )
    .unwrap();
    db.upsert_daily_entry(
        day,
        "Email",
        &EntryUpdate {
            hours_delta: 4.0,
            target_hours: Some(1.0),
            completion_percent: Some(50.0),
            ..Default::default()
        },
    )
    .unwrap();

    let kpis = compute_kpis(&db, &DateRange::single(day), &KpiConfig { nominal_day_hours: 8.0 })
        .unwrap()
        .unwrap();
    assert_eq!(kpis.total_hours, 10.0);
    assert_eq!(kpis.overtime_hours, 2.0);
    assert_eq!(kpis.planned_vs_actual, Some(10.0 / 6.0 * 100.0));
    assert_eq!(kpis.focus_ratio, Some(80.0));
    assert_eq!(kpis.completion_rate, Some(50.0));
    assert_eq!(kpis.switches, 1);
    assert_eq!(kpis.category_hours[0].0, "Deep work");
}
