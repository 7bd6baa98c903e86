//! Aggregation engine.
//!
//! Statistics are recomputed from `daily_entries` on every call and never
//! cached. SQL does the grouping; the KPI arithmetic on top is pure so it can
//! be tested without a database.

use crate::common::{percent, ratio};
use crate::config::KpiConfig;
use crate::database::{filter_names, push_name_filter, SqliteDatabase};
use crate::error::Result;
use crate::models::{DateRange, Kpis, StatRow};
use log::debug;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};
use std::cmp::Ordering;

const PRODUCTIVITY_FOCUS_WEIGHT: f64 = 0.6;
const PRODUCTIVITY_COMPLETION_WEIGHT: f64 = 0.3;
const PRODUCTIVITY_SWITCH_PENALTY: f64 = 0.1;

/// Raw per-activity sums straight from SQL.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ActivityAggregate {
    pub activity: String,
    pub total_hours: f64,
    pub avg_completion: Option<f64>,
    pub entry_count: u32,
    pub active_days: u32,
    pub total_target_hours: f64,
    /// Sum of hours weighted by completion
    pub focused_hours: f64,
    /// Entries at 100% completion or more
    pub completed_entries: u32,
}

/// Per-date sums used for switches and overtime.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DayAggregate {
    pub activities: u32,
    pub hours: f64,
}

fn map_aggregate(row: &Row<'_>) -> rusqlite::Result<ActivityAggregate> {
    Ok(ActivityAggregate {
        activity: row.get(0)?,
        total_hours: row.get(1)?,
        avg_completion: row.get(2)?,
        entry_count: row.get(3)?,
        active_days: row.get(4)?,
        total_target_hours: row.get(5)?,
        focused_hours: row.get(6)?,
        completed_entries: row.get(7)?,
    })
}

fn query_aggregates(
    conn: &Connection,
    range: &DateRange,
    activities: &[String],
) -> Result<Vec<ActivityAggregate>> {
    let names = filter_names(activities);
    let mut sql = String::from(
        "SELECT a.name,
                SUM(de.hours),
                AVG(de.completion_percent),
                COUNT(*),
                COUNT(DISTINCT de.date),
                SUM(COALESCE(de.target_hours, 0)),
                SUM(de.hours * COALESCE(de.completion_percent, 0) / 100.0),
                SUM(CASE WHEN de.completion_percent >= 100 THEN 1 ELSE 0 END)
         FROM daily_entries de
         JOIN activities a ON a.id = de.activity_id
         WHERE de.date BETWEEN ?1 AND ?2",
    );
    push_name_filter(&mut sql, names.len());
    sql.push_str(" GROUP BY a.id, a.name ORDER BY a.name ASC");

    let mut values: Vec<&dyn ToSql> = vec![&range.start, &range.end];
    for name in &names {
        values.push(name);
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(&values[..], map_aggregate)?;
    let mut aggregates = Vec::new();
    for row in rows {
        aggregates.push(row?);
    }
    Ok(aggregates)
}

fn query_days(conn: &Connection, range: &DateRange) -> Result<Vec<DayAggregate>> {
    let mut stmt = conn.prepare(
        "SELECT COUNT(DISTINCT activity_id), SUM(hours)
         FROM daily_entries
         WHERE date BETWEEN ?1 AND ?2
         GROUP BY date
         ORDER BY date ASC",
    )?;
    let rows = stmt.query_map(params![range.start, range.end], |row| {
        Ok(DayAggregate {
            activities: row.get(0)?,
            hours: row.get(1)?,
        })
    })?;
    let mut days = Vec::new();
    for row in rows {
        days.push(row?);
    }
    Ok(days)
}

fn stat_row(agg: ActivityAggregate) -> StatRow {
    StatRow {
        avg_hours_per_day: ratio(agg.total_hours, f64::from(agg.active_days)).unwrap_or(0.0),
        planned_vs_actual: percent(agg.total_hours, agg.total_target_hours),
        focus_ratio: percent(agg.focused_hours, agg.total_hours),
        activity: agg.activity,
        total_hours: agg.total_hours,
        avg_completion: agg.avg_completion,
        entry_count: agg.entry_count,
        active_days: agg.active_days,
        total_target_hours: agg.total_target_hours,
    }
}

/// One row per activity with entries in `range`, ordered by name.
///
/// An empty `activities` filter means every activity, archived ones included.
pub fn compute_stats(
    db: &SqliteDatabase,
    range: &DateRange,
    activities: &[String],
) -> Result<Vec<StatRow>> {
    db.read(|conn| stat_rows(conn, range, activities))
}

pub(crate) fn stat_rows(
    conn: &Connection,
    range: &DateRange,
    activities: &[String],
) -> Result<Vec<StatRow>> {
    let rows: Vec<StatRow> = query_aggregates(conn, range, activities)?
        .into_iter()
        .map(stat_row)
        .collect();
    debug!("Computed {} stat rows for {}", rows.len(), range);
    Ok(rows)
}

/// Range-level KPIs, `None` when the range holds no entries.
pub fn compute_kpis(db: &SqliteDatabase, range: &DateRange, config: &KpiConfig) -> Result<Option<Kpis>> {
    let (aggregates, days) =
        db.read(|conn| Ok((query_aggregates(conn, range, &[])?, query_days(conn, range)?)))?;
    Ok(kpis_from_aggregates(&aggregates, &days, config.nominal_day_hours))
}

pub(crate) fn kpis_from_aggregates(
    aggregates: &[ActivityAggregate],
    days: &[DayAggregate],
    nominal_day_hours: f64,
) -> Option<Kpis> {
    let entry_count: u32 = aggregates.iter().map(|a| a.entry_count).sum();
    if entry_count == 0 {
        return None;
    }

    let total_hours: f64 = aggregates.iter().map(|a| a.total_hours).sum();
    let total_target_hours: f64 = aggregates.iter().map(|a| a.total_target_hours).sum();
    let focused_hours: f64 = aggregates.iter().map(|a| a.focused_hours).sum();
    let completed: u32 = aggregates.iter().map(|a| a.completed_entries).sum();

    let mut category_hours: Vec<(String, f64)> = aggregates
        .iter()
        .map(|a| (a.activity.clone(), a.total_hours))
        .collect();
    category_hours.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let switches: u32 = days.iter().map(|d| d.activities.saturating_sub(1)).sum();
    let active_days = days.len() as u32;
    let overtime_hours: f64 = days
        .iter()
        .map(|d| (d.hours - nominal_day_hours).max(0.0))
        .sum();

    let productivity_score = focused_hours * PRODUCTIVITY_FOCUS_WEIGHT
        + f64::from(completed) * PRODUCTIVITY_COMPLETION_WEIGHT
        - f64::from(switches) * PRODUCTIVITY_SWITCH_PENALTY;

    Some(Kpis {
        total_hours,
        total_target_hours,
        planned_vs_actual: percent(total_hours, total_target_hours),
        focus_ratio: percent(focused_hours, total_hours),
        category_hours,
        switches,
        switches_per_day: ratio(f64::from(switches), f64::from(active_days)),
        overtime_hours,
        completion_rate: percent(f64::from(completed), f64::from(entry_count)),
        avg_entry_hours: ratio(total_hours, f64::from(entry_count)),
        productivity_score,
        active_days,
        entry_count,
    })
}
