//! Display formatting module.
//!
//! Plain-text tables and the live timer line printed by the CLI. Colors
//! respect `NO_COLOR`.

use crate::advisor::Advice;
use crate::common::{format_optional, DATE_FORMAT};
use crate::models::{Activity, DailyEntry, Kpis, StatRow};
use crate::timer::{TickUpdate, TimerState};
use std::fmt::Write;
use std::time::Duration;

const PROGRESS_BAR_WIDTH: usize = 20;

/// ANSI color codes for terminal output.
pub struct Colors;

impl Colors {
    /// Check if colors are enabled (respects NO_COLOR env var)
    pub fn enabled() -> bool {
        std::env::var("NO_COLOR").is_err()
    }

    fn get(code: &'static str) -> &'static str {
        if Self::enabled() {
            code
        } else {
            ""
        }
    }

    pub fn reset() -> &'static str {
        Self::get("\x1b[0m")
    }
    pub fn bold() -> &'static str {
        Self::get("\x1b[1m")
    }
    pub fn red() -> &'static str {
        Self::get("\x1b[31m")
    }
    pub fn green() -> &'static str {
        Self::get("\x1b[32m")
    }
    pub fn yellow() -> &'static str {
        Self::get("\x1b[33m")
    }
    pub fn cyan() -> &'static str {
        Self::get("\x1b[36m")
    }
    pub fn gray() -> &'static str {
        Self::get("\x1b[90m")
    }
}

/// `HH:MM:SS`
pub fn format_clock(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

fn progress_color(percentage: f64) -> &'static str {
    if percentage >= 100.0 {
        Colors::green()
    } else if percentage >= 50.0 {
        Colors::yellow()
    } else {
        Colors::cyan()
    }
}

fn format_progress_bar(percentage: f64) -> String {
    let filled = ((percentage / 100.0) * PROGRESS_BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(PROGRESS_BAR_WIDTH);
    let empty = PROGRESS_BAR_WIDTH - filled;

    let bar = format!(
        "{}{}{}",
        "=".repeat(filled),
        if filled < PROGRESS_BAR_WIDTH { ">" } else { "" },
        "-".repeat(empty.saturating_sub(if filled < PROGRESS_BAR_WIDTH { 1 } else { 0 }))
    );

    format!(
        "{}[{}] {}%{}",
        progress_color(percentage),
        bar,
        percentage.round() as u32,
        Colors::reset()
    )
}

/// One status line for the running timer.
pub fn format_tick(activity: &str, update: &TickUpdate) -> String {
    let state_color = match update.state {
        TimerState::Running => Colors::green(),
        TimerState::Paused => Colors::yellow(),
        _ => Colors::gray(),
    };
    let mut line = format!(
        "{}{}{} {} {}{}{}",
        Colors::bold(),
        activity,
        Colors::reset(),
        format_clock(update.elapsed),
        state_color,
        update.state,
        Colors::reset()
    );
    if let Some(percentage) = update.progress_percent {
        line.push(' ');
        line.push_str(&format_progress_bar(percentage));
    }
    line
}

pub fn format_activities(activities: &[Activity]) -> String {
    if activities.is_empty() {
        return "No activities.\n".to_string();
    }
    let mut out = String::new();
    for activity in activities {
        let _ = write!(out, "{}", activity.name);
        if activity.default_target_hours > 0.0 {
            let _ = write!(out, "  target {:.2}h", activity.default_target_hours);
        }
        if !activity.tags.is_empty() {
            let _ = write!(out, "  [{}]", activity.tags);
        }
        if !activity.is_active {
            let _ = write!(out, "  {}(archived){}", Colors::gray(), Colors::reset());
        }
        if !activity.description.is_empty() {
            let _ = write!(out, "\n    {}", activity.description);
        }
        out.push('\n');
    }
    out
}

pub fn format_entries(entries: &[DailyEntry]) -> String {
    if entries.is_empty() {
        return "No entries in range.\n".to_string();
    }
    let mut out = format!(
        "{:<10}  {:<20}  {:>7}  {:>7}  {:>6}  {}\n",
        "Date", "Activity", "Hours", "Target", "Done", "Stop reason"
    );
    for entry in entries {
        let _ = writeln!(
            out,
            "{:<10}  {:<20}  {:>7.2}  {:>7}  {:>6}  {}",
            entry.date.format(DATE_FORMAT),
            entry.activity,
            entry.hours,
            format_optional(entry.target_hours, "", 2),
            format_optional(entry.completion_percent, "%", 0),
            entry.stop_reason.as_deref().unwrap_or("")
        );
    }
    out
}

pub fn format_stats(rows: &[StatRow]) -> String {
    if rows.is_empty() {
        return "No entries in range.\n".to_string();
    }
    let mut out = format!(
        "{:<20}  {:>7}  {:>7}  {:>8}  {:>7}  {:>5}  {:>8}  {:>7}\n",
        "Activity", "Hours", "Avg %", "Hrs/day", "Entries", "Days", "Plan %", "Focus %"
    );
    for row in rows {
        let _ = writeln!(
            out,
            "{:<20}  {:>7.2}  {:>7}  {:>8.2}  {:>7}  {:>5}  {:>8}  {:>7}",
            row.activity,
            row.total_hours,
            format_optional(row.avg_completion, "", 1),
            row.avg_hours_per_day,
            row.entry_count,
            row.active_days,
            format_optional(row.planned_vs_actual, "", 1),
            format_optional(row.focus_ratio, "", 1)
        );
    }
    out
}

pub fn format_kpis(kpis: &Kpis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total hours:        {:.2}", kpis.total_hours);
    let _ = writeln!(out, "Target hours:       {:.2}", kpis.total_target_hours);
    let _ = writeln!(
        out,
        "Planned vs actual:  {}",
        format_optional(kpis.planned_vs_actual, "%", 1)
    );
    let _ = writeln!(out, "Focus ratio:        {}", format_optional(kpis.focus_ratio, "%", 1));
    let _ = writeln!(
        out,
        "Completion rate:    {}",
        format_optional(kpis.completion_rate, "%", 1)
    );
    let _ = writeln!(
        out,
        "Avg entry:          {}",
        format_optional(kpis.avg_entry_hours, "h", 2)
    );
    let _ = writeln!(
        out,
        "Switches:           {} ({}/day)",
        kpis.switches,
        format_optional(kpis.switches_per_day, "", 2)
    );
    let overtime_color = if kpis.overtime_hours > 0.0 {
        Colors::red()
    } else {
        ""
    };
    let _ = writeln!(
        out,
        "Overtime:           {}{:.2}h{}",
        overtime_color,
        kpis.overtime_hours,
        if overtime_color.is_empty() { "" } else { Colors::reset() }
    );
    let _ = writeln!(out, "Active days:        {}", kpis.active_days);
    let _ = writeln!(out, "Productivity score: {:.2}", kpis.productivity_score);
    if !kpis.category_hours.is_empty() {
        out.push_str("By activity:\n");
        for (name, hours) in &kpis.category_hours {
            let _ = writeln!(out, "  {:<20} {:>7.2}h", name, hours);
        }
    }
    out
}

pub fn format_advice(advice: &Advice) -> String {
    if !advice.available {
        return "Productivity advisor unavailable; neutral score 0.00\n".to_string();
    }
    let mut out = format!("Score ({}): {:.2}\n", advice.source, advice.score);
    for insight in &advice.insights {
        let _ = writeln!(out, "  - {}", insight);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_colors() {
        if Colors::enabled() {
            assert_eq!(Colors::green(), "\x1b[32m");
            assert_eq!(Colors::reset(), "\x1b[0m");
        } else {
            assert_eq!(Colors::green(), "");
            assert_eq!(Colors::reset(), "");
        }
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(Duration::from_secs(45)), "00:00:45");
        assert_eq!(format_clock(Duration::from_secs(3665)), "01:01:05");
    }

    #[test]
    fn test_format_progress_bar() {
        let bar = format_progress_bar(10.0);
        assert!(bar.contains("10%"));
        assert!(bar.contains("[==>"));

        let full = format_progress_bar(150.0);
        assert!(full.contains(&"=".repeat(PROGRESS_BAR_WIDTH)));
        assert!(full.contains("150%"));
    }

    #[test]
    fn test_format_tick_without_target() {
        let update = TickUpdate {
            state: TimerState::Running,
            elapsed: Duration::from_secs(61),
            progress_percent: None,
            target_reached: false,
        };
        let line = format_tick("Math", &update);
        assert!(line.contains("Math"));
        assert!(line.contains("00:01:01"));
        assert!(line.contains("running"));
        assert!(!line.contains('%'));
        assert!(!line.contains("] "));
    }

    #[test]
    fn test_format_entries_shows_na_for_missing_values() {
        let entries = vec![DailyEntry {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            activity: "AUTOSAR".into(),
            hours: 2.5,
            target_hours: None,
            objectives: String::new(),
            completion_percent: None,
            stop_reason: None,
            comments: String::new(),
        }];
        let table = format_entries(&entries);
        assert!(table.contains("2024-01-01"));
        assert!(table.contains("2.50"));
        assert!(table.contains("N/A"));
        assert_eq!(format_entries(&[]), "No entries in range.\n");
    }
}
