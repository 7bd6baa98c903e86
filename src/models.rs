//! Data models for the study tracker.
//!
//! Persisted records (`Activity`, `DailyEntry`), the write payloads that feed
//! the store, and the derived aggregates produced by the `stats` module.

use crate::common::{today, DATE_FORMAT};
use crate::error::{Result, TrackerError};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked activity (course, project, topic...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Surrogate key; not part of the JSON exchange format
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_target_hours: f64,
    #[serde(default)]
    pub tags: String,
    /// False once the activity has been deleted (archived)
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update of an activity; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ActivityUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub default_target_hours: Option<f64>,
    pub tags: Option<String>,
    pub is_active: Option<bool>,
}

/// All tracked time for one activity on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyEntry {
    pub date: NaiveDate,
    pub activity: String,
    pub hours: f64,
    pub target_hours: Option<f64>,
    pub objectives: String,
    pub completion_percent: Option<f64>,
    pub stop_reason: Option<String>,
    pub comments: String,
}

/// Payload of an upsert.
///
/// `hours_delta` is added to the stored hours. `target_hours`,
/// `completion_percent` and `stop_reason` replace the stored values, `None`
/// included. `objectives` and `comments` replace the stored text only when
/// set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryUpdate {
    pub hours_delta: f64,
    pub target_hours: Option<f64>,
    pub completion_percent: Option<f64>,
    pub stop_reason: Option<String>,
    pub objectives: Option<String>,
    pub comments: Option<String>,
}

impl EntryUpdate {
    pub fn hours(hours_delta: f64) -> Self {
        EntryUpdate {
            hours_delta,
            ..Default::default()
        }
    }

    /// Reject values the store must never hold.
    pub fn validate(&self) -> Result<()> {
        if !self.hours_delta.is_finite() || self.hours_delta < 0.0 {
            return Err(TrackerError::constraint(format!(
                "hours must be a non-negative number, got {}",
                self.hours_delta
            )));
        }
        if let Some(target) = self.target_hours {
            if !target.is_finite() || target < 0.0 {
                return Err(TrackerError::constraint(format!(
                    "target hours must be a non-negative number, got {}",
                    target
                )));
            }
        }
        if let Some(completion) = self.completion_percent {
            if !(0.0..=100.0).contains(&completion) {
                return Err(TrackerError::constraint(format!(
                    "completion must be between 0 and 100, got {}",
                    completion
                )));
            }
        }
        Ok(())
    }
}

/// Inclusive date range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(TrackerError::constraint(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        Ok(DateRange { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        DateRange {
            start: date,
            end: date,
        }
    }

    /// The `days` days ending at `end`, both ends included.
    pub fn last_days(days: u32, end: NaiveDate) -> Self {
        let span = i64::from(days.max(1)) - 1;
        DateRange {
            start: end - Duration::days(span),
            end,
        }
    }

    /// The `days` days ending today.
    pub fn ending_today(days: u32) -> Self {
        Self::last_days(days, today())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// Per-activity aggregate over a date range.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRow {
    pub activity: String,
    pub total_hours: f64,
    pub avg_hours_per_day: f64,
    /// Mean completion over entries that recorded one
    pub avg_completion: Option<f64>,
    pub entry_count: u32,
    pub active_days: u32,
    pub total_target_hours: f64,
    /// total hours / total target, as a percentage
    pub planned_vs_actual: Option<f64>,
    /// completion-weighted hours / total hours, as a percentage
    pub focus_ratio: Option<f64>,
}

/// Range-level KPIs.
#[derive(Debug, Clone, PartialEq)]
pub struct Kpis {
    pub total_hours: f64,
    pub total_target_hours: f64,
    pub planned_vs_actual: Option<f64>,
    pub focus_ratio: Option<f64>,
    /// Hours per activity, largest first
    pub category_hours: Vec<(String, f64)>,
    pub switches: u32,
    pub switches_per_day: Option<f64>,
    pub overtime_hours: f64,
    pub completion_rate: Option<f64>,
    pub avg_entry_hours: Option<f64>,
    pub productivity_score: f64,
    pub active_days: u32,
    pub entry_count: u32,
}
