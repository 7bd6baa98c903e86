//! # Study Tracker Library
//!
//! Records study and work sessions per activity and day, aggregates them into
//! statistics and KPIs, and exports them to an Excel workbook.
//!
//! ## Features
//!
//! - **Entry Store**: SQLite storage with one row per (date, activity), written through an upsert
//! - **Aggregation**: per-activity statistics and range KPIs computed from SQL aggregates
//! - **Excel Export**: merges with the previous workbook, newest rows win, atomic replace
//! - **Session Timer**: pause/resume state machine that persists elapsed time once
//! - **Configuration**: TOML-based configuration system with sensible defaults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use study_tracker::{Config, SqliteDatabase};
//! use study_tracker::models::{DateRange, EntryUpdate};
//! use study_tracker::common::today;
//!
//! let config = Config::load(None)?;
//! let db = SqliteDatabase::open(&config.database.resolved_path(), &config)?;
//!
//! db.upsert_daily_entry(today(), "AUTOSAR", &EntryUpdate::hours(1.5))?;
//! let stats = study_tracker::stats::compute_stats(&db, &DateRange::ending_today(7), &[])?;
//! # Ok::<(), study_tracker::TrackerError>(())
//! ```

pub mod advisor;
pub mod common;
/// Configuration management module for loading and saving settings
pub mod config;
/// SQLite entry store
pub mod database;
pub mod display;
pub mod error;
pub mod export;
/// Database schema migration system
pub mod migrations;
pub mod models;
/// Retry logic with exponential backoff for transient failures
pub mod retry;
pub mod stats;
pub mod timer;
pub mod version;

pub use config::Config;
pub use database::SqliteDatabase;
pub use error::{Result, TrackerError};
pub use export::{export_range, ExcelExporter, ExportSummary};
pub use stats::{compute_kpis, compute_stats};
pub use timer::{EntrySink, SessionOutcome, SessionTimer, TimerState};
pub use version::version_string;
