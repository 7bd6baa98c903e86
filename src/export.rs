//! Excel exporter.
//!
//! Each export merges the incoming entries with the `RawData` sheet of the
//! previous workbook, keyed by (date, activity), and rewrites the whole file.
//! Incoming rows win. The prior workbook is best effort: when it cannot be
//! read the export carries on with the new data only.

use crate::common::{parse_date, DATE_FORMAT};
use crate::config::Config;
use crate::database::{select_entries, SqliteDatabase};
use crate::error::{Result, TrackerError};
use crate::models::{DailyEntry, DateRange, StatRow};
use crate::retry::{retry_if_retryable, RetryConfig};
use crate::stats::stat_rows;
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate};
use fs2::FileExt;
use log::{debug, info, warn};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub const RAW_SHEET: &str = "RawData";
pub const STATS_SHEET: &str = "Stats";

pub const RAW_COLUMNS: [&str; 8] = [
    "Date",
    "Activity",
    "Hours",
    "Target",
    "Completion%",
    "StopReason",
    "Objectives",
    "Comments",
];

/// Columns a prior RawData sheet must carry to be merged.
const REQUIRED_RAW_COLUMNS: usize = 6;

pub const STATS_COLUMNS: [&str; 9] = [
    "Activity",
    "TotalHours",
    "AvgCompletion",
    "AvgHoursPerDay",
    "Entries",
    "Days",
    "TotalTarget",
    "PlannedVsActual%",
    "FocusRatio%",
];

type RowKey = (NaiveDate, String);

/// Outcome of one export run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    /// Rows recovered from the previous workbook
    pub prior_rows: usize,
    /// Rows supplied by this export
    pub new_rows: usize,
    /// Prior rows replaced by an incoming row with the same key
    pub superseded_rows: usize,
    /// Rows in the written RawData sheet
    pub raw_rows: usize,
    pub stat_rows: usize,
}

pub struct ExcelExporter {
    path: PathBuf,
    lock_retry: RetryConfig,
}

/// Holds the exclusive sidecar lock for the duration of an export. The
/// sidecar is removed before the lock is released.
struct ExportLock {
    file: File,
    path: PathBuf,
}

impl Drop for ExportLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

// Open files cannot be removed here, so the sidecar is never replaced
#[cfg(not(unix))]
fn same_file(_: &fs::Metadata, _: &fs::Metadata) -> bool {
    true
}

impl ExcelExporter {
    /// Exporter that fails immediately when another export holds the lock.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ExcelExporter {
            path: path.into(),
            lock_retry: RetryConfig {
                max_attempts: 1,
                initial_delay_ms: 0,
                max_delay_ms: 0,
                backoff_factor: 1.0,
            },
        }
    }

    /// Exporter for the configured path, retrying a held lock with the
    /// `retry.file_ops` settings.
    pub fn from_config(config: &Config) -> Self {
        ExcelExporter {
            path: config.export.resolved_path(),
            lock_retry: RetryConfig::from(&config.retry.file_ops),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "export.xlsx".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn acquire_lock(&self) -> Result<ExportLock> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| TrackerError::unwritable(&self.path, e.to_string()))?;
            }
        }

        let lock_path = self.lock_path();
        let file = retry_if_retryable(&self.lock_retry, || {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            file.try_lock_exclusive()
                .map_err(|e| TrackerError::lock(format!("export lock held: {}", e)))?;

            // A previous holder may have removed the sidecar between our open
            // and lock; only the file currently at the path counts.
            let current = fs::metadata(&lock_path).ok();
            match current {
                Some(meta) if same_file(&file.metadata()?, &meta) => Ok(file),
                _ => Err(TrackerError::lock("export lock file was replaced")),
            }
        })
        .map_err(|e| TrackerError::unwritable(&self.path, e.to_string()))?;

        Ok(ExportLock {
            file,
            path: lock_path,
        })
    }

    /// Merge `entries` into the workbook and rewrite it with a fresh Stats
    /// sheet built from `stats`.
    pub fn export(&self, entries: &[DailyEntry], stats: &[StatRow]) -> Result<ExportSummary> {
        let _lock = self.acquire_lock()?;

        let prior = self.load_prior_rows();
        let prior_rows = prior.len();

        let mut merged = prior;
        let mut superseded_rows = 0;
        for entry in entries {
            let key = (entry.date, entry.activity.clone());
            if merged.insert(key, entry.clone()).is_some() {
                superseded_rows += 1;
            }
        }

        // BTreeMap order is date, then activity name
        let rows: Vec<&DailyEntry> = merged.values().collect();
        self.write_atomically(&rows, stats)?;

        let summary = ExportSummary {
            path: self.path.clone(),
            prior_rows,
            new_rows: entries.len(),
            superseded_rows,
            raw_rows: rows.len(),
            stat_rows: stats.len(),
        };
        info!(
            "Exported {} rows ({} new, {} superseded) to {}",
            summary.raw_rows,
            summary.new_rows,
            summary.superseded_rows,
            self.path.display()
        );
        Ok(summary)
    }

    fn load_prior_rows(&self) -> BTreeMap<RowKey, DailyEntry> {
        if !self.path.exists() {
            debug!("No previous export at {}", self.path.display());
            return BTreeMap::new();
        }

        match read_raw_sheet(&self.path) {
            Ok(entries) => entries
                .into_iter()
                .map(|e| ((e.date, e.activity.clone()), e))
                .collect(),
            Err(e) => {
                warn!(
                    "Ignoring previous export {}: {}",
                    self.path.display(),
                    e
                );
                BTreeMap::new()
            }
        }
    }

    fn write_atomically(&self, rows: &[&DailyEntry], stats: &[StatRow]) -> Result<()> {
        let temp_path = self.temp_path();

        let written = build_workbook(rows, stats).and_then(|mut workbook| {
            workbook
                .save(&temp_path)
                .map_err(|e| TrackerError::unwritable(&self.path, e.to_string()))
        });
        let renamed = written.and_then(|_| {
            fs::rename(&temp_path, &self.path)
                .map_err(|e| TrackerError::unwritable(&self.path, e.to_string()))
        });

        if renamed.is_err() && temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        renamed
    }
}

/// Read entries and statistics for `range` from one store snapshot, then
/// write them out.
///
/// Store connections are released before the workbook is touched.
pub fn export_range(
    db: &SqliteDatabase,
    exporter: &ExcelExporter,
    range: &DateRange,
) -> Result<ExportSummary> {
    let (entries, stats) = db.read(|conn| {
        Ok((
            select_entries(conn, range, &[])?,
            stat_rows(conn, range, &[])?,
        ))
    })?;
    exporter.export(&entries, &stats)
}

// ----- writing --------------------------------------------------------------

fn write_header(sheet: &mut Worksheet, columns: &[&str], bold: &Format) -> Result<()> {
    for (col, title) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, bold)?;
        sheet.set_column_width(col as u16, 14)?;
    }
    Ok(())
}

fn write_optional_number(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: Option<f64>,
    format: &Format,
) -> Result<()> {
    if let Some(v) = value {
        sheet.write_number_with_format(row, col, v, format)?;
    }
    Ok(())
}

fn build_workbook(rows: &[&DailyEntry], stats: &[StatRow]) -> Result<Workbook> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let decimal = Format::new().set_num_format("0.00");

    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(RAW_SHEET)?;
        write_header(sheet, &RAW_COLUMNS, &bold)?;

        for (i, entry) in rows.iter().enumerate() {
            let row = i as u32 + 1;
            sheet.write_string(row, 0, entry.date.format(DATE_FORMAT).to_string())?;
            sheet.write_string(row, 1, &entry.activity)?;
            sheet.write_number_with_format(row, 2, entry.hours, &decimal)?;
            write_optional_number(sheet, row, 3, entry.target_hours, &decimal)?;
            write_optional_number(sheet, row, 4, entry.completion_percent, &decimal)?;
            if let Some(reason) = &entry.stop_reason {
                sheet.write_string(row, 5, reason)?;
            }
            if !entry.objectives.is_empty() {
                sheet.write_string(row, 6, &entry.objectives)?;
            }
            if !entry.comments.is_empty() {
                sheet.write_string(row, 7, &entry.comments)?;
            }
        }
    }

    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(STATS_SHEET)?;
        write_header(sheet, &STATS_COLUMNS, &bold)?;

        for (i, stat) in stats.iter().enumerate() {
            let row = i as u32 + 1;
            sheet.write_string(row, 0, &stat.activity)?;
            sheet.write_number_with_format(row, 1, stat.total_hours, &decimal)?;
            write_optional_number(sheet, row, 2, stat.avg_completion, &decimal)?;
            sheet.write_number_with_format(row, 3, stat.avg_hours_per_day, &decimal)?;
            sheet.write_number(row, 4, f64::from(stat.entry_count))?;
            sheet.write_number(row, 5, f64::from(stat.active_days))?;
            sheet.write_number_with_format(row, 6, stat.total_target_hours, &decimal)?;
            write_optional_number(sheet, row, 7, stat.planned_vs_actual, &decimal)?;
            write_optional_number(sheet, row, 8, stat.focus_ratio, &decimal)?;
        }
    }

    Ok(workbook)
}

// ----- reading --------------------------------------------------------------

/// Column positions of a prior RawData header.
#[derive(Debug, Clone, PartialEq)]
struct RawHeader {
    required: [usize; REQUIRED_RAW_COLUMNS],
    objectives: Option<usize>,
    comments: Option<usize>,
}

impl RawHeader {
    fn parse(cells: &[Data]) -> Result<Self> {
        let titles: Vec<String> = cells.iter().map(cell_text).collect();
        let find = |name: &str| titles.iter().position(|t| t.eq_ignore_ascii_case(name));

        let mut required = [0usize; REQUIRED_RAW_COLUMNS];
        let mut missing = Vec::new();
        for (slot, name) in required.iter_mut().zip(RAW_COLUMNS.iter()) {
            match find(name) {
                Some(idx) => *slot = idx,
                None => missing.push(*name),
            }
        }
        if !missing.is_empty() {
            return Err(TrackerError::SchemaMismatch(format!(
                "{} sheet lacks column(s): {}",
                RAW_SHEET,
                missing.join(", ")
            )));
        }

        Ok(RawHeader {
            required,
            objectives: find(RAW_COLUMNS[6]),
            comments: find(RAW_COLUMNS[7]),
        })
    }
}

fn read_raw_sheet(path: &Path) -> Result<Vec<DailyEntry>> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .map_err(|e| TrackerError::Workbook(format!("cannot open {}: {}", path.display(), e)))?;

    if !workbook.sheet_names().iter().any(|name| name == RAW_SHEET) {
        return Err(TrackerError::SchemaMismatch(format!(
            "no {} sheet",
            RAW_SHEET
        )));
    }

    let range = workbook
        .worksheet_range(RAW_SHEET)
        .map_err(|e| TrackerError::Workbook(format!("cannot read {}: {}", RAW_SHEET, e)))?;

    let mut rows = range.rows();
    let header = match rows.next() {
        Some(cells) => RawHeader::parse(cells)?,
        None => return Ok(Vec::new()),
    };

    let mut entries = Vec::new();
    for (index, cells) in rows.enumerate() {
        if cells.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        match parse_raw_row(&header, cells) {
            Ok(entry) => entries.push(entry),
            // Header is row 1, data starts at row 2
            Err(e) => warn!("Skipping {} row {}: {}", RAW_SHEET, index + 2, e),
        }
    }
    Ok(entries)
}

fn cell_at(cells: &[Data], idx: usize) -> &Data {
    cells.get(idx).unwrap_or(&Data::Empty)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn cell_number(cell: &Data, column: &str) -> Result<Option<f64>> {
    let value = match cell {
        Data::Empty => None,
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(s) => Some(s.trim().parse::<f64>().map_err(|_| {
            TrackerError::constraint(format!("{} is not a number: '{}'", column, s))
        })?),
        other => {
            return Err(TrackerError::constraint(format!(
                "{} is not a number: {:?}",
                column, other
            )))
        }
    };
    Ok(value)
}

/// Excel serial day count; day zero is 1899-12-30.
fn date_from_serial(serial: f64) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|epoch| epoch.checked_add_signed(Duration::days(serial.floor() as i64)))
        .ok_or_else(|| TrackerError::constraint(format!("date serial {} out of range", serial)))
}

fn cell_date(cell: &Data) -> Result<NaiveDate> {
    match cell {
        Data::DateTime(dt) => date_from_serial(dt.as_f64()),
        Data::Float(f) => date_from_serial(*f),
        Data::Int(i) => date_from_serial(*i as f64),
        Data::String(s) | Data::DateTimeIso(s) => parse_date(s.get(..10).unwrap_or(s)),
        other => Err(TrackerError::constraint(format!("unreadable date {:?}", other))),
    }
}

fn parse_raw_row(header: &RawHeader, cells: &[Data]) -> Result<DailyEntry> {
    let [date_col, activity_col, hours_col, target_col, completion_col, reason_col] =
        header.required;

    let date = cell_date(cell_at(cells, date_col))?;

    let activity = cell_text(cell_at(cells, activity_col));
    if activity.is_empty() {
        return Err(TrackerError::constraint("empty activity"));
    }

    let hours = cell_number(cell_at(cells, hours_col), "Hours")?
        .ok_or_else(|| TrackerError::constraint("missing hours"))?;
    if !hours.is_finite() || hours < 0.0 {
        return Err(TrackerError::constraint(format!("invalid hours {}", hours)));
    }

    let target_hours = cell_number(cell_at(cells, target_col), "Target")?;
    let completion_percent = cell_number(cell_at(cells, completion_col), "Completion%")?;
    if let Some(c) = completion_percent {
        if !(0.0..=100.0).contains(&c) {
            return Err(TrackerError::constraint(format!("completion {} out of range", c)));
        }
    }

    let stop_reason = Some(cell_text(cell_at(cells, reason_col))).filter(|s| !s.is_empty());
    let optional_text = |col: Option<usize>| {
        col.map(|idx| cell_text(cell_at(cells, idx)))
            .unwrap_or_default()
    };

    Ok(DailyEntry {
        date,
        activity,
        hours,
        target_hours,
        objectives: optional_text(header.objectives),
        completion_percent,
        stop_reason,
        comments: optional_text(header.comments),
    })
}
