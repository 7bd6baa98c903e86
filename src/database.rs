//! SQLite entry store.
//!
//! One row per (date, activity) in `daily_entries`, written exclusively
//! through [`SqliteDatabase::upsert_daily_entry`]. Reads go through an r2d2
//! pool; writes additionally take a process-wide mutex and an IMMEDIATE
//! transaction so timer stops and manual edits never interleave.

use crate::common::{current_timestamp, DATE_FORMAT};
use crate::config::Config;
use crate::error::{Result, TrackerError};
use crate::migrations;
use crate::models::{Activity, ActivityUpdate, DailyEntry, DateRange, EntryUpdate};
use crate::retry::{retry_if_retryable, RetryConfig};
use chrono::{Local, NaiveDate};
use log::{debug, info};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) type DbConnection = PooledConnection<SqliteConnectionManager>;

const ENTRY_COLUMNS: &str = "de.date, a.name, de.hours, de.target_hours, de.objectives, \
     de.completion_percent, de.stop_reason, de.comments";

const ACTIVITY_COLUMNS: &str = "id, name, description, default_target_hours, tags, is_active";

// Hours accumulate; target, completion and stop reason take the latest value
// even when it is NULL; text notes are only replaced when provided.
const UPSERT_ENTRY: &str = "INSERT INTO daily_entries (
        date, activity_id, hours, target_hours, objectives,
        completion_percent, stop_reason, comments, updated_at
     )
     VALUES (?1, ?2, ?3, ?4, COALESCE(?5, ''), ?6, ?7, COALESCE(?8, ''), ?9)
     ON CONFLICT(date, activity_id) DO UPDATE SET
        hours = daily_entries.hours + excluded.hours,
        target_hours = excluded.target_hours,
        completion_percent = excluded.completion_percent,
        stop_reason = excluded.stop_reason,
        objectives = COALESCE(?5, daily_entries.objectives),
        comments = COALESCE(?8, daily_entries.comments),
        updated_at = excluded.updated_at";

pub struct SqliteDatabase {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
    write_lock: Mutex<()>,
    retry: RetryConfig,
}

fn configure_connection(conn: &Connection, busy_timeout_ms: u32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn normalize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::constraint("activity name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn normalize_text(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_target(target: f64) -> Result<()> {
    if !target.is_finite() || target < 0.0 {
        return Err(TrackerError::constraint(format!(
            "default target hours must be a non-negative number, got {}",
            target
        )));
    }
    Ok(())
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<DailyEntry> {
    Ok(DailyEntry {
        date: row.get(0)?,
        activity: row.get(1)?,
        hours: row.get(2)?,
        target_hours: row.get(3)?,
        objectives: row.get(4)?,
        completion_percent: row.get(5)?,
        stop_reason: row.get(6)?,
        comments: row.get(7)?,
    })
}

fn map_activity(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        default_target_hours: row.get(3)?,
        tags: row.get(4)?,
        is_active: row.get(5)?,
    })
}

/// Trimmed filter names, matching how activity names are stored.
pub(crate) fn filter_names(activities: &[String]) -> Vec<String> {
    activities.iter().map(|name| name.trim().to_string()).collect()
}

/// Append ` AND a.name IN (...)` with placeholders numbered from `?3`.
pub(crate) fn push_name_filter(sql: &mut String, count: usize) {
    if count > 0 {
        let placeholders: Vec<String> = (0..count).map(|i| format!("?{}", i + 3)).collect();
        sql.push_str(&format!(" AND a.name IN ({})", placeholders.join(", ")));
    }
}

pub(crate) fn select_entries(
    conn: &Connection,
    range: &DateRange,
    activities: &[String],
) -> Result<Vec<DailyEntry>> {
    let names = filter_names(activities);
    let mut sql = format!(
        "SELECT {} FROM daily_entries de
         JOIN activities a ON a.id = de.activity_id
         WHERE de.date BETWEEN ?1 AND ?2",
        ENTRY_COLUMNS
    );
    push_name_filter(&mut sql, names.len());
    sql.push_str(" ORDER BY de.date ASC, a.name ASC");

    let mut values: Vec<&dyn ToSql> = vec![&range.start, &range.end];
    for name in &names {
        values.push(name);
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(&values[..], map_entry)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

fn fetch_entry(conn: &Connection, date: NaiveDate, activity: &str) -> Result<Option<DailyEntry>> {
    let sql = format!(
        "SELECT {} FROM daily_entries de
         JOIN activities a ON a.id = de.activity_id
         WHERE de.date = ?1 AND a.name = ?2",
        ENTRY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![date, activity], map_entry)
        .optional()?)
}

fn fetch_activity(conn: &Connection, name: &str) -> Result<Option<Activity>> {
    let sql = format!("SELECT {} FROM activities WHERE name = ?1", ACTIVITY_COLUMNS);
    Ok(conn.query_row(&sql, params![name], map_activity).optional()?)
}

/// Returns the id of `name`, creating the activity when it does not exist.
fn ensure_activity(tx: &Transaction, name: &str) -> Result<i64> {
    tx.execute(
        "INSERT INTO activities (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
        params![name],
    )?;
    let id = tx.query_row(
        "SELECT id FROM activities WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Accepts either a bare list or `{"tasks": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ActivityFile {
    List(Vec<Activity>),
    Wrapped { tasks: Vec<Activity> },
}

/// One line of the CSV activity list: `name,description,default_target_hours,tags,is_active`.
#[derive(Serialize, Deserialize)]
struct ActivityCsvRow {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    default_target_hours: Option<f64>,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    is_active: Option<u8>,
}

impl From<&Activity> for ActivityCsvRow {
    fn from(activity: &Activity) -> Self {
        ActivityCsvRow {
            name: activity.name.clone(),
            description: activity.description.clone(),
            default_target_hours: Some(activity.default_target_hours),
            tags: activity.tags.clone(),
            is_active: Some(u8::from(activity.is_active)),
        }
    }
}

impl From<ActivityCsvRow> for Activity {
    fn from(row: ActivityCsvRow) -> Self {
        Activity {
            id: 0,
            name: row.name,
            description: row.description,
            default_target_hours: row.default_target_hours.unwrap_or(0.0),
            tags: row.tags,
            is_active: row.is_active.map_or(true, |flag| flag != 0),
        }
    }
}

/// Activity lists ending in `.json` are JSON; anything else is CSV.
fn is_json_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn write_activities(path: &Path, as_json: bool, activities: &[Activity]) -> Result<()> {
    if as_json {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, activities)?;
    } else {
        let mut writer = csv::Writer::from_path(path)?;
        for activity in activities {
            writer.serialize(ActivityCsvRow::from(activity))?;
        }
        writer.flush()?;
    }
    Ok(())
}

fn read_activities(path: &Path) -> Result<Vec<Activity>> {
    if is_json_path(path) {
        let contents = fs::read_to_string(path)?;
        return Ok(match serde_json::from_str::<ActivityFile>(&contents)? {
            ActivityFile::List(list) => list,
            ActivityFile::Wrapped { tasks } => tasks,
        });
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut activities = Vec::new();
    for row in reader.deserialize::<ActivityCsvRow>() {
        activities.push(Activity::from(row?));
    }
    Ok(activities)
}

impl SqliteDatabase {
    /// Open (or create) the store at `db_path` and bring its schema up to date.
    ///
    /// Any failure to create, open or migrate the file is reported as
    /// `StorageUnavailable`.
    pub fn open(db_path: &Path, config: &Config) -> Result<Self> {
        let unavailable = |what: &str, e: &dyn std::fmt::Display| {
            TrackerError::storage(format!("{} {}: {}", what, db_path.display(), e))
        };

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| unavailable("cannot create directory for", &e))?;
            }
        }

        let busy_timeout_ms = config.database.busy_timeout_ms;

        // Schema work happens on a dedicated connection before the pool exists
        {
            let mut conn =
                Connection::open(db_path).map_err(|e| unavailable("cannot open", &e))?;
            configure_connection(&conn, busy_timeout_ms)
                .map_err(|e| unavailable("cannot configure", &e))?;
            let applied = migrations::run_migrations(&mut conn)
                .map_err(|e| unavailable("cannot migrate", &e))?;
            if applied > 0 {
                info!("Applied {} schema migration(s) to {}", applied, db_path.display());
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(move |conn| configure_connection(conn, busy_timeout_ms));

        let pool = Pool::builder()
            .max_size(config.database.max_connections.max(1))
            .connection_timeout(Duration::from_millis(config.database.connection_timeout_ms))
            .build(manager)
            .map_err(|e| unavailable("cannot create connection pool for", &e))?;

        Ok(Self {
            path: db_path.to_path_buf(),
            pool,
            write_lock: Mutex::new(()),
            retry: RetryConfig::from(&config.retry.db_ops),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn get_connection(&self) -> Result<DbConnection> {
        retry_if_retryable(&self.retry, || {
            self.pool.get().map_err(|e| {
                TrackerError::lock(format!("Failed to get connection from pool: {}", e))
            })
        })
        .map_err(|e| match e {
            TrackerError::LockFailed(msg) => TrackerError::storage(msg),
            other => other,
        })
    }

    /// Run `op` inside one deferred transaction so every query it issues
    /// sees the same snapshot.
    pub(crate) fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `op` inside an IMMEDIATE transaction while holding the write lock.
    fn write<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&Transaction) -> Result<T>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| TrackerError::lock("entry store write lock poisoned"))?;

        retry_if_retryable(&self.retry, || {
            let mut conn = self.get_connection()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = op(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    // ----- daily entries -------------------------------------------------

    /// Insert or update the entry for (`date`, `activity`).
    ///
    /// Unknown activities are created. Returns the stored row after the
    /// update.
    pub fn upsert_daily_entry(
        &self,
        date: NaiveDate,
        activity: &str,
        update: &EntryUpdate,
    ) -> Result<DailyEntry> {
        update.validate()?;
        let activity = normalize_name(activity)?;
        let stop_reason = normalize_text(&update.stop_reason);
        let now = current_timestamp();

        let entry = self.write(|tx| {
            let activity_id = ensure_activity(tx, &activity)?;
            tx.execute(
                UPSERT_ENTRY,
                params![
                    date,
                    activity_id,
                    update.hours_delta,
                    update.target_hours,
                    update.objectives,
                    update.completion_percent,
                    stop_reason,
                    update.comments,
                    now,
                ],
            )
            .map_err(|e| TrackerError::from_sqlite(e, "upsert daily entry"))?;

            fetch_entry(tx, date, &activity)?
                .ok_or_else(|| TrackerError::other("upserted entry could not be read back"))
        })?;

        debug!(
            "Upserted {} {}: +{:.3}h -> {:.3}h",
            date.format(DATE_FORMAT),
            entry.activity,
            update.hours_delta,
            entry.hours
        );
        Ok(entry)
    }

    pub fn get_entry(&self, date: NaiveDate, activity: &str) -> Result<Option<DailyEntry>> {
        let conn = self.get_connection()?;
        fetch_entry(&conn, date, activity.trim())
    }

    /// Entries inside `range`, restricted to `activities` unless it is empty.
    /// Ordered by date, then activity name.
    pub fn query_entries(&self, range: &DateRange, activities: &[String]) -> Result<Vec<DailyEntry>> {
        self.read(|conn| select_entries(conn, range, activities))
    }

    pub fn entries_for_date(&self, date: NaiveDate) -> Result<Vec<DailyEntry>> {
        self.query_entries(&DateRange::single(date), &[])
    }

    /// Remove one entry. `NotFound` when nothing matched.
    pub fn delete_entry(&self, date: NaiveDate, activity: &str) -> Result<()> {
        let activity = activity.trim();
        let deleted = self.write(|tx| {
            Ok(tx.execute(
                "DELETE FROM daily_entries
                 WHERE date = ?1 AND activity_id = (SELECT id FROM activities WHERE name = ?2)",
                params![date, activity],
            )?)
        })?;

        if deleted == 0 {
            return Err(TrackerError::not_found(format!(
                "no entry for {} on {}",
                activity,
                date.format(DATE_FORMAT)
            )));
        }
        info!("Deleted entry for {} on {}", activity, date.format(DATE_FORMAT));
        Ok(())
    }

    // ----- activities ----------------------------------------------------

    /// Create an activity, or reactivate an archived one with the same name.
    pub fn create_activity(
        &self,
        name: &str,
        description: &str,
        default_target_hours: f64,
        tags: &str,
    ) -> Result<Activity> {
        let name = normalize_name(name)?;
        validate_target(default_target_hours)?;

        let activity = self.write(|tx| {
            match fetch_activity(tx, &name)? {
                Some(existing) if existing.is_active => {
                    return Err(TrackerError::constraint(format!(
                        "activity '{}' already exists",
                        name
                    )));
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE activities
                         SET is_active = 1, description = ?2, default_target_hours = ?3, tags = ?4
                         WHERE name = ?1",
                        params![name, description, default_target_hours, tags],
                    )?;
                }
                None => {
                    tx.execute(
                        "INSERT INTO activities (name, description, default_target_hours, tags, is_active)
                         VALUES (?1, ?2, ?3, ?4, 1)",
                        params![name, description, default_target_hours, tags],
                    )
                    .map_err(|e| TrackerError::from_sqlite(e, "create activity"))?;
                }
            }
            fetch_activity(tx, &name)?
                .ok_or_else(|| TrackerError::other("created activity could not be read back"))
        })?;

        info!("Created activity {}", activity.name);
        Ok(activity)
    }

    /// Activities ordered by name; archived ones only when asked for.
    pub fn list_activities(&self, include_archived: bool) -> Result<Vec<Activity>> {
        let sql = format!(
            "SELECT {} FROM activities {} ORDER BY name ASC",
            ACTIVITY_COLUMNS,
            if include_archived { "" } else { "WHERE is_active = 1" }
        );
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_activity)?;
        let mut activities = Vec::new();
        for row in rows {
            activities.push(row?);
        }
        Ok(activities)
    }

    pub fn get_activity(&self, name: &str) -> Result<Option<Activity>> {
        let conn = self.get_connection()?;
        fetch_activity(&conn, name.trim())
    }

    /// Apply a partial update. Renaming onto an existing name is a
    /// `ConstraintViolation`; entries follow the rename through the key.
    pub fn update_activity(&self, name: &str, update: &ActivityUpdate) -> Result<Activity> {
        let name = normalize_name(name)?;
        let new_name = update.name.as_deref().map(normalize_name).transpose()?;
        if let Some(target) = update.default_target_hours {
            validate_target(target)?;
        }

        let mut parts: Vec<&str> = Vec::new();
        let mut values: Vec<&dyn ToSql> = Vec::new();
        if let Some(ref new_name) = new_name {
            parts.push("name = ?");
            values.push(new_name);
        }
        if let Some(ref description) = update.description {
            parts.push("description = ?");
            values.push(description);
        }
        if let Some(ref target) = update.default_target_hours {
            parts.push("default_target_hours = ?");
            values.push(target);
        }
        if let Some(ref tags) = update.tags {
            parts.push("tags = ?");
            values.push(tags);
        }
        if let Some(ref is_active) = update.is_active {
            parts.push("is_active = ?");
            values.push(is_active);
        }
        values.push(&name);

        let final_name = new_name.clone().unwrap_or_else(|| name.clone());
        let updated = self.write(|tx| {
            if fetch_activity(tx, &name)?.is_none() {
                return Err(TrackerError::not_found(format!("activity '{}'", name)));
            }
            if !parts.is_empty() {
                let sql = format!("UPDATE activities SET {} WHERE name = ?", parts.join(", "));
                tx.execute(&sql, &values[..])
                    .map_err(|e| TrackerError::from_sqlite(e, "update activity"))?;
            }
            fetch_activity(tx, &final_name)?
                .ok_or_else(|| TrackerError::other("updated activity could not be read back"))
        })?;

        info!("Updated activity {}", name);
        Ok(updated)
    }

    /// Archive an activity. Its entries are kept and keep counting in
    /// statistics and exports.
    pub fn delete_activity(&self, name: &str) -> Result<()> {
        let name = normalize_name(name)?;
        let changed = self.write(|tx| {
            Ok(tx.execute(
                "UPDATE activities SET is_active = 0 WHERE name = ?1 AND is_active = 1",
                params![name],
            )?)
        })?;

        if changed == 0 {
            return Err(TrackerError::not_found(format!("activity '{}'", name)));
        }
        info!("Archived activity {}", name);
        Ok(())
    }

    // ----- maintenance ---------------------------------------------------

    /// Write a consistent snapshot next to the database file.
    pub fn backup_database(&self) -> Result<PathBuf> {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S");
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tracker".to_string());
        let extension = self
            .path
            .extension()
            .map(|s| format!(".{}", s.to_string_lossy()))
            .unwrap_or_default();
        let target = self
            .path
            .with_file_name(format!("{}-backup-{}{}", stem, timestamp, extension));

        let conn = self.get_connection()?;
        conn.execute(
            "VACUUM INTO ?1",
            params![target.to_string_lossy().into_owned()],
        )?;
        info!("Database backed up to {}", target.display());
        Ok(target)
    }

    /// Write every activity (archived included) to `path`, as JSON when it
    /// ends in `.json` and as CSV otherwise.
    pub fn export_activities(&self, path: &Path) -> Result<usize> {
        let activities = self.list_activities(true)?;

        let temp_path = path.with_extension("tmp");
        let written = write_activities(&temp_path, is_json_path(path), &activities)
            .and_then(|_| fs::rename(&temp_path, path).map_err(TrackerError::from));
        if written.is_err() && temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        written?;

        info!("Exported {} activities to {}", activities.len(), path.display());
        Ok(activities.len())
    }

    /// Create activities from a JSON or CSV list, skipping names that already
    /// exist. Returns how many were imported.
    pub fn import_activities(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Err(TrackerError::not_found(format!("{}", path.display())));
        }
        let activities = read_activities(path)?;

        let mut imported = 0;
        for activity in activities {
            if activity.name.trim().is_empty() {
                continue;
            }
            match self.create_activity(
                &activity.name,
                &activity.description,
                activity.default_target_hours,
                &activity.tags,
            ) {
                Ok(_) => imported += 1,
                Err(TrackerError::ConstraintViolation(msg)) => {
                    info!("Skipped activity {} during import: {}", activity.name, msg);
                }
                Err(e) => return Err(e),
            }
        }

        info!("Imported {} activities from {}", imported, path.display());
        Ok(imported)
    }
}
