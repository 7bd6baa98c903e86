//! Versioned schema migrations.
//!
//! A fresh database runs every migration in order; a database written by an
//! older build only runs the ones it is missing. Applied versions are
//! recorded in `schema_migrations`.

use chrono::Local;
use log::info;
use rusqlite::{params, Connection, Result, Transaction};

/// Migration trait for database schema changes
pub trait Migration {
    /// Unique version number (must be sequential)
    fn version(&self) -> u32;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Apply the migration
    fn up(&self, tx: &Transaction) -> Result<()>;
}

/// Highest version known to this build
pub const LATEST_VERSION: u32 = 3;

fn all_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateBaseTables),
        Box::new(AddActivityMetadata),
        Box::new(AddEntryComments),
    ]
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT,
            execution_time_ms INTEGER
        )",
        [],
    )?;
    Ok(())
}

/// Get current schema version (0 for an empty database)
pub fn current_version(conn: &Connection) -> Result<u32> {
    ensure_migrations_table(conn)?;
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Run all pending migrations, each in its own transaction.
///
/// Returns the number of migrations applied.
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in all_migrations()
        .into_iter()
        .filter(|m| m.version() > current)
    {
        let start = std::time::Instant::now();
        let tx = conn.transaction()?;

        migration.up(&tx)?;

        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at, description, execution_time_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                migration.version(),
                Local::now().to_rfc3339(),
                migration.description(),
                start.elapsed().as_millis() as i64,
            ],
        )?;

        tx.commit()?;
        info!(
            "Applied migration v{}: {}",
            migration.version(),
            migration.description()
        );
        applied += 1;
    }

    Ok(applied)
}

/// Adds a column unless the table already has it.
fn add_column_if_missing(tx: &Transaction, table: &str, column: &str, ddl: &str) -> Result<()> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|name| name.ok())
        .any(|name| name == column);

    if !exists {
        tx.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, ddl),
            [],
        )?;
        info!("Added column {} to {}", column, table);
    }
    Ok(())
}

/// Migration 001: activities and daily entries
pub struct CreateBaseTables;

impl Migration for CreateBaseTables {
    fn version(&self) -> u32 {
        1
    }

    fn description(&self) -> &str {
        "Create activities and daily_entries tables"
    }

    fn up(&self, tx: &Transaction) -> Result<()> {
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS daily_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                activity_id INTEGER NOT NULL REFERENCES activities(id),
                hours REAL NOT NULL DEFAULT 0 CHECK (hours >= 0),
                target_hours REAL CHECK (target_hours IS NULL OR target_hours >= 0),
                objectives TEXT NOT NULL DEFAULT '',
                completion_percent REAL
                    CHECK (completion_percent IS NULL OR completion_percent BETWEEN 0 AND 100),
                stop_reason TEXT,
                UNIQUE(date, activity_id)
            );

            CREATE INDEX IF NOT EXISTS idx_entries_date ON daily_entries(date);
            "#,
        )
    }
}

/// Migration 002: activity defaults and tags
pub struct AddActivityMetadata;

impl Migration for AddActivityMetadata {
    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &str {
        "Add default_target_hours and tags to activities"
    }

    fn up(&self, tx: &Transaction) -> Result<()> {
        add_column_if_missing(
            tx,
            "activities",
            "default_target_hours",
            "REAL NOT NULL DEFAULT 0",
        )?;
        add_column_if_missing(tx, "activities", "tags", "TEXT NOT NULL DEFAULT ''")
    }
}

/// Migration 003: free comments and last update time on entries
pub struct AddEntryComments;

impl Migration for AddEntryComments {
    fn version(&self) -> u32 {
        3
    }

    fn description(&self) -> &str {
        "Add comments and updated_at to daily_entries"
    }

    fn up(&self, tx: &Transaction) -> Result<()> {
        add_column_if_missing(tx, "daily_entries", "comments", "TEXT NOT NULL DEFAULT ''")?;
        add_column_if_missing(tx, "daily_entries", "updated_at", "TEXT")
    }
}
