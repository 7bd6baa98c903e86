//! Error handling module for the study tracker.
//!
//! A single `thiserror` enum covers the whole crate. The first five variants
//! are the domain taxonomy callers branch on; the rest wrap lower level
//! failures so `?` works across module boundaries.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the study tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// The database file cannot be opened or initialized. Tracking must stop
    /// until this is resolved.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A write was rejected; the previously stored state is unchanged.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The addressed record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The export target cannot be written (permissions, lock held, ...).
    #[error("Cannot write export to {}: {reason}", path.display())]
    PathUnwritable { path: PathBuf, reason: String },

    /// An existing sheet has columns this version cannot read.
    #[error("Sheet schema mismatch: {0}")]
    SchemaMismatch(String),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// CSV reading or writing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Database operation errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Lock acquisition errors
    #[error("Failed to acquire lock: {0}")]
    LockFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workbook construction errors
    #[error("Workbook error: {0}")]
    Workbook(String),

    /// Generic operation errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    pub fn storage(msg: impl Into<String>) -> Self {
        TrackerError::StorageUnavailable(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        TrackerError::ConstraintViolation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TrackerError::NotFound(msg.into())
    }

    pub fn unwritable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TrackerError::PathUnwritable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        TrackerError::LockFailed(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        TrackerError::Other(msg.into())
    }

    /// Map a rusqlite error, turning SQLite constraint failures into
    /// `ConstraintViolation` with the given context.
    pub fn from_sqlite(err: rusqlite::Error, context: &str) -> Self {
        if err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            TrackerError::ConstraintViolation(format!("{}: {}", context, err))
        } else {
            TrackerError::Database(err)
        }
    }
}

impl From<rust_xlsxwriter::XlsxError> for TrackerError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        TrackerError::Workbook(err.to_string())
    }
}

impl From<String> for TrackerError {
    fn from(s: String) -> Self {
        TrackerError::Other(s)
    }
}

impl From<&str> for TrackerError {
    fn from(s: &str) -> Self {
        TrackerError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritable_message_includes_path() {
        let err = TrackerError::unwritable("/tmp/stats.xlsx", "locked");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/stats.xlsx"));
        assert!(msg.contains("locked"));
    }

    #[test]
    fn test_constraint_error_mapping() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err();
        match TrackerError::from_sqlite(err, "insert") {
            TrackerError::ConstraintViolation(msg) => assert!(msg.starts_with("insert")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_other_errors_stay_database() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(
            TrackerError::from_sqlite(err, "select"),
            TrackerError::Database(_)
        ));
    }
}
