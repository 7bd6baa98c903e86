//! Common utilities shared across modules.

use crate::error::{Result, TrackerError};
use chrono::{Local, NaiveDate};
use std::path::PathBuf;

/// Date format used in the database, on the command line and in exports.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Gets the application data directory using XDG Base Directory specification.
///
/// Returns `~/.local/share/study-tracker/` on Unix-like systems.
///
/// # Example
///
/// ```rust,no_run
/// use study_tracker::common::get_data_dir;
///
/// let db_file = get_data_dir().join("tracker.db");
/// ```
pub fn get_data_dir() -> PathBuf {
    let base_dir = dirs::data_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local").join("share")
    });

    base_dir.join("study-tracker")
}

/// Gets the current timestamp in ISO 8601 format.
pub fn current_timestamp() -> String {
    Local::now().to_rfc3339()
}

/// Today's date in local time.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Parses a `YYYY-MM-DD` date.
///
/// # Example
///
/// ```rust
/// use study_tracker::common::parse_date;
///
/// assert!(parse_date("2024-01-31").is_ok());
/// assert!(parse_date("31/01/2024").is_err());
/// ```
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|e| {
        TrackerError::constraint(format!("invalid date '{}' (expected YYYY-MM-DD): {}", input, e))
    })
}

/// Null-safe division: `None` when the denominator is zero or either side
/// is not finite.
///
/// ```rust
/// use study_tracker::common::ratio;
///
/// assert_eq!(ratio(3.0, 4.0), Some(0.75));
/// assert_eq!(ratio(3.0, 0.0), None);
/// ```
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// [`ratio`] scaled to a percentage.
pub fn percent(numerator: f64, denominator: f64) -> Option<f64> {
    ratio(numerator, denominator).map(|r| r * 100.0)
}

/// Formats an optional value, printing `N/A` for `None`.
pub fn format_optional(value: Option<f64>, suffix: &str, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}{}", decimals, v, suffix),
        None => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_data_dir() {
        let dir = get_data_dir();
        assert!(dir.to_string_lossy().contains("study-tracker"));
    }

    #[test]
    fn test_current_timestamp() {
        let ts = current_timestamp();
        assert!(ts.contains('T'));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date(" 2024-02-29 ").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(matches!(
            parse_date("2023-02-29"),
            Err(TrackerError::ConstraintViolation(_))
        ));
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_ratio_guards_zero_and_nan() {
        assert_eq!(ratio(1.0, 0.0), None);
        assert_eq!(ratio(f64::NAN, 2.0), None);
        assert_eq!(ratio(1.0, f64::INFINITY), None);
        assert_eq!(percent(1.0, 4.0), Some(25.0));
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some(12.345), "%", 1), "12.3%");
        assert_eq!(format_optional(None, "%", 1), "N/A");
    }
}
