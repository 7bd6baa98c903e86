use crate::common::get_data_dir;
use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure for the tracker.
///
/// Loaded once by the binary and handed to each component; nothing in the
/// library reads configuration from a global.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Excel export configuration
    pub export: ExportConfig,

    /// Session timer configuration
    pub timer: TimerConfig,

    /// KPI calculation settings
    pub kpi: KpiConfig,

    /// Retry configuration
    pub retry: RetryConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to database file (relative to data directory)
    pub path: String,

    /// Maximum connection pool size
    pub max_connections: u32,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u32,

    /// How long to wait for a pooled connection, in milliseconds
    pub connection_timeout_ms: u64,
}

/// Excel export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Workbook path (relative to data directory unless absolute)
    pub path: String,

    /// Days covered by stats, kpis and export when no range is given
    pub default_range_days: u32,
}

/// Session timer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Interval between progress ticks in milliseconds
    pub tick_interval_ms: u64,
}

/// KPI calculation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiConfig {
    /// Hours in a nominal working day; anything above counts as overtime
    pub nominal_day_hours: f64,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// File operation retry configuration
    pub file_ops: RetrySettings,

    /// Database operation retry configuration
    pub db_ops: RetrySettings,
}

/// Individual retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Backoff factor (multiplier for each retry)
    pub backoff_factor: f32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "tracker.db".to_string(),
            max_connections: 4,
            busy_timeout_ms: 10000,
            connection_timeout_ms: 5000,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            path: "statistics.xlsx".to_string(),
            default_range_days: 7,
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        TimerConfig {
            tick_interval_ms: 1000,
        }
    }
}

impl Default for KpiConfig {
    fn default() -> Self {
        KpiConfig {
            nominal_day_hours: 8.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            file_ops: RetrySettings {
                max_attempts: 3,
                initial_delay_ms: 100,
                max_delay_ms: 5000,
                backoff_factor: 2.0,
            },
            db_ops: RetrySettings {
                max_attempts: 5,
                initial_delay_ms: 50,
                max_delay_ms: 2000,
                backoff_factor: 1.5,
            },
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_factor: 2.0,
        }
    }
}

impl DatabaseConfig {
    /// Absolute database path, resolved against the data directory
    pub fn resolved_path(&self) -> PathBuf {
        resolve_against_data_dir(&self.path)
    }
}

impl ExportConfig {
    /// Absolute workbook path, resolved against the data directory
    pub fn resolved_path(&self) -> PathBuf {
        resolve_against_data_dir(&self.path)
    }
}

fn resolve_against_data_dir(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        get_data_dir().join(path)
    }
}

// Configuration loading
impl Config {
    /// Load configuration from the explicit path if given, otherwise from
    /// the standard locations, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        match Self::find_config_file() {
            Some(config_path) => Self::load_from_file(&config_path),
            None => Ok(Config::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| TrackerError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| TrackerError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TrackerError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        fs::write(path, toml_string)
            .map_err(|e| TrackerError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(TrackerError::Config(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.timer.tick_interval_ms == 0 {
            return Err(TrackerError::Config(
                "timer.tick_interval_ms must be positive".into(),
            ));
        }
        if !(self.kpi.nominal_day_hours.is_finite() && self.kpi.nominal_day_hours >= 0.0) {
            return Err(TrackerError::Config(
                "kpi.nominal_day_hours must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// Find config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // 1. Environment variable
        if let Ok(path) = std::env::var("STUDY_TRACKER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. XDG config directory
        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("study-tracker").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        // 3. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            let path = home_dir.join(".study-tracker.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Get default config file path (for creating new config)
    pub fn default_config_path() -> Result<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("study-tracker").join("config.toml"))
        } else {
            Err(TrackerError::Config(
                "Could not determine config directory".into(),
            ))
        }
    }

    /// Generate example config file content
    pub fn example_toml() -> &'static str {
        r#"# Study Tracker Configuration File
#
# All values shown are the defaults - you can override only what you need.

[database]
path = "tracker.db"        # Relative to the data directory
max_connections = 4
busy_timeout_ms = 10000
connection_timeout_ms = 5000

[export]
path = "statistics.xlsx"   # Relative to the data directory unless absolute
default_range_days = 7     # Range used by stats, kpis and export without --from/--to

[timer]
tick_interval_ms = 1000    # Progress refresh while tracking

[kpi]
nominal_day_hours = 8.0    # Hours above this per day count as overtime

[retry.file_ops]
max_attempts = 3
initial_delay_ms = 100
max_delay_ms = 5000
backoff_factor = 2.0

[retry.db_ops]
max_attempts = 5
initial_delay_ms = 50
max_delay_ms = 2000
backoff_factor = 1.5
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.export.default_range_days, 7);
        assert_eq!(config.timer.tick_interval_ms, 1000);
        assert_eq!(config.kpi.nominal_day_hours, 8.0);
        assert_eq!(config.database.path, "tracker.db");
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.export.default_range_days = 30;
        config.save(&config_path).unwrap();

        let loaded = Config::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.export.default_range_days, 30);
        assert_eq!(loaded.retry.db_ops.max_attempts, 5);
    }

    #[test]
    fn test_example_config_parses_to_defaults() {
        let parsed: Config = toml::from_str(Config::example_toml()).unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.export.path, defaults.export.path);
        assert_eq!(parsed.database.busy_timeout_ms, defaults.database.busy_timeout_ms);
        assert_eq!(parsed.kpi.nominal_day_hours, defaults.kpi.nominal_day_hours);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[export]\npath = \"/tmp/out.xlsx\"\n").unwrap();

        let loaded = Config::load(Some(&config_path)).unwrap();
        assert_eq!(loaded.export.path, "/tmp/out.xlsx");
        assert_eq!(loaded.export.default_range_days, 7);
        assert_eq!(loaded.export.resolved_path(), PathBuf::from("/tmp/out.xlsx"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[timer]\ntick_interval_ms = 0\n").unwrap();

        assert!(matches!(
            Config::load_from_file(&config_path),
            Err(TrackerError::Config(_))
        ));
    }

    #[test]
    fn test_relative_paths_resolve_into_data_dir() {
        let config = Config::default();
        let db_path = config.database.resolved_path();
        assert!(db_path.ends_with("study-tracker/tracker.db"));
    }
}
