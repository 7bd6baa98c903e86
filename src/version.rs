// Version and build information, embedded by build.rs

use std::fmt;

/// Version information structure
pub struct VersionInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub git_dirty: bool,
    pub build_date: &'static str,
    pub build_profile: &'static str,
}

impl VersionInfo {
    /// Get the current version information
    pub fn current() -> Self {
        Self {
            version: env!("TRACKER_VERSION"),
            git_hash: env!("TRACKER_GIT_HASH"),
            git_dirty: env!("TRACKER_GIT_DIRTY") == "true",
            build_date: env!("TRACKER_BUILD_DATE"),
            build_profile: env!("TRACKER_BUILD_PROFILE"),
        }
    }

    /// Get a short version string (just version and git hash)
    pub fn short(&self) -> String {
        if self.git_dirty {
            format!("v{} ({}+dirty)", self.version, self.git_hash)
        } else {
            format!("v{} ({})", self.version, self.git_hash)
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Study Tracker {}", self.short())?;
        writeln!(f, "Built: {} ({})", self.build_date, self.build_profile)?;
        Ok(())
    }
}

/// Get the version string for --version-full output
pub fn version_string() -> String {
    VersionInfo::current().to_string()
}
