//! Error handling module for the planner
//!
//! Provides centralized error handling with proper error types using thiserror.
//! The variants follow the installer's failure taxonomy: configuration problems
//! abort before anything destructive happens, resolution diagnostics only become
//! fatal when a download queue is requested, and executor failures abort the
//! partition plan in progress.

use std::collections::BTreeSet;

use thiserror::Error;

/// Main error type for the planner
#[derive(Error, Debug)]
pub enum PlannerError {
    /// IO errors (sysfs reads, cache files, metalink output)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (disk size undetectable, config file missing or invalid)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The target disk cannot hold a root filesystem after the fixed partitions
    #[error(
        "Disk too small: {disk_mib} MiB available, at least {required_mib} MiB needed before root"
    )]
    DiskTooSmall { disk_mib: u64, required_mib: u64 },

    /// A partitioning, formatting, LUKS or LVM command failed
    #[error("Executor error: {0}")]
    Executor(String),

    /// The package request could not be fully resolved
    #[error("Unresolved request: not found {not_found:?}, missing dependencies {missing_deps:?}")]
    Unresolved {
        not_found: BTreeSet<String>,
        missing_deps: Vec<String>,
    },

    /// Metalink writing or parsing errors
    #[error("Metalink error: {0}")]
    Metalink(String),

    /// Effective uid/gid switching errors
    #[error("Privilege error: {0}")]
    Privilege(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for planner operations
pub type Result<T> = std::result::Result<T, PlannerError>;

// Convenient error constructors
impl PlannerError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an executor error
    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }

    /// Create a metalink error
    pub fn metalink(msg: impl Into<String>) -> Self {
        Self::Metalink(msg.into())
    }

    /// Create a privilege error
    pub fn privilege(msg: impl Into<String>) -> Self {
        Self::Privilege(msg.into())
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// Returns true for errors raised before any destructive command was issued.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::DiskTooSmall { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlannerError::config("cannot detect size of /dev/sdz");
        assert_eq!(
            err.to_string(),
            "Configuration error: cannot detect size of /dev/sdz"
        );

        let err = PlannerError::executor("vgcreate failed");
        assert_eq!(err.to_string(), "Executor error: vgcreate failed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PlannerError = io_err.into();
        assert!(matches!(err, PlannerError::Io(_)));
    }

    #[test]
    fn test_disk_too_small_is_configuration() {
        let err = PlannerError::DiskTooSmall {
            disk_mib: 400,
            required_mib: 498,
        };
        assert!(err.is_configuration());
        assert!(err.to_string().contains("400 MiB"));
        assert!(!PlannerError::executor("mkfs").is_configuration());
    }

    #[test]
    fn test_unresolved_lists_names() {
        let err = PlannerError::Unresolved {
            not_found: BTreeSet::from(["nosuchpkg".to_string()]),
            missing_deps: vec!["libfoo>=2".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("nosuchpkg"));
        assert!(msg.contains("libfoo>=2"));
    }
}
