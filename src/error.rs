//! Error types for Stagehand

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Stagehand operations
pub type Result<T> = std::result::Result<T, StagehandError>;

/// Main error type for Stagehand
#[derive(Error, Debug)]
pub enum StagehandError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Lock acquisition errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Project '{0}' is not defined")]
    ProjectNotFound(String),

    #[error("Stage '{stage}' is not defined for project '{project}'")]
    StageNotFound { project: String, stage: String },

    #[error("Stage '{project}/{stage}' has no commands")]
    EmptyStage { project: String, stage: String },

    #[error("Failed to load environment file '{path}': {error}")]
    EnvFile { path: PathBuf, error: String },
}

/// Lock acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The resource stayed locked for the whole timeout
    #[error("Timed out after {waited:?} waiting for lock on {resource}")]
    Timeout { resource: String, waited: Duration },
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Helper function to determine if an error is a lock timeout
/// (which callers usually report and retry rather than abort on)
pub fn is_lock_timeout(err: &StagehandError) -> bool {
    matches!(err, StagehandError::Lock(LockError::Timeout { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_message() {
        let err = LockError::Timeout {
            resource: "42".to_string(),
            waited: Duration::from_secs(1),
        };
        assert_eq!(err.to_string(), "Timed out after 1s waiting for lock on 42");
    }

    #[test]
    fn test_is_lock_timeout() {
        let err: StagehandError = LockError::Timeout {
            resource: "demo".to_string(),
            waited: Duration::from_millis(10),
        }
        .into();
        assert!(is_lock_timeout(&err));

        let err: StagehandError = ConfigError::ProjectNotFound("demo".to_string()).into();
        assert!(!is_lock_timeout(&err));
    }
}
