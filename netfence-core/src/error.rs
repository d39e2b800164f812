//! Error types for network isolation operations

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FenceError>;

/// Coarse classification of a failure, used by callers to decide what to tell the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Elevated privilege is required; the user has to act
    Permission,
    /// A path, root or rule that was expected is absent
    NotFound,
    /// An external utility failed to start, exited non-zero or timed out
    External,
    /// External state changed underneath us; retrying on the next trigger is enough
    Transient,
    /// Settings or arguments are malformed
    Invalid,
}

#[derive(Debug, Error)]
pub enum FenceError {
    #[error("Permission denied writing {0}")]
    PermissionDenied(PathBuf),

    #[error("{operation} requires elevation: {output}")]
    ElevationRequired { operation: String, output: String },

    #[error("Path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("Directory does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("Failed to start {program}: {source}")]
    CommandSpawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {output}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{program} did not finish within {timeout_ms} ms")]
    CommandTimeout { program: String, timeout_ms: u64 },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Invalid {field} {value:?}; expected {expected}")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: String,
    },

    #[error("Process source error: {0}")]
    ProcessSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FenceError {
    /// Map a filesystem write failure, keeping permission problems distinguishable
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            FenceError::PermissionDenied(path)
        } else {
            FenceError::Write { path, source }
        }
    }

    /// Map a filesystem read failure
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => FenceError::NotFound(path),
            std::io::ErrorKind::PermissionDenied => FenceError::PermissionDenied(path),
            _ => FenceError::Read { path, source },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FenceError::PermissionDenied(_) | FenceError::ElevationRequired { .. } => {
                ErrorKind::Permission
            }
            FenceError::NotFound(_) | FenceError::RootNotFound(_) => ErrorKind::NotFound,
            FenceError::CommandSpawn { .. }
            | FenceError::CommandFailed { .. }
            | FenceError::CommandTimeout { .. } => ErrorKind::External,
            FenceError::Read { .. }
            | FenceError::Write { .. }
            | FenceError::Json(_)
            | FenceError::ProcessSource(_)
            | FenceError::Io(_) => ErrorKind::Transient,
            FenceError::Settings(_) | FenceError::InvalidValue { .. } => ErrorKind::Invalid,
        }
    }

    /// True when the failure needs the user to re-run with elevated privilege
    pub fn is_permission(&self) -> bool {
        self.kind() == ErrorKind::Permission
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings from {path}: {source}")]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid rule prefix: {0}")]
    InvalidPrefix(String),

    #[error("Invalid hosts marker: {0}")]
    InvalidMarker(String),

    #[error("Invalid sinkhole address: {0}")]
    InvalidSinkhole(String),

    #[error("Invalid executable pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid timeout for {0}: must be non-zero")]
    InvalidTimeout(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_write_permission_is_distinct() {
        let err = FenceError::write("/etc/hosts", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, FenceError::PermissionDenied(_)));
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert!(err.is_permission());
    }

    #[test]
    fn test_read_not_found() {
        let err = FenceError::read("/missing", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_command_errors_are_external() {
        let err = FenceError::CommandTimeout {
            program: "netsh".to_string(),
            timeout_ms: 10,
        };
        assert_eq!(err.kind(), ErrorKind::External);
    }
}
