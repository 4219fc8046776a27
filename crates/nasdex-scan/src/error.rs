//! Error types for scanning operations.

use std::path::PathBuf;

use nasdex_core::{ConfigError, IdentityError};
use nasdex_store::StoreError;
use thiserror::Error;

/// Errors that can occur during scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A scan is already running or paused.
    #[error("A scan is already in progress for {root}")]
    AlreadyRunning { root: PathBuf },

    /// The file's identity triplet could not be determined.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Store read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid configuration (bad system path pattern).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The scan was stopped or the cleanup job was cancelled.
    #[error("Scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether this is the cooperative stop signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Store(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_maps_kind() {
        let err = ScanError::io(
            "/srv/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, ScanError::NotFound { .. }));

        let err = ScanError::io(
            "/srv/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
        );
        assert!(matches!(err, ScanError::PermissionDenied { .. }));
    }

    #[test]
    fn test_store_cancellation_is_cancellation() {
        assert!(ScanError::from(StoreError::Cancelled).is_cancelled());
        assert!(ScanError::Cancelled.is_cancelled());
        assert!(!ScanError::NotADirectory { path: "/".into() }.is_cancelled());
    }
}
