//! Error types for store operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`crate::MediaStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] redb::Error),

    /// Creating the data directory or touching a file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A stored key or value is not what its namespace promises.
    #[error("Corrupt entry under {key}")]
    Corrupt { key: String },

    /// The metadata collaborator failed to probe a file.
    #[error("Metadata probe failed for {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cancellable job observed its token.
    #[error("Operation cancelled")]
    Cancelled,
}

macro_rules! from_redb {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(err: $ty) -> Self {
                    StoreError::Database(err.into())
                }
            }
        )*
    };
}

from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl StoreError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}
