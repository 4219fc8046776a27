//! Error types for index builds and searches.

use std::path::PathBuf;

use nasdex_store::StoreError;
use thiserror::Error;

/// Errors raised while writing or opening the on-disk index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Reading, writing or mapping an artifact failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A dictionary or manifest is not valid JSON.
    #[error("Index encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// An artifact exists but its contents are inconsistent.
    #[error("Corrupt index artifact {artifact}: {reason}")]
    Corrupt { artifact: String, reason: String },

    /// No manifest, or one written by an incompatible build.
    #[error("Index at {path} is missing or stale")]
    Stale { path: PathBuf },

    /// Reading records for a rebuild failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by [`crate::SearchEngine::search`].
///
/// Index problems never appear here; they degrade to a linear scan.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The record store could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A rebuild requested through the engine failed.
    #[error(transparent)]
    Index(#[from] IndexError),
}
