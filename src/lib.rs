//! nasdex: media indexing and search for a personal NAS.
//!
//! [`MediaLibrary`] ties the record store, scan pipeline and search engine
//! together behind the small API the rest of the server calls into
//! (uploads, trash, sharing, the HTTP layer).
//!
//! ```rust,no_run
//! use nasdex::{LibraryConfig, MediaLibrary, SearchFilters};
//!
//! # async fn demo() -> Result<(), nasdex::LibraryError> {
//! let library = MediaLibrary::open(LibraryConfig::new("/var/lib/nasdex", "/srv/media"))?;
//! library.start_scan("/srv/media")?.await??;
//! library.rebuild_index()?;
//!
//! let hits = library.search("holiday 2019", &SearchFilters::default(), 0, 50)?;
//! println!("{} matches", hits.len());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

pub use nasdex_core::path::resolve_path;
pub use nasdex_core::{
    ConfigError, IdentityError, IdentityResolver, LibraryConfig, MediaRecord, MediaType,
};
pub use nasdex_scan::{
    CleanupReport, ScanController, ScanError, ScanProgress, ScanState, ScanSummary,
};
pub use nasdex_search::{IndexError, IndexStats, SearchError, SearchFilters};
pub use nasdex_store::{
    IndexKind, MediaMetadata, MetadataProbe, ProbedMetadata, StoreError, UpsertOutcome,
};

use nasdex_scan::MediaScanner;
use nasdex_search::SearchEngine;
use nasdex_store::MediaStore;

/// Errors returned by [`MediaLibrary`].
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// The background scan task panicked or was aborted.
    #[error("Scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Creating the data directory or resolving a path failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Counters reported by [`MediaLibrary::progress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub indexed: u64,
    pub total: u64,
    /// `idle`, `running`, `paused` or `stopped`.
    pub state: String,
}

/// The media index of one NAS.
pub struct MediaLibrary {
    config: Arc<LibraryConfig>,
    store: Arc<MediaStore>,
    controller: Arc<ScanController>,
    scanner: Arc<MediaScanner>,
    engine: SearchEngine,
}

impl MediaLibrary {
    /// Open (or create) the library's store under `config.data_dir`.
    pub fn open(config: LibraryConfig) -> Result<Self, LibraryError> {
        let resolver = Arc::new(IdentityResolver::new(config.mount_cache_ttl()));
        Self::open_with_resolver(config, resolver)
    }

    /// Like [`open`](Self::open), with a caller-supplied identity resolver.
    pub fn open_with_resolver(
        config: LibraryConfig,
        resolver: Arc<IdentityResolver>,
    ) -> Result<Self, LibraryError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|source| LibraryError::Io {
            path: config.data_dir.clone(),
            source,
        })?;

        let config = Arc::new(config);
        let store = Arc::new(MediaStore::open(config.store_path())?);
        let controller = Arc::new(ScanController::new());
        let scanner = Arc::new(MediaScanner::new(
            Arc::clone(&config),
            Arc::clone(&store),
            resolver,
            Arc::clone(&controller),
        )?);
        let engine = SearchEngine::from_config(Arc::clone(&store), &config);

        info!(data_dir = %config.data_dir.display(), "media library opened");
        Ok(Self {
            config,
            store,
            controller,
            scanner,
            engine,
        })
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Write a record built by a collaborator (upload, copy, restore).
    pub fn upsert(&self, record: &MediaRecord) -> Result<UpsertOutcome, LibraryError> {
        Ok(self.store.upsert(record)?)
    }

    /// Index a file, or every eligible file beneath a directory.
    pub fn upsert_path(&self, path: impl AsRef<Path>) -> Result<u64, LibraryError> {
        Ok(self.scanner.index_path(path)?)
    }

    /// [`upsert_path`](Self::upsert_path) followed by a durable flush.
    pub fn scan_file(&self, path: impl AsRef<Path>) -> Result<u64, LibraryError> {
        let indexed = self.upsert_path(path)?;
        self.store.flush()?;
        Ok(indexed)
    }

    /// Forget a file, or every record beneath a directory. Returns removed ids.
    ///
    /// The path is resolved like [`upsert_path`](Self::upsert_path) resolves
    /// it, so links and relative paths reach the stored record even after
    /// the file is gone from disk.
    pub fn remove_path(&self, path: impl AsRef<Path>) -> Result<Vec<String>, LibraryError> {
        let path = resolve(path.as_ref())?;
        Ok(self.store.delete_path(&path)?)
    }

    /// Permanently delete one record.
    pub fn delete(&self, id: &str) -> Result<bool, LibraryError> {
        Ok(self.store.delete(id)?)
    }

    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MediaRecord>, LibraryError> {
        Ok(self.engine.search(query, filters, offset, limit)?)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<MediaRecord>, LibraryError> {
        Ok(self.store.get_by_id(id)?)
    }

    pub fn get_by_path(&self, path: impl AsRef<Path>) -> Result<Option<MediaRecord>, LibraryError> {
        let path = resolve(path.as_ref())?;
        let Some(id) = self.store.get_by_path(&path)? else {
            return Ok(None);
        };
        Ok(self.store.get_by_id(&id)?)
    }

    /// One page of records sorted by one of the composite indexes.
    pub fn list(
        &self,
        media_type: MediaType,
        is_trash: bool,
        kind: IndexKind,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MediaRecord>, LibraryError> {
        Ok(self.store.list(media_type, is_trash, kind, offset, limit)?)
    }

    pub fn count_records(&self) -> Result<u64, LibraryError> {
        Ok(self.store.count_records()?)
    }

    /// Start a background scan of `root`. Must be called inside a Tokio runtime.
    pub fn start_scan(
        &self,
        root: impl AsRef<Path>,
    ) -> Result<JoinHandle<Result<ScanSummary, ScanError>>, LibraryError> {
        Ok(self.scanner.start(root)?)
    }

    /// Scan the configured library root and wait for the walk to finish.
    pub async fn scan_library(&self) -> Result<ScanSummary, LibraryError> {
        let root = self.config.library_root.clone();
        Ok(self.scanner.scan(root).await?)
    }

    pub fn pause_scan(&self) -> bool {
        self.controller.pause()
    }

    pub fn resume_scan(&self) -> bool {
        self.controller.resume()
    }

    pub fn stop_scan(&self) {
        self.controller.stop();
    }

    pub fn progress(&self) -> ProgressSnapshot {
        let progress = self.controller.progress();
        ProgressSnapshot {
            indexed: progress.indexed,
            total: progress.total,
            state: progress.state.to_string(),
        }
    }

    /// Progress events, published at least once per second while scanning.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.controller.subscribe()
    }

    /// Wait for the cleanup job scheduled by the last completed scan.
    pub async fn wait_for_cleanup(&self) -> Result<Option<CleanupReport>, LibraryError> {
        match self.controller.wait_for_cleanup().await {
            Some(Ok(report)) => Ok(Some(report)),
            Some(Err(err)) if err.is_cancelled() => Ok(None),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }

    /// Rebuild the search index from the current store contents.
    pub fn rebuild_index(&self) -> Result<IndexStats, LibraryError> {
        Ok(self.engine.rebuild()?)
    }

    /// Delete every record and the search index ahead of a full reindex.
    ///
    /// Refused while a scan is running or paused.
    pub fn reset_data(&self) -> Result<u64, LibraryError> {
        let progress = self.controller.progress();
        if progress.state.is_active() {
            return Err(ScanError::AlreadyRunning {
                root: progress.root,
            }
            .into());
        }
        let removed = self.store.reset_data()?;
        self.engine.clear_index()?;
        info!(removed, "library data reset");
        Ok(removed)
    }

    /// Cached duration/artist/title for a record, re-probed when stale.
    pub fn get_or_refresh_metadata(
        &self,
        id: &str,
        probe: &dyn MetadataProbe,
    ) -> Result<Option<MediaMetadata>, LibraryError> {
        Ok(self.store.get_or_refresh_metadata(id, probe)?)
    }
}

fn resolve(path: &Path) -> Result<String, LibraryError> {
    resolve_path(path).map_err(|source| LibraryError::Io {
        path: path.to_path_buf(),
        source,
    })
}
