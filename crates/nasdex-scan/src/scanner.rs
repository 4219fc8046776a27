//! JWalk-based scan pipeline.
//!
//! One blocking producer walks the tree and pushes records into a bounded
//! queue; a small pool of workers drains it into the store. When the walk
//! completes, a cancellable cleanup job removes records for vanished files.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jwalk::{DirEntry, Parallelism, WalkDir};
use nasdex_core::path::{file_name_of, normalize_path};
use nasdex_core::{IdentityResolver, LibraryConfig, MediaRecord, derive_id, modified_seconds};
use nasdex_store::{MediaStore, UpsertOutcome};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::{CleanupScope, run_cleanup};
use crate::controller::ScanController;
use crate::error::ScanError;
use crate::filter::ScanFilter;
use crate::seen::SeenSet;

/// Progress is published at least this often while a scan runs.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep taken by the producer every `yield_every` files.
const YIELD_PAUSE: Duration = Duration::from_millis(1);

type RecordQueue = Arc<Mutex<mpsc::Receiver<MediaRecord>>>;

/// Outcome of a completed walk.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub root: PathBuf,
    /// Files processed by the workers.
    pub indexed: u64,
    /// Eligible files found by the walk.
    pub discovered: u64,
    pub elapsed: Duration,
}

/// Walks directory trees into the record store.
pub struct MediaScanner {
    config: Arc<LibraryConfig>,
    store: Arc<MediaStore>,
    resolver: Arc<IdentityResolver>,
    controller: Arc<ScanController>,
    filter: Arc<ScanFilter>,
}

impl MediaScanner {
    /// Create a scanner. Fails if a system path pattern does not compile.
    pub fn new(
        config: Arc<LibraryConfig>,
        store: Arc<MediaStore>,
        resolver: Arc<IdentityResolver>,
        controller: Arc<ScanController>,
    ) -> Result<Self, ScanError> {
        let filter = Arc::new(ScanFilter::from_config(&config)?);
        Ok(Self {
            config,
            store,
            resolver,
            controller,
            filter,
        })
    }

    pub fn controller(&self) -> &Arc<ScanController> {
        &self.controller
    }

    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// Start a scan of `root` in the background.
    ///
    /// Fails immediately if `root` is not a directory or another scan is
    /// active. Must be called from within a Tokio runtime.
    pub fn start(
        self: &Arc<Self>,
        root: impl AsRef<Path>,
    ) -> Result<JoinHandle<Result<ScanSummary, ScanError>>, ScanError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| ScanError::io(root, e))?;
        if !root.is_dir() {
            return Err(ScanError::NotADirectory { path: root });
        }

        self.controller.begin(&root)?;
        info!(root = %root.display(), "scan started");

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let result = this.run(&root).await;
            this.controller.finish();
            match &result {
                Ok(summary) => info!(
                    indexed = summary.indexed,
                    discovered = summary.discovered,
                    elapsed = ?summary.elapsed,
                    "scan finished"
                ),
                Err(err) if err.is_cancelled() => info!("scan stopped before completion"),
                Err(err) => error!(error = %err, "scan failed"),
            }
            result
        }))
    }

    /// Scan `root` and wait for the walk to finish.
    ///
    /// The cleanup job keeps running after this returns; see
    /// [`ScanController::wait_for_cleanup`].
    pub async fn scan(self: &Arc<Self>, root: impl AsRef<Path>) -> Result<ScanSummary, ScanError> {
        self.start(root)?.await?
    }

    /// Index a single file, or every eligible file beneath a directory.
    ///
    /// Returns the number of files written. Ineligible files are skipped
    /// without error.
    pub fn index_path(&self, path: impl AsRef<Path>) -> Result<u64, ScanError> {
        let path = path.as_ref();
        let path = path.canonicalize().map_err(|e| ScanError::io(path, e))?;
        let metadata = std::fs::metadata(&path).map_err(|e| ScanError::io(&path, e))?;

        if metadata.is_dir() {
            let mut indexed = 0;
            for entry in self.walker(&path, false) {
                let Some((file, metadata)) = self.eligible_file(entry) else {
                    continue;
                };
                match self.index_file(&file, &metadata) {
                    Ok(_) => indexed += 1,
                    Err(err) => warn!(path = %file.display(), error = %err, "skipping file"),
                }
            }
            return Ok(indexed);
        }

        let normalized = normalize_path(&path);
        if !self.filter.should_index(&normalized, file_name_of(&normalized)) {
            debug!(path = %normalized, "skipping ineligible file");
            return Ok(0);
        }
        self.index_file(&path, &metadata)?;
        Ok(1)
    }

    /// Build the record for a file, reusing the id already stored for its
    /// identity and carrying over cached metadata.
    pub fn build_record(&self, path: &Path, metadata: &Metadata) -> Result<MediaRecord, ScanError> {
        let identity = self.resolver.identify_with(path, metadata)?;
        let existing = self.store.get_by_identity(
            &identity.filesystem_id,
            identity.inode,
            identity.creation_time,
        )?;
        let id = existing.clone().unwrap_or_else(|| {
            derive_id(
                &identity.filesystem_id,
                identity.inode,
                identity.creation_time,
            )
        });

        let mut record = MediaRecord::new(
            id,
            &identity,
            normalize_path(path),
            metadata.len(),
            modified_seconds(metadata),
        );
        if let Some(previous_id) = existing {
            if let Some(previous) = self.store.get_by_id(&previous_id)? {
                record.inherit_metadata(&previous);
            }
        }
        Ok(record)
    }

    fn index_file(&self, path: &Path, metadata: &Metadata) -> Result<UpsertOutcome, ScanError> {
        let record = self.build_record(path, metadata)?;
        Ok(self.store.upsert(&record)?)
    }

    async fn run(self: &Arc<Self>, root: &Path) -> Result<ScanSummary, ScanError> {
        let started = Instant::now();
        self.controller.cancel_cleanup().await;

        if self.config.precount {
            let this = Arc::clone(self);
            let count_root = root.to_path_buf();
            let total = tokio::task::spawn_blocking(move || this.count_eligible(&count_root)).await?;
            self.controller.set_total(total);
            debug!(total, "pre-count finished");
        }

        let seen = Arc::new(SeenSet::new());
        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let queue: RecordQueue = Arc::new(Mutex::new(rx));

        let workers: Vec<_> = (0..self.config.worker_count.max(1))
            .map(|_| {
                let this = Arc::clone(self);
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { this.work(queue).await })
            })
            .collect();

        let ticker_done = CancellationToken::new();
        let ticker = tokio::spawn(tick_progress(
            Arc::clone(&self.controller),
            ticker_done.clone(),
        ));

        let producer = {
            let this = Arc::clone(self);
            let seen = Arc::clone(&seen);
            let root = root.to_path_buf();
            tokio::task::spawn_blocking(move || this.walk(&root, tx, &seen))
        };

        let discovered = producer.await?;
        for worker in workers {
            worker.await?;
        }
        ticker_done.cancel();
        let _ = ticker.await;

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.flush()).await??;

        if self.controller.is_stopped() {
            return Err(ScanError::Cancelled);
        }

        self.controller.set_total(discovered);
        self.schedule_cleanup(root, seen);

        Ok(ScanSummary {
            root: root.to_path_buf(),
            indexed: self.controller.progress().indexed,
            discovered,
            elapsed: started.elapsed(),
        })
    }

    /// Producer: walk the tree and queue a record per eligible file.
    fn walk(&self, root: &Path, tx: mpsc::Sender<MediaRecord>, seen: &SeenSet) -> u64 {
        let mut discovered = 0u64;
        for entry in self.walker(root, true) {
            if self.controller.is_stopped() {
                debug!("walk aborted by stop");
                break;
            }
            self.controller.wait_while_paused();
            if self.controller.is_stopped() {
                break;
            }

            let Some((path, metadata)) = self.eligible_file(entry) else {
                continue;
            };
            let record = match self.build_record(&path, &metadata) {
                Ok(record) => record,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping file");
                    continue;
                }
            };

            if !seen.first_visit(record.identity()) {
                debug!(path = %path.display(), "file already reached by another path");
                continue;
            }
            discovered += 1;
            if !self.config.precount {
                self.controller.add_total(1);
            }

            self.controller.enqueued();
            if tx.blocking_send(record).is_err() {
                self.controller.dequeued(false);
                break;
            }

            if self.config.yield_every > 0 && discovered % self.config.yield_every == 0 {
                std::thread::sleep(YIELD_PAUSE);
            }
        }
        discovered
    }

    /// Worker: drain the queue into the store until the producer is done.
    ///
    /// A failed write is logged and still counts as processed.
    async fn work(&self, queue: RecordQueue) {
        loop {
            let next = queue.lock().await.recv().await;
            let Some(record) = next else {
                break;
            };
            if self.controller.is_stopped() {
                self.controller.dequeued(false);
                continue;
            }

            let store = Arc::clone(&self.store);
            let path = record.path.clone();
            match tokio::task::spawn_blocking(move || store.upsert(&record)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(path = %path, error = %err, "failed to store record"),
                Err(err) => warn!(path = %path, error = %err, "store task failed"),
            }
            self.controller.dequeued(true);
        }
    }

    /// Best-effort count of eligible files for the progress denominator.
    fn count_eligible(&self, root: &Path) -> u64 {
        let mut count = 0;
        for entry in self.walker(root, true) {
            if self.controller.is_stopped() {
                break;
            }
            let Ok(entry) = entry else {
                continue;
            };
            if entry.file_type().is_file()
                && self.filter.should_index(
                    &normalize_path(entry.path()),
                    &entry.file_name().to_string_lossy(),
                )
            {
                count += 1;
            }
        }
        count
    }

    fn eligible_file(
        &self,
        entry: Result<DirEntry<((), ())>, jwalk::Error>,
    ) -> Option<(PathBuf, Metadata)> {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                return None;
            }
        };
        if !entry.file_type().is_file() {
            return None;
        }

        let path = entry.path();
        let normalized = normalize_path(&path);
        if !self
            .filter
            .should_index(&normalized, &entry.file_name().to_string_lossy())
        {
            debug!(path = %normalized, "skipping ineligible file");
            return None;
        }

        match entry.metadata() {
            Ok(metadata) => Some((path, metadata)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping file without metadata");
                None
            }
        }
    }

    /// Walker that prunes ineligible directories before descending.
    fn walker(&self, root: &Path, watch_stop: bool) -> WalkDir {
        let parallelism = match self.config.threads {
            0 => Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            },
            n => Parallelism::RayonNewPool(n),
        };
        let filter = Arc::clone(&self.filter);
        let controller = Arc::clone(&self.controller);

        WalkDir::new(root)
            .parallelism(parallelism)
            .skip_hidden(false)
            .follow_links(false)
            .sort(false)
            .process_read_dir(move |_depth, _path, _state, children| {
                if watch_stop && controller.is_stopped() {
                    children.clear();
                    return;
                }
                children.retain(|entry| match entry {
                    Ok(entry) if entry.file_type().is_dir() => filter.should_descend(
                        &normalize_path(entry.path()),
                        &entry.file_name().to_string_lossy(),
                    ),
                    _ => true,
                });
            })
    }

    fn schedule_cleanup(&self, root: &Path, seen: Arc<SeenSet>) {
        let scope = if self.is_library_root(root) {
            CleanupScope::FullRoot
        } else {
            CleanupScope::Under {
                prefix: normalize_path(root),
                seen,
            }
        };
        debug!(?scope, "scheduling cleanup");

        let token = CancellationToken::new();
        let job_token = token.clone();
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            let result =
                match tokio::task::spawn_blocking(move || run_cleanup(&store, &scope, &job_token))
                    .await
                {
                    Ok(result) => result,
                    Err(err) => Err(ScanError::Join(err)),
                };
            match &result {
                Err(err) if err.is_cancelled() => debug!("cleanup cancelled"),
                Err(err) => warn!(error = %err, "cleanup failed"),
                Ok(_) => {}
            }
            result
        });
        self.controller.set_cleanup(token, handle);
    }

    fn is_library_root(&self, root: &Path) -> bool {
        let library_root = &self.config.library_root;
        let library_root = library_root
            .canonicalize()
            .unwrap_or_else(|_| library_root.clone());
        normalize_path(library_root) == normalize_path(root)
    }
}

/// Publish progress once per interval until `done` fires.
async fn tick_progress(controller: Arc<ScanController>, done: CancellationToken) {
    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = interval.tick() => controller.publish(),
        }
    }
}
