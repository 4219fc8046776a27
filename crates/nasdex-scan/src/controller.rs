//! Shared scan control and progress state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cleanup::CleanupReport;
use crate::error::ScanError;
use crate::progress::{ScanProgress, ScanState};

/// How long a paused walk sleeps between checks.
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// The post-scan cleanup job of the last completed scan.
struct CleanupJob {
    token: CancellationToken,
    handle: JoinHandle<Result<CleanupReport, ScanError>>,
}

/// Scan state shared between the caller, the walk, the workers and the
/// progress ticker.
///
/// Constructed once and passed around behind an `Arc`; every field is atomic
/// or lock-guarded so any of them may be read while a scan runs.
pub struct ScanController {
    state: AtomicU8,
    stop: AtomicBool,
    indexed: AtomicU64,
    pending: AtomicU64,
    total: AtomicU64,
    root: Mutex<PathBuf>,
    started: Mutex<Option<Instant>>,
    cleanup: Mutex<Option<CleanupJob>>,
    progress_tx: broadcast::Sender<ScanProgress>,
}

impl std::fmt::Debug for ScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController")
            .field("state", &self.state())
            .field("indexed", &self.indexed.load(Ordering::Relaxed))
            .field("total", &self.total.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for ScanController {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanController {
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            state: AtomicU8::new(ScanState::Idle as u8),
            stop: AtomicBool::new(false),
            indexed: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            total: AtomicU64::new(0),
            root: Mutex::new(PathBuf::new()),
            started: Mutex::new(None),
            cleanup: Mutex::new(None),
            progress_tx,
        }
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Snapshot of the current counters.
    pub fn progress(&self) -> ScanProgress {
        ScanProgress {
            indexed: self.indexed.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            state: self.state(),
            root: lock(&self.root).clone(),
            elapsed: (*lock(&self.started))
                .map(|started| started.elapsed())
                .unwrap_or_default(),
        }
    }

    /// Pause the walk. Returns `false` unless a scan was running.
    pub fn pause(&self) -> bool {
        let paused = self.transition(ScanState::Running, ScanState::Paused);
        if paused {
            info!("scan paused");
            self.publish();
        }
        paused
    }

    /// Resume a paused walk. Returns `false` unless the scan was paused.
    pub fn resume(&self) -> bool {
        let resumed = self.transition(ScanState::Paused, ScanState::Running);
        if resumed {
            info!("scan resumed");
            self.publish();
        }
        resumed
    }

    /// Abort the walk and cancel any running cleanup job.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let stopped = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                ScanState::from_u8(current)
                    .is_active()
                    .then_some(ScanState::Stopped as u8)
            })
            .is_ok();
        if let Some(job) = lock(&self.cleanup).as_ref() {
            job.token.cancel();
        }
        if stopped {
            info!("scan stopped");
            self.publish();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Block the calling thread while the scan is paused.
    ///
    /// Returns early once stopped.
    pub fn wait_while_paused(&self) {
        while self.state() == ScanState::Paused && !self.is_stopped() {
            std::thread::sleep(PAUSE_POLL);
        }
    }

    /// Wait for the last cleanup job, if one is still registered.
    pub async fn wait_for_cleanup(&self) -> Option<Result<CleanupReport, ScanError>> {
        let job = lock(&self.cleanup).take()?;
        Some(match job.handle.await {
            Ok(result) => result,
            Err(err) => Err(ScanError::Join(err)),
        })
    }

    /// Cancel the previous cleanup job and wait for it to observe the token.
    pub(crate) async fn cancel_cleanup(&self) {
        let job = lock(&self.cleanup).take();
        if let Some(job) = job {
            job.token.cancel();
            match job.handle.await {
                Ok(Err(err)) if !err.is_cancelled() => {
                    debug!(error = %err, "previous cleanup failed");
                }
                Err(err) => debug!(error = %err, "previous cleanup task aborted"),
                _ => {}
            }
        }
    }

    pub(crate) fn set_cleanup(
        &self,
        token: CancellationToken,
        handle: JoinHandle<Result<CleanupReport, ScanError>>,
    ) {
        *lock(&self.cleanup) = Some(CleanupJob { token, handle });
    }

    /// Enter `Running` for a new scan of `root`, resetting the counters.
    pub(crate) fn begin(&self, root: &Path) -> Result<(), ScanError> {
        let claimed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!ScanState::from_u8(current).is_active()).then_some(ScanState::Running as u8)
            })
            .is_ok();
        if !claimed {
            return Err(ScanError::AlreadyRunning {
                root: lock(&self.root).clone(),
            });
        }
        self.stop.store(false, Ordering::Release);
        self.indexed.store(0, Ordering::Relaxed);
        self.pending.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        *lock(&self.root) = root.to_path_buf();
        *lock(&self.started) = Some(Instant::now());
        self.publish();
        Ok(())
    }

    /// Leave the active states; a stopped scan stays `Stopped`.
    pub(crate) fn finish(&self) {
        if !self.transition(ScanState::Running, ScanState::Idle) {
            self.transition(ScanState::Paused, ScanState::Idle);
        }
        self.publish();
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn add_total(&self, count: u64) {
        self.total.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn enqueued(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// A queued file left the queue; `written` counts it as indexed.
    pub(crate) fn dequeued(&self, written: bool) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        if written {
            self.indexed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Send the current snapshot to subscribers.
    pub(crate) fn publish(&self) {
        let _ = self.progress_tx.send(self.progress());
    }

    fn transition(&self, from: ScanState, to: ScanState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lifecycle() {
        let controller = ScanController::new();
        assert_eq!(controller.state(), ScanState::Idle);
        assert!(!controller.pause());

        controller.begin(Path::new("/srv/media")).unwrap();
        assert_eq!(controller.state(), ScanState::Running);
        assert!(matches!(
            controller.begin(Path::new("/srv/other")),
            Err(ScanError::AlreadyRunning { .. })
        ));

        assert!(controller.pause());
        assert_eq!(controller.state(), ScanState::Paused);
        assert!(!controller.pause());
        assert!(controller.resume());
        assert_eq!(controller.state(), ScanState::Running);

        controller.finish();
        assert_eq!(controller.state(), ScanState::Idle);
        assert_eq!(controller.progress().root, PathBuf::from("/srv/media"));
    }

    #[test]
    fn test_stop_is_terminal_until_next_scan() {
        let controller = ScanController::new();
        controller.begin(Path::new("/srv")).unwrap();
        controller.pause();
        controller.stop();
        assert_eq!(controller.state(), ScanState::Stopped);
        assert!(controller.is_stopped());
        assert!(!controller.resume());

        controller.finish();
        assert_eq!(controller.state(), ScanState::Stopped);

        controller.begin(Path::new("/srv")).unwrap();
        assert_eq!(controller.state(), ScanState::Running);
        assert!(!controller.is_stopped());
    }

    #[test]
    fn test_counters() {
        let controller = ScanController::new();
        controller.begin(Path::new("/srv")).unwrap();
        controller.set_total(3);
        controller.enqueued();
        controller.enqueued();
        controller.dequeued(true);
        controller.dequeued(false);

        let progress = controller.progress();
        assert_eq!(progress.indexed, 1);
        assert_eq!(progress.pending, 0);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.state.to_string(), "running");
    }

    #[test]
    fn test_subscribers_see_state_changes() {
        let controller = ScanController::new();
        let mut rx = controller.subscribe();
        controller.begin(Path::new("/srv")).unwrap();
        controller.stop();

        assert_eq!(rx.try_recv().unwrap().state, ScanState::Running);
        assert_eq!(rx.try_recv().unwrap().state, ScanState::Stopped);
    }

    /// A cleanup job that runs until its token is cancelled.
    fn pending_cleanup(
        observed: Arc<AtomicBool>,
    ) -> (CancellationToken, JoinHandle<Result<CleanupReport, ScanError>>) {
        let token = CancellationToken::new();
        let job_token = token.clone();
        let handle = tokio::spawn(async move {
            job_token.cancelled().await;
            observed.store(true, Ordering::SeqCst);
            Err(ScanError::Cancelled)
        });
        (token, handle)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_cancels_running_cleanup() {
        let controller = ScanController::new();
        let observed = Arc::new(AtomicBool::new(false));
        let (token, handle) = pending_cleanup(Arc::clone(&observed));
        controller.set_cleanup(token, handle);

        controller.stop();
        let result = controller.wait_for_cleanup().await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_next_scan_cancels_previous_cleanup() {
        let controller = ScanController::new();
        let observed = Arc::new(AtomicBool::new(false));
        let (token, handle) = pending_cleanup(Arc::clone(&observed));
        controller.set_cleanup(token, handle);

        controller.cancel_cleanup().await;
        assert!(observed.load(Ordering::SeqCst));
        assert!(controller.wait_for_cleanup().await.is_none());
        assert!(controller.begin(Path::new("/srv")).is_ok());
    }
}
