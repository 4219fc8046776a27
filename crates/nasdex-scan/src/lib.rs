//! Concurrent scan pipeline for nasdex.
//!
//! # Overview
//!
//! `nasdex-scan` walks a directory tree and keeps the record store in step
//! with it:
//!
//! - **Parallel traversal** via jwalk, pruning hidden, system and trash
//!   directories before they are read
//! - **Bounded queue** between the walk and a small pool of store writers
//! - **Pause, resume and stop** through a shared [`ScanController`]
//! - **Progress updates** via broadcast channels, at least once per second
//! - **Cancellable cleanup** of records whose files are gone
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nasdex_core::{IdentityResolver, LibraryConfig};
//! use nasdex_scan::{MediaScanner, ScanController};
//! use nasdex_store::MediaStore;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(LibraryConfig::new("/var/lib/nasdex", "/srv/media"));
//! let store = Arc::new(MediaStore::open(config.store_path())?);
//! let controller = Arc::new(ScanController::new());
//! let scanner = Arc::new(MediaScanner::new(
//!     config,
//!     store,
//!     Arc::new(IdentityResolver::default()),
//!     Arc::clone(&controller),
//! )?);
//!
//! let mut progress_rx = controller.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(progress) = progress_rx.recv().await {
//!         println!("{} / {} ({})", progress.indexed, progress.total, progress.state);
//!     }
//! });
//!
//! let summary = scanner.scan("/srv/media").await?;
//! println!("indexed {} files", summary.indexed);
//! # Ok(())
//! # }
//! ```

mod cleanup;
mod controller;
mod error;
mod filter;
mod progress;
mod scanner;
mod seen;

pub use cleanup::{CleanupReport, CleanupScope, run_cleanup};
pub use controller::ScanController;
pub use error::ScanError;
pub use filter::{ScanFilter, is_hidden, is_sidecar};
pub use progress::{ScanProgress, ScanState};
pub use scanner::{MediaScanner, ScanSummary};
pub use seen::SeenSet;
