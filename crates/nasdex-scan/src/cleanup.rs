//! Post-scan cleanup of records for files that are gone.

use std::path::Path;
use std::sync::Arc;

use nasdex_store::MediaStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ScanError;
use crate::seen::SeenSet;

/// Which records a cleanup pass considers.
#[derive(Debug, Clone)]
pub enum CleanupScope {
    /// The whole library was walked: drop records whose file no longer exists.
    FullRoot,
    /// One directory was walked: drop records under `prefix` whose identity
    /// was not seen. Trashed records are exempt.
    Under { prefix: String, seen: Arc<SeenSet> },
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub tags_pruned: usize,
}

/// Run one cleanup pass, then prune orphaned tags if a reset asked for it.
///
/// Checks `cancel` before every key and returns [`ScanError::Cancelled`]
/// once it fires.
pub fn run_cleanup(
    store: &MediaStore,
    scope: &CleanupScope,
    cancel: &CancellationToken,
) -> Result<CleanupReport, ScanError> {
    let mut report = CleanupReport::default();

    match scope {
        CleanupScope::FullRoot => {
            for record in store.records() {
                if cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                let record = record?;
                if !Path::new(&record.path).exists() {
                    debug!(path = %record.path, "removing record for missing file");
                    if store.delete(&record.id)? {
                        report.removed += 1;
                    }
                }
            }
        }
        CleanupScope::Under { prefix, seen } => {
            for id in store.ids_under(prefix) {
                if cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                let id = id?;
                let Some(record) = store.get_by_id(&id)? else {
                    continue;
                };
                if record.is_trash || seen.contains(&record.identity()) {
                    continue;
                }
                debug!(path = %record.path, "removing record not seen by scan");
                if store.delete(&id)? {
                    report.removed += 1;
                }
            }
        }
    }

    if store.prune_tags_pending()? {
        report.tags_pruned = store.prune_orphan_tags(cancel).map_err(|err| {
            if err.is_cancelled() {
                ScanError::Cancelled
            } else {
                err.into()
            }
        })?;
    }

    info!(
        removed = report.removed,
        tags_pruned = report.tags_pruned,
        "cleanup finished"
    );
    Ok(report)
}
