//! Best-effort media metadata cached on records.
//!
//! Duration, artist and title are expensive to extract, so they are stored
//! with the `(modified_at, size)` they were computed from and re-probed only
//! once that stamp no longer matches the file.

use std::path::Path;

use nasdex_core::{CachedValue, MediaRecord, modified_seconds};
use tracing::debug;

use crate::error::StoreError;
use crate::store::MediaStore;

/// Values extracted by a metadata probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbedMetadata {
    pub duration_seconds: Option<f64>,
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Extracts media metadata from a file (ffprobe, tag readers, ...).
pub trait MetadataProbe: Send + Sync {
    fn probe(&self, path: &Path) -> std::io::Result<ProbedMetadata>;
}

/// Metadata as seen by callers; absent fields were not found in the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub duration_seconds: Option<f64>,
    pub artist: Option<String>,
    pub title: Option<String>,
}

impl MediaMetadata {
    fn from_fresh(record: &MediaRecord, modified_at: i64, size: u64) -> Option<Self> {
        let duration = *record.duration_seconds.as_ref()?.fresh(modified_at, size)?;
        let artist = record.artist.as_ref()?.fresh(modified_at, size)?;
        let title = record.title.as_ref()?.fresh(modified_at, size)?;
        Some(Self {
            duration_seconds: (duration > 0.0).then_some(duration),
            artist: non_empty(artist),
            title: non_empty(title),
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl MediaStore {
    /// Cached metadata for `id`, re-probed and written back when stale.
    ///
    /// The stamp is checked against the file's current stat, falling back to
    /// the stored `modified_at`/`size` when the file cannot be stat'ed.
    pub fn get_or_refresh_metadata(
        &self,
        id: &str,
        probe: &dyn MetadataProbe,
    ) -> Result<Option<MediaMetadata>, StoreError> {
        let Some(mut record) = self.get_by_id(id)? else {
            return Ok(None);
        };

        let (modified_at, size) = match std::fs::metadata(&record.path) {
            Ok(metadata) => (modified_seconds(&metadata), metadata.len()),
            Err(_) => (record.modified_at, record.size),
        };

        if let Some(cached) = MediaMetadata::from_fresh(&record, modified_at, size) {
            return Ok(Some(cached));
        }

        debug!(id, path = %record.path, "refreshing stale media metadata");
        let probed = probe
            .probe(Path::new(&record.path))
            .map_err(|source| StoreError::Probe {
                path: record.path.clone().into(),
                source,
            })?;

        record.modified_at = modified_at;
        record.size = size;
        record.duration_seconds = Some(CachedValue::new(
            probed.duration_seconds.unwrap_or(0.0),
            modified_at,
            size,
        ));
        record.artist = Some(CachedValue::new(
            probed.artist.clone().unwrap_or_default(),
            modified_at,
            size,
        ));
        record.title = Some(CachedValue::new(
            probed.title.clone().unwrap_or_default(),
            modified_at,
            size,
        ));
        self.upsert(&record)?;

        Ok(Some(MediaMetadata {
            duration_seconds: probed.duration_seconds,
            artist: probed.artist,
            title: probed.title,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nasdex_core::IdentityKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingProbe {
        calls: AtomicUsize,
    }

    impl MetadataProbe for CountingProbe {
        fn probe(&self, _path: &Path) -> std::io::Result<ProbedMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProbedMetadata {
                duration_seconds: Some(215.0),
                artist: Some("Massive Attack".to_string()),
                title: None,
            })
        }
    }

    #[test]
    fn test_probe_once_then_cached() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path().join("db.redb")).unwrap();
        let file = temp.path().join("teardrop.flac");
        std::fs::write(&file, b"fLaC").unwrap();
        let metadata = std::fs::metadata(&file).unwrap();

        let identity = IdentityKey::new("fs", 7, 0);
        let record = MediaRecord::new(
            "rec-1",
            &identity,
            file.to_string_lossy(),
            metadata.len(),
            modified_seconds(&metadata),
        );
        store.upsert(&record).unwrap();

        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
        };
        let first = store.get_or_refresh_metadata("rec-1", &probe).unwrap().unwrap();
        assert_eq!(first.duration_seconds, Some(215.0));
        assert_eq!(first.artist.as_deref(), Some("Massive Attack"));
        assert_eq!(first.title, None);

        let second = store.get_or_refresh_metadata("rec-1", &probe).unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        std::fs::write(&file, b"fLaC plus more bytes").unwrap();
        store.get_or_refresh_metadata("rec-1", &probe).unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_id() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path().join("db.redb")).unwrap();
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
        };
        assert!(store.get_or_refresh_metadata("missing", &probe).unwrap().is_none());
    }
}
