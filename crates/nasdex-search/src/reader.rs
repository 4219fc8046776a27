//! Read-only, memory-mapped views over index artifacts.

use std::collections::HashMap;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::builder::OFFSET_ENTRY_LEN;
use crate::codec::decode_postings;
use crate::error::IndexError;
use crate::manifest::{ArtifactSet, Field, Manifest, TermKind};

/// Mapped file contents. Zero-length files cannot be mapped on every
/// platform, so they are represented without a mapping.
enum Buffer {
    Mapped(Mmap),
    Empty,
}

impl Buffer {
    fn open(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
        let len = file.metadata().map_err(|e| IndexError::io(path, e))?.len();
        if len == 0 {
            return Ok(Self::Empty);
        }
        // SAFETY: artifacts are never written in place. A rebuild persists
        // fresh files over these names, which leaves this mapping's inode intact.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| IndexError::io(path, e))?;
        Ok(Self::Mapped(map))
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => &map[..],
            Self::Empty => &[],
        }
    }
}

/// One (field, kind) postings set: dictionary plus mapped data and offsets.
pub struct PostingsView {
    set: ArtifactSet,
    dict: HashMap<String, u32>,
    postings: Buffer,
    offsets: Buffer,
}

impl PostingsView {
    pub fn open(dir: &Path, set: ArtifactSet) -> Result<Self, IndexError> {
        let dict_path = set.dict_path(dir);
        let raw = std::fs::read(&dict_path).map_err(|e| IndexError::io(&dict_path, e))?;
        let dict: HashMap<String, u32> = serde_json::from_slice(&raw)?;

        let postings = Buffer::open(&set.postings_path(dir))?;
        let offsets = Buffer::open(&set.offsets_path(dir))?;

        if offsets.len() % OFFSET_ENTRY_LEN != 0 || offsets.len() / OFFSET_ENTRY_LEN != dict.len() {
            return Err(IndexError::corrupt(
                set.stem(),
                format!(
                    "{} offset bytes for {} dictionary terms",
                    offsets.len(),
                    dict.len()
                ),
            ));
        }

        Ok(Self {
            set,
            dict,
            postings,
            offsets,
        })
    }

    pub fn set(&self) -> ArtifactSet {
        self.set
    }

    pub fn term_count(&self) -> usize {
        self.dict.len()
    }

    pub fn term_id(&self, term: &str) -> Option<u32> {
        self.dict.get(term).copied()
    }

    /// Byte range of a term's postings, read from its fixed-size offsets entry.
    fn entry(&self, term_id: u32) -> Result<(usize, usize), IndexError> {
        let index = (term_id as usize)
            .checked_sub(1)
            .ok_or_else(|| IndexError::corrupt(self.set.stem(), "term id 0"))?;
        let start = index * OFFSET_ENTRY_LEN;
        let raw = self
            .offsets
            .get(start..start + OFFSET_ENTRY_LEN)
            .ok_or_else(|| {
                IndexError::corrupt(self.set.stem(), format!("term id {term_id} out of range"))
            })?;

        let mut offset = [0u8; 8];
        offset.copy_from_slice(&raw[..8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&raw[8..]);
        let offset = usize::try_from(u64::from_le_bytes(offset))
            .map_err(|_| IndexError::corrupt(self.set.stem(), "offset overflow"))?;
        Ok((offset, u32::from_le_bytes(len) as usize))
    }

    /// Ascending document ids for `term`, at most `cap` of them.
    ///
    /// Unknown terms yield an empty list.
    pub fn postings(&self, term: &str, cap: Option<usize>) -> Result<Vec<u64>, IndexError> {
        let Some(term_id) = self.term_id(term) else {
            return Ok(Vec::new());
        };
        let (offset, len) = self.entry(term_id)?;
        let bytes = offset
            .checked_add(len)
            .and_then(|end| self.postings.get(offset..end))
            .ok_or_else(|| {
                IndexError::corrupt(self.set.stem(), format!("postings for {term:?} out of range"))
            })?;
        decode_postings(bytes, cap).ok_or_else(|| {
            IndexError::corrupt(self.set.stem(), format!("undecodable postings for {term:?}"))
        })
    }
}

/// An open index: the manifest plus all four mapped postings sets.
///
/// Mappings are released when the last reference to the handle is dropped.
pub struct IndexHandle {
    dir: PathBuf,
    manifest: Manifest,
    views: Vec<PostingsView>,
}

impl IndexHandle {
    /// Open the index in `dir`, failing with [`IndexError::Stale`] when no
    /// complete build is present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let dir = dir.into();
        let manifest = Manifest::load(&dir)?;
        Self::from_manifest(dir, manifest)
    }

    /// Open the generation described by an already loaded `manifest`.
    pub fn from_manifest(dir: impl Into<PathBuf>, manifest: Manifest) -> Result<Self, IndexError> {
        let dir = dir.into();
        let artifacts = manifest.artifact_dir(&dir);
        let views = ArtifactSet::ALL
            .iter()
            .map(|set| PostingsView::open(&artifacts, *set))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            dir = %dir.display(),
            generation = %manifest.generation,
            documents = manifest.documents,
            "opened search index"
        );
        Ok(Self {
            dir,
            manifest,
            views,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn view(&self, field: Field, kind: TermKind) -> &PostingsView {
        // Views are opened in `ArtifactSet::ALL` order.
        let slot = match (field, kind) {
            (Field::Name, TermKind::Exact) => 0,
            (Field::Path, TermKind::Exact) => 1,
            (Field::Name, TermKind::Ngram) => 2,
            (Field::Path, TermKind::Ngram) => 3,
        };
        &self.views[slot]
    }

    /// Union of a term's postings across the name and path sets of `kind`.
    pub fn field_union(
        &self,
        term: &str,
        kind: TermKind,
        cap: Option<usize>,
    ) -> Result<Vec<u64>, IndexError> {
        let name = self.view(Field::Name, kind).postings(term, cap)?;
        let path = self.view(Field::Path, kind).postings(term, cap)?;
        Ok(crate::codec::union(&name, &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_raw(dir: &Path, set: ArtifactSet, dict: &str, postings: &[u8], offsets: &[u8]) {
        std::fs::write(set.dict_path(dir), dict).unwrap();
        std::fs::write(set.postings_path(dir), postings).unwrap();
        std::fs::write(set.offsets_path(dir), offsets).unwrap();
    }

    fn entry(offset: u64, len: u32) -> Vec<u8> {
        let mut out = offset.to_le_bytes().to_vec();
        out.extend_from_slice(&len.to_le_bytes());
        out
    }

    #[test]
    fn test_view_reads_postings() {
        let dir = TempDir::new().unwrap();
        let set = ArtifactSet::new(Field::Name, TermKind::Exact);
        let mut offsets = entry(0, 3);
        offsets.extend(entry(3, 2));
        write_raw(
            dir.path(),
            set,
            r#"{"heat":1,"ronin":2}"#,
            &[2, 4, 6, 1, 9],
            &offsets,
        );

        let view = PostingsView::open(dir.path(), set).unwrap();
        assert_eq!(view.term_count(), 2);
        assert_eq!(view.postings("heat", None).unwrap(), vec![4, 10]);
        assert_eq!(view.postings("heat", Some(1)).unwrap(), vec![4]);
        assert_eq!(view.postings("ronin", None).unwrap(), vec![9]);
        assert!(view.postings("missing", None).unwrap().is_empty());
    }

    #[test]
    fn test_view_rejects_bad_offsets() {
        let dir = TempDir::new().unwrap();
        let set = ArtifactSet::new(Field::Path, TermKind::Ngram);

        write_raw(dir.path(), set, r#"{"ab":1}"#, &[1, 1], &[0u8; 5]);
        assert!(matches!(
            PostingsView::open(dir.path(), set),
            Err(IndexError::Corrupt { .. })
        ));

        write_raw(dir.path(), set, r#"{"ab":1}"#, &[1, 1], &entry(1, 40));
        let view = PostingsView::open(dir.path(), set).unwrap();
        assert!(matches!(
            view.postings("ab", None),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_empty_set_opens() {
        let dir = TempDir::new().unwrap();
        let set = ArtifactSet::new(Field::Name, TermKind::Ngram);
        write_raw(dir.path(), set, "{}", &[], &[]);
        let view = PostingsView::open(dir.path(), set).unwrap();
        assert_eq!(view.term_count(), 0);
        assert!(view.postings("zz", None).unwrap().is_empty());
    }
}
