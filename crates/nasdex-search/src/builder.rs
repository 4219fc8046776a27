//! Full rebuild of the on-disk inverted index.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use nasdex_core::MediaRecord;
use nasdex_store::MediaStore;
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::codec::encode_postings;
use crate::error::IndexError;
use crate::manifest::{
    ArtifactSet, FORMAT_VERSION, Field, GENERATION_PREFIX, IndexStats, MANIFEST_FILE, Manifest,
    TermKind,
};
use crate::tokenize::{exact_terms, fuzzy_terms};

/// Bytes per offsets-file entry: u64 offset + u32 length.
pub const OFFSET_ENTRY_LEN: usize = 12;

type TermMap = BTreeMap<String, Vec<u64>>;

/// Rebuilds the four postings sets under one directory.
///
/// Clones share a lock, so rebuilds through the same builder never overlap.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl IndexBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every record in `store` and replace the index wholesale.
    ///
    /// Artifacts go into a new generation directory. Replacing the manifest
    /// publishes it, so readers see either the previous build or this one,
    /// never a mix. Older generations are removed afterwards.
    pub fn rebuild(&self, store: &MediaStore) -> Result<IndexStats, IndexError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();
        fs::create_dir_all(&self.dir).map_err(|e| IndexError::io(&self.dir, e))?;

        let mut sets: Vec<(ArtifactSet, TermMap)> = ArtifactSet::ALL
            .iter()
            .map(|set| (*set, TermMap::new()))
            .collect();

        let mut documents = 0u64;
        for record in store.records() {
            let record = record?;
            add_record(&mut sets, &record);
            documents += 1;
        }
        debug!(documents, "collected index terms");

        sets.par_iter_mut().for_each(|(_, terms)| {
            for docs in terms.values_mut() {
                docs.sort_unstable();
                docs.dedup();
            }
        });

        // Removed on drop unless the manifest below is written.
        let staging = tempfile::Builder::new()
            .prefix(GENERATION_PREFIX)
            .tempdir_in(&self.dir)
            .map_err(|e| IndexError::io(&self.dir, e))?;
        let generation = staging
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| IndexError::corrupt(MANIFEST_FILE, "unnamed generation directory"))?;

        let terms = sets
            .par_iter()
            .map(|(set, terms)| write_set(staging.path(), *set, terms).map(|n| (set.stem(), n)))
            .collect::<Result<BTreeMap<_, _>, IndexError>>()?;

        let manifest = Manifest {
            version: FORMAT_VERSION,
            documents,
            built_at: Utc::now(),
            generation,
            artifacts: terms.clone(),
        };
        write_atomic(
            &Manifest::path(&self.dir),
            &serde_json::to_vec_pretty(&manifest)?,
        )?;
        let _ = staging.keep();
        self.prune_generations(&manifest.generation);

        let stats = IndexStats {
            documents,
            terms,
            elapsed: started.elapsed(),
        };
        info!(
            documents,
            terms = stats.total_terms(),
            elapsed_ms = stats.elapsed.as_millis() as u64,
            generation = %manifest.generation,
            dir = %self.dir.display(),
            "search index rebuilt"
        );
        Ok(stats)
    }

    /// Remove every generation directory except `current`.
    ///
    /// Open mappings of removed files stay readable until they are dropped.
    fn prune_generations(&self, current: &str) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "cannot list index generations");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(GENERATION_PREFIX) || name == current {
                continue;
            }
            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => debug!(path = %path.display(), "removed old index generation"),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot remove old index generation")
                }
            }
        }
    }
}

fn add_record(sets: &mut [(ArtifactSet, TermMap)], record: &MediaRecord) {
    let doc = record.document_id().0;
    for (set, terms) in sets.iter_mut() {
        let text = match set.field {
            Field::Name => record.name.as_str(),
            Field::Path => record.path.as_str(),
        };
        let extracted = match set.kind {
            TermKind::Exact => exact_terms(text),
            TermKind::Ngram => fuzzy_terms(text),
        };
        for term in extracted {
            terms.entry(term).or_default().push(doc);
        }
    }
}

/// Write one dictionary/postings/offsets triple; returns its term count.
fn write_set(dir: &Path, set: ArtifactSet, terms: &TermMap) -> Result<usize, IndexError> {
    let stem = set.stem();
    let postings_path = set.postings_path(dir);
    let offsets_path = set.offsets_path(dir);

    let mut postings = BufWriter::new(temp_in(dir)?);
    let mut offsets = BufWriter::new(temp_in(dir)?);
    let mut dict: BTreeMap<&str, u32> = BTreeMap::new();
    let mut position = 0u64;

    for (index, (term, docs)) in terms.iter().enumerate() {
        let term_id = u32::try_from(index + 1)
            .map_err(|_| IndexError::corrupt(&stem, "term count exceeds u32"))?;
        let encoded = encode_postings(docs);
        let len = u32::try_from(encoded.len())
            .map_err(|_| IndexError::corrupt(&stem, format!("postings for {term:?} exceed u32")))?;

        postings
            .write_all(&encoded)
            .map_err(|e| IndexError::io(&postings_path, e))?;
        let mut entry = [0u8; OFFSET_ENTRY_LEN];
        entry[..8].copy_from_slice(&position.to_le_bytes());
        entry[8..].copy_from_slice(&len.to_le_bytes());
        offsets
            .write_all(&entry)
            .map_err(|e| IndexError::io(&offsets_path, e))?;

        position += u64::from(len);
        dict.insert(term, term_id);
    }

    persist(postings, &postings_path)?;
    persist(offsets, &offsets_path)?;
    write_atomic(&set.dict_path(dir), &serde_json::to_vec(&dict)?)?;

    debug!(artifact = %stem, terms = terms.len(), bytes = position, "wrote postings set");
    Ok(terms.len())
}

fn temp_in(dir: &Path) -> Result<NamedTempFile, IndexError> {
    NamedTempFile::new_in(dir).map_err(|e| IndexError::io(dir, e))
}

fn persist(writer: BufWriter<NamedTempFile>, path: &Path) -> Result<(), IndexError> {
    let file = writer
        .into_inner()
        .map_err(|e| IndexError::io(path, e.into_error()))?;
    file.as_file()
        .sync_all()
        .map_err(|e| IndexError::io(path, e))?;
    file.persist(path).map_err(|e| IndexError::io(path, e.error))?;
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut writer = BufWriter::new(temp_in(dir)?);
    writer.write_all(bytes).map_err(|e| IndexError::io(path, e))?;
    persist(writer, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nasdex_core::IdentityKey;
    use tempfile::TempDir;

    #[test]
    fn test_add_record_splits_fields() {
        let mut sets: Vec<(ArtifactSet, TermMap)> = ArtifactSet::ALL
            .iter()
            .map(|set| (*set, TermMap::new()))
            .collect();
        let identity = IdentityKey::new("uuid:test", 1, 0);
        let record = MediaRecord::new("a", &identity, "/srv/Movies/Heat.mkv", 1, 0);
        add_record(&mut sets, &record);

        let name_exact = &sets[0].1;
        assert!(name_exact.contains_key("heat"));
        assert!(!name_exact.contains_key("movies"));
        let path_exact = &sets[1].1;
        assert!(path_exact.contains_key("movies"));
        let name_ngram = &sets[2].1;
        assert!(name_ngram.contains_key("ea"));
        assert_eq!(name_ngram["he"], vec![record.document_id().0]);
    }

    #[test]
    fn test_write_set_layout() {
        let dir = TempDir::new().unwrap();
        let set = ArtifactSet::new(Field::Name, TermKind::Exact);
        let mut terms = TermMap::new();
        terms.insert("alpha".into(), vec![1, 5]);
        terms.insert("beta".into(), vec![300]);

        assert_eq!(write_set(dir.path(), set, &terms).unwrap(), 2);

        let offsets = fs::read(set.offsets_path(dir.path())).unwrap();
        assert_eq!(offsets.len(), 2 * OFFSET_ENTRY_LEN);
        // beta is term id 2: offset 3 (after [2, 1, 4]), length 3 ([1, 0xAC, 0x02])
        assert_eq!(u64::from_le_bytes(offsets[12..20].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(offsets[20..24].try_into().unwrap()), 3);

        let postings = fs::read(set.postings_path(dir.path())).unwrap();
        assert_eq!(postings, vec![2, 1, 4, 1, 0xAC, 0x02]);

        let dict: BTreeMap<String, u32> =
            serde_json::from_slice(&fs::read(set.dict_path(dir.path())).unwrap()).unwrap();
        assert_eq!(dict["alpha"], 1);
        assert_eq!(dict["beta"], 2);
    }

    fn generations(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.starts_with(GENERATION_PREFIX))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_rebuild_swaps_generations() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path().join("records.redb")).unwrap();
        let identity = IdentityKey::new("uuid:test", 1, 0);
        let heat = MediaRecord::new("a", &identity, "/srv/Movies/Heat.mkv", 1, 0);
        store.upsert(&heat).unwrap();

        let builder = IndexBuilder::new(temp.path().join("index"));
        builder.rebuild(&store).unwrap();
        let first = Manifest::load(builder.dir()).unwrap();
        assert_eq!(generations(builder.dir()), vec![first.generation.clone()]);

        // A reader holding the first build keeps working across the swap.
        let held = crate::reader::IndexHandle::open(builder.dir()).unwrap();

        let identity = IdentityKey::new("uuid:test", 2, 0);
        let ronin = MediaRecord::new("b", &identity, "/srv/Movies/Ronin.mkv", 1, 0);
        store.upsert(&ronin).unwrap();
        builder.rebuild(&store).unwrap();

        let second = Manifest::load(builder.dir()).unwrap();
        assert_ne!(first.generation, second.generation);
        assert_eq!(second.documents, 2);
        assert_eq!(generations(builder.dir()), vec![second.generation.clone()]);

        assert_eq!(
            held.field_union("heat", TermKind::Exact, None).unwrap(),
            vec![heat.document_id().0]
        );
        assert!(held.field_union("ronin", TermKind::Exact, None).unwrap().is_empty());
    }
}
