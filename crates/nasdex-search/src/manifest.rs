//! Artifact naming and the build manifest.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::IndexError;

/// Bumped whenever the artifact layout changes.
pub const FORMAT_VERSION: u32 = 2;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Name prefix of the per-build artifact directories.
pub const GENERATION_PREFIX: &str = "gen-";

/// Which record field a postings set covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Field {
    Name,
    Path,
}

/// Whole tokens or fuzzy 2-grams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TermKind {
    Exact,
    Ngram,
}

/// One of the four (field, kind) artifact sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactSet {
    pub field: Field,
    pub kind: TermKind,
}

impl ArtifactSet {
    pub const ALL: [ArtifactSet; 4] = [
        ArtifactSet::new(Field::Name, TermKind::Exact),
        ArtifactSet::new(Field::Path, TermKind::Exact),
        ArtifactSet::new(Field::Name, TermKind::Ngram),
        ArtifactSet::new(Field::Path, TermKind::Ngram),
    ];

    pub const fn new(field: Field, kind: TermKind) -> Self {
        Self { field, kind }
    }

    /// File stem shared by the set's three files, e.g. `name_exact`.
    pub fn stem(&self) -> String {
        format!("{}_{}", self.field, self.kind)
    }

    pub fn dict_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.dict.json", self.stem()))
    }

    pub fn postings_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.postings.dat", self.stem()))
    }

    pub fn offsets_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.postings.idx", self.stem()))
    }
}

/// Written last by a rebuild; its presence marks the artifacts complete.
///
/// Each build writes its artifacts into a fresh generation directory and
/// the manifest names it, so replacing the manifest swaps every set at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub documents: u64,
    pub built_at: DateTime<Utc>,
    /// Directory under the index root holding this build's artifacts.
    pub generation: String,
    /// Term count per artifact stem.
    pub artifacts: BTreeMap<String, usize>,
}

impl Manifest {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Load and check the manifest, treating absence or a version
    /// mismatch as a stale index.
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let path = Self::path(dir);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::Stale { path });
            }
            Err(err) => return Err(IndexError::io(path, err)),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)?;
        if manifest.version != FORMAT_VERSION {
            return Err(IndexError::Stale { path });
        }
        let mut components = Path::new(&manifest.generation).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(IndexError::corrupt(
                MANIFEST_FILE,
                format!("invalid generation {:?}", manifest.generation),
            ));
        }
        Ok(manifest)
    }

    /// Directory holding the artifacts this manifest describes.
    pub fn artifact_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.generation)
    }
}

/// Summary of one rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub documents: u64,
    pub terms: BTreeMap<String, usize>,
    pub elapsed: Duration,
}

impl IndexStats {
    pub fn total_terms(&self) -> usize {
        self.terms.values().sum()
    }
}
