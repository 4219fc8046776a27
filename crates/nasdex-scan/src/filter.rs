//! Walk eligibility rules.
//!
//! Directories are pruned during `read_dir` so excluded subtrees are never
//! descended into; files are checked again as they are yielded.

use globset::GlobSet;
use nasdex_core::LibraryConfig;
use nasdex_core::path::{is_ancestor_of, is_under, normalize_path};

use crate::error::ScanError;

/// Metadata files written next to media by NAS and desktop software.
const SIDECAR_FILES: &[&str] = &["Thumbs.db", "ehthumbs.db", "desktop.ini"];

/// Sidecar extensions (without the dot).
const SIDECAR_EXTENSIONS: &[&str] = &["xmp", "nfo", "thm"];

/// Suffixes Synology appends to extended-attribute stream files.
const SIDECAR_SUFFIXES: &[&str] = &["@SynoEAStream", "@SynoResource"];

/// Decides which directories to descend into and which files to index.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    system: GlobSet,
    sources: Vec<String>,
    trash_dir: Option<String>,
}

impl ScanFilter {
    pub fn new(system: GlobSet, sources: Vec<String>, trash_dir: Option<String>) -> Self {
        Self {
            system,
            sources,
            trash_dir,
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Result<Self, ScanError> {
        Ok(Self::new(
            config.system_matcher()?,
            config.source_prefixes(),
            config.trash_dir.as_ref().map(normalize_path),
        ))
    }

    /// Whether the walk should enter the directory at `path`.
    pub fn should_descend(&self, path: &str, name: &str) -> bool {
        !is_hidden(name)
            && !self.is_system(path, name)
            && !self.in_trash(path)
            && self.reaches_source(path)
    }

    /// Whether the file at `path` should be indexed.
    pub fn should_index(&self, path: &str, name: &str) -> bool {
        !is_hidden(name)
            && !is_sidecar(name)
            && !self.is_system(path, name)
            && !self.in_trash(path)
            && self.in_source(path)
    }

    fn is_system(&self, path: &str, name: &str) -> bool {
        self.system.is_match(name) || self.system.is_match(path)
    }

    fn in_trash(&self, path: &str) -> bool {
        self.trash_dir
            .as_deref()
            .is_some_and(|trash| is_under(path, trash))
    }

    /// Inside an allowed prefix.
    fn in_source(&self, path: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|source| is_under(path, source))
    }

    /// Inside an allowed prefix, or on the way to one.
    fn reaches_source(&self, path: &str) -> bool {
        self.in_source(path)
            || self
                .sources
                .iter()
                .any(|source| is_ancestor_of(path, source))
    }
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Metadata sidecars that sit next to media files but are not media.
pub fn is_sidecar(name: &str) -> bool {
    if name.starts_with("._") || SIDECAR_FILES.iter().any(|f| f.eq_ignore_ascii_case(name)) {
        return true;
    }
    if SIDECAR_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return true;
    }
    name.rsplit_once('.').is_some_and(|(_, ext)| {
        SIDECAR_EXTENSIONS
            .iter()
            .any(|sidecar| sidecar.eq_ignore_ascii_case(ext))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use globset::{Glob, GlobSetBuilder};

    fn system() -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in ["@eaDir", "#recycle", "lost+found"] {
            builder.add(Glob::new(pattern).unwrap());
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_hidden_and_system_dirs() {
        let filter = ScanFilter::new(system(), Vec::new(), None);
        assert!(filter.should_descend("/srv/media/Movies", "Movies"));
        assert!(!filter.should_descend("/srv/media/.cache", ".cache"));
        assert!(!filter.should_descend("/srv/media/@eaDir", "@eaDir"));
        assert!(!filter.should_descend("/srv/media/#recycle", "#recycle"));
    }

    #[test]
    fn test_sidecars() {
        assert!(is_sidecar("Thumbs.db"));
        assert!(is_sidecar("movie.NFO"));
        assert!(is_sidecar("IMG_0001.xmp"));
        assert!(is_sidecar("._IMG_0001.JPG"));
        assert!(is_sidecar("song.mp3@SynoEAStream"));
        assert!(!is_sidecar("IMG_0001.JPG"));
        assert!(!is_sidecar("nfo"));
    }

    #[test]
    fn test_trash_tree_excluded() {
        let filter = ScanFilter::new(system(), Vec::new(), Some("/srv/media/.trash".into()));
        assert!(!filter.should_index("/srv/media/.trash/a.mp4", "a.mp4"));
        assert!(filter.should_index("/srv/media/trash.mp4", "trash.mp4"));
    }

    #[test]
    fn test_allow_list() {
        let filter = ScanFilter::new(
            system(),
            vec!["/srv/media/Movies".into(), "/srv/music".into()],
            None,
        );
        // Ancestors of an allowed prefix are descended into.
        assert!(filter.should_descend("/srv/media", "media"));
        assert!(filter.should_descend("/srv/media/Movies/2020", "2020"));
        assert!(!filter.should_descend("/srv/media/Photos", "Photos"));
        assert!(!filter.should_descend("/srv/musicals", "musicals"));

        // Files beside an allowed prefix are not indexed.
        assert!(!filter.should_index("/srv/media/readme.mp4", "readme.mp4"));
        assert!(filter.should_index("/srv/media/Movies/heat.mkv", "heat.mkv"));
    }
}
