//! Library configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::path::normalize_path;

/// Configuration shared by the store, scanner and search engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct LibraryConfig {
    /// Directory holding the record store and the search index.
    pub data_dir: PathBuf,

    /// Root of the media library; scanning it is a full-root scan.
    pub library_root: PathBuf,

    /// Allow-list of source directories (empty = index everything).
    #[builder(default)]
    #[serde(default)]
    pub source_dirs: Vec<PathBuf>,

    /// Glob patterns for system directories and files that are never indexed.
    #[builder(default = "default_system_paths()")]
    #[serde(default = "default_system_paths")]
    pub system_paths: Vec<String>,

    /// Trash directory owned by the trash collaborator; never walked.
    #[builder(default)]
    #[serde(default)]
    pub trash_dir: Option<PathBuf>,

    /// Number of upsert workers in the scan pipeline.
    #[builder(default = "2")]
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Depth of the bounded queue between the walk and the workers.
    #[builder(default = "64")]
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// The walk sleeps briefly after this many files.
    #[builder(default = "500")]
    #[serde(default = "default_yield_every")]
    pub yield_every: u64,

    /// Count eligible files before walking for an accurate progress total.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub precount: bool,

    /// Number of threads for the directory walk (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Maximum postings read per fuzzy n-gram term.
    #[builder(default = "4096")]
    #[serde(default = "default_fuzzy_postings_cap")]
    pub fuzzy_postings_cap: usize,

    /// Lifetime of the cached mount table, in seconds.
    #[builder(default = "30")]
    #[serde(default = "default_mount_cache_ttl")]
    pub mount_cache_ttl: u64,
}

fn default_true() -> bool {
    true
}

fn default_worker_count() -> usize {
    2
}

fn default_queue_depth() -> usize {
    64
}

fn default_yield_every() -> u64 {
    500
}

fn default_fuzzy_postings_cap() -> usize {
    4096
}

fn default_mount_cache_ttl() -> u64 {
    30
}

fn default_system_paths() -> Vec<String> {
    [
        "@eaDir",
        "#recycle",
        "#snapshot",
        "lost+found",
        "System Volume Information",
        "$RECYCLE.BIN",
        "@Recycle",
        ".@__thumb",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl LibraryConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.data_dir {
            Some(ref dir) if dir.as_os_str().is_empty() => {
                return Err("Data directory cannot be empty".to_string());
            }
            None => return Err("Data directory is required".to_string()),
            _ => {}
        }
        if self.library_root.is_none() {
            return Err("Library root is required".to_string());
        }
        if self.worker_count == Some(0) {
            return Err("At least one worker is required".to_string());
        }
        if self.queue_depth == Some(0) {
            return Err("Queue depth must be positive".to_string());
        }
        Ok(())
    }
}

impl LibraryConfig {
    /// Create a new config builder.
    pub fn builder() -> LibraryConfigBuilder {
        LibraryConfigBuilder::default()
    }

    /// Create a config with defaults for the given directories.
    pub fn new(data_dir: impl Into<PathBuf>, library_root: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            library_root: library_root.into(),
            source_dirs: Vec::new(),
            system_paths: default_system_paths(),
            trash_dir: None,
            worker_count: default_worker_count(),
            queue_depth: default_queue_depth(),
            yield_every: default_yield_every(),
            precount: true,
            threads: 0,
            fuzzy_postings_cap: default_fuzzy_postings_cap(),
            mount_cache_ttl: default_mount_cache_ttl(),
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.check()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents, path)
    }

    /// Default config file location (`<config dir>/nasdex/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nasdex").join("config.toml"))
    }

    /// Default data directory (`<data dir>/nasdex`).
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nasdex")
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 || self.queue_depth == 0 {
            return Err(ConfigError::Invalid {
                message: "worker_count and queue_depth must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Path of the record store file.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("records.redb")
    }

    /// Directory of the on-disk search index.
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("search-index")
    }

    pub fn mount_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.mount_cache_ttl)
    }

    /// Normalized allow-list prefixes.
    pub fn source_prefixes(&self) -> Vec<String> {
        self.source_dirs.iter().map(normalize_path).collect()
    }

    /// Compile the system path patterns.
    pub fn system_matcher(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.system_paths {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|source| ConfigError::Pattern {
            pattern: self.system_paths.join(","),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LibraryConfig::builder()
            .data_dir("/var/lib/nasdex")
            .library_root("/srv/media")
            .worker_count(4usize)
            .precount(false)
            .build()
            .unwrap();

        assert_eq!(config.library_root, PathBuf::from("/srv/media"));
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue_depth, 64);
        assert!(!config.precount);
        assert!(config.system_paths.iter().any(|p| p == "@eaDir"));
    }

    #[test]
    fn test_builder_requires_dirs() {
        assert!(LibraryConfig::builder().library_root("/srv").build().is_err());
        assert!(
            LibraryConfig::builder()
                .data_dir("/d")
                .library_root("/srv")
                .worker_count(0usize)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            data_dir = "/var/lib/nasdex"
            library_root = "/srv/media"
            source_dirs = ["/srv/media/Movies/"]
            queue_depth = 16
        "#;
        let config = LibraryConfig::from_toml_str(toml, Path::new("inline.toml")).unwrap();
        assert_eq!(config.queue_depth, 16);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.source_prefixes(), vec!["/srv/media/Movies".to_string()]);
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/nasdex/records.redb"));
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        let toml = r#"
            data_dir = "/d"
            library_root = "/srv"
            worker_count = 0
        "#;
        assert!(matches!(
            LibraryConfig::from_toml_str(toml, Path::new("inline.toml")),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_system_matcher() {
        let config = LibraryConfig::new("/d", "/srv");
        let matcher = config.system_matcher().unwrap();
        assert!(matcher.is_match("@eaDir"));
        assert!(matcher.is_match("#recycle"));
        assert!(!matcher.is_match("Movies"));
    }
}
