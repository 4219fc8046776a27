//! On-disk inverted index and query engine for nasdex.
//!
//! A rebuild reads every record once and writes four postings sets (exact
//! tokens and fuzzy 2-grams, each over file names and paths) into a fresh
//! `gen-*` directory under the index root. Each set is three files:
//!
//! - `<set>.dict.json`: term to 1-based term id
//! - `<set>.postings.dat`: per term, a uvarint count and uvarint id gaps
//! - `<set>.postings.idx`: per term, a 12-byte little-endian (offset, length)
//!
//! `manifest.json` in the index root names the current generation and is
//! replaced last, which publishes the build. Searches keep the mapped
//! generation open until a newer manifest appears, and fall back to a
//! linear scan of the store whenever the index is missing, stale or finds
//! nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nasdex_search::{SearchEngine, SearchFilters};
//! use nasdex_store::MediaStore;
//!
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MediaStore::open("/var/lib/nasdex/records.redb")?);
//! let engine = SearchEngine::new(store, "/var/lib/nasdex/search-index", 4096);
//! engine.rebuild()?;
//!
//! for record in engine.search("heat 1995", &SearchFilters::default(), 0, 20)? {
//!     println!("{}", record.path);
//! }
//! # Ok(())
//! # }
//! ```

mod builder;
pub mod codec;
mod engine;
mod error;
mod manifest;
mod reader;
pub mod tokenize;

pub use builder::IndexBuilder;
pub use engine::{ID_LIST_PREFIX, SearchEngine, SearchFilters};
pub use error::{IndexError, SearchError};
pub use manifest::{
    ArtifactSet, FORMAT_VERSION, Field, GENERATION_PREFIX, IndexStats, Manifest, TermKind,
};
pub use reader::{IndexHandle, PostingsView};
