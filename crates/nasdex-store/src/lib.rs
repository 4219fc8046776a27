//! Primary record store for nasdex.
//!
//! One ordered key-value table holds, under string-prefixed namespaces:
//!
//! - `rec:{id}` - the serialized [`MediaRecord`](nasdex_core::MediaRecord)
//! - `path:{path}` and `ident:{digest}` - lookups back to the id
//! - `doc:{doc_id}` - postings document id to record id
//! - `type:{media_type}:trash:{0|1}:{kind}:...` - seven composite indexes for
//!   sorted, paginated listing without a full scan
//!
//! Every write removes the keys derived from the previous version of a record
//! before inserting the new ones, so an index never holds a record twice.
//!
//! ```rust,no_run
//! use nasdex_store::{IndexKind, MediaStore};
//! use nasdex_core::MediaType;
//!
//! let store = MediaStore::open("/var/lib/nasdex/records.redb").unwrap();
//! for id in store.iterate_type_index(MediaType::Video, false, IndexKind::ModDesc, &[]).take(20) {
//!     println!("{}", id.unwrap());
//! }
//! ```

mod error;
pub mod keys;
mod metadata;
mod store;

pub use error::StoreError;
pub use keys::IndexKind;
pub use metadata::{MediaMetadata, MetadataProbe, ProbedMetadata};
pub use store::{IdIter, MediaStore, PrefixScan, RecordIter, TypeIndexIter, UpsertOutcome};
