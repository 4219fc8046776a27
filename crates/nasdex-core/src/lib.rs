//! Core types and identity resolution for nasdex.
//!
//! This crate provides the data model shared by the store, scanner and search
//! engine: media records, the identity triplet that keeps record ids stable
//! across renames, path normalization and library configuration.

mod config;
mod error;
pub mod identity;
pub mod path;
mod record;

pub use config::{LibraryConfig, LibraryConfigBuilder};
pub use error::{ConfigError, IdentityError};
pub use identity::{IdentityResolver, MountEntry, MountSource, derive_id, modified_seconds};
pub use record::{CachedValue, DocumentId, Freshness, IdentityKey, MediaRecord, MediaType};
