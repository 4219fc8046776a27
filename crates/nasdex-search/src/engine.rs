//! Query evaluation over the mapped index, with a store-scan fallback.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use nasdex_core::path::{is_under, normalize_str};
use nasdex_core::{DocumentId, LibraryConfig, MediaRecord, MediaType};
use nasdex_store::MediaStore;
use tracing::debug;

use crate::builder::IndexBuilder;
use crate::codec::{difference, intersect_all, union_at_least};
use crate::error::{IndexError, SearchError};
use crate::manifest::{IndexStats, Manifest, TermKind};
use crate::reader::IndexHandle;
use crate::tokenize::{ngrams, tokens};

/// Query prefix that selects records by id instead of by text.
pub const ID_LIST_PREFIX: &str = "ids:";

/// Restrictions applied to every candidate before pagination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub media_type: Option<MediaType>,
    /// `Some(false)` excludes trashed records, `Some(true)` keeps only them.
    pub trash: Option<bool>,
    /// Keep records under any of these slash-normalized directories
    /// (all when empty).
    pub path_prefixes: Vec<String>,
}

impl SearchFilters {
    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }

    pub fn trash(mut self, trash: bool) -> Self {
        self.trash = Some(trash);
        self
    }

    pub fn under(mut self, prefix: &str) -> Self {
        self.path_prefixes.push(normalize_str(prefix));
        self
    }

    pub fn matches(&self, record: &MediaRecord) -> bool {
        if self.media_type.is_some_and(|mt| mt != record.media_type) {
            return false;
        }
        if self.trash.is_some_and(|trash| trash != record.is_trash) {
            return false;
        }
        self.path_prefixes.is_empty()
            || self.path_prefixes.iter().any(|prefix| {
                is_under(&record.path, prefix) || is_under(record.logical_path(), prefix)
            })
    }
}

/// `offset`/`limit` pair; a zero limit means no limit.
#[derive(Debug, Clone, Copy)]
struct Window {
    offset: usize,
    limit: usize,
}

impl Window {
    /// Number of leading matches needed to fill the page.
    fn end(&self) -> Option<usize> {
        (self.limit > 0).then(|| self.offset.saturating_add(self.limit))
    }

    fn is_filled_by(&self, matched: usize) -> bool {
        self.end().is_some_and(|end| matched >= end)
    }

    fn slice(&self, matched: Vec<MediaRecord>) -> Vec<MediaRecord> {
        let take = if self.limit == 0 { usize::MAX } else { self.limit };
        matched.into_iter().skip(self.offset).take(take).collect()
    }
}

/// Answers free-text queries against the record store.
///
/// The open index is kept between queries. Each search re-reads the small
/// manifest and reopens the index only when a rebuild has published a new
/// generation; the previous mappings are released once no search holds them.
pub struct SearchEngine {
    store: Arc<MediaStore>,
    builder: IndexBuilder,
    fuzzy_cap: Option<usize>,
    index: RwLock<Option<Arc<IndexHandle>>>,
}

impl SearchEngine {
    /// `fuzzy_cap` bounds each n-gram postings list; zero disables the cap.
    pub fn new(store: Arc<MediaStore>, index_dir: impl Into<PathBuf>, fuzzy_cap: usize) -> Self {
        Self {
            store,
            builder: IndexBuilder::new(index_dir),
            fuzzy_cap: (fuzzy_cap > 0).then_some(fuzzy_cap),
            index: RwLock::new(None),
        }
    }

    pub fn from_config(store: Arc<MediaStore>, config: &LibraryConfig) -> Self {
        Self::new(store, config.index_dir(), config.fuzzy_postings_cap)
    }

    pub fn index_dir(&self) -> &Path {
        self.builder.dir()
    }

    /// Rebuild the on-disk index from the current store contents.
    pub fn rebuild(&self) -> Result<IndexStats, IndexError> {
        self.builder.rebuild(&self.store)
    }

    /// Delete every index artifact. Searches fall back until the next rebuild.
    pub fn clear_index(&self) -> Result<(), IndexError> {
        self.close_index();
        let dir = self.index_dir();
        match std::fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IndexError::io(dir, e)),
        }
    }

    /// Drop the cached index. Searches in flight keep their own reference.
    pub fn close_index(&self) {
        let previous = self
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            debug!("closed search index");
        }
    }

    /// Whether the engine holds an open index.
    pub fn index_is_open(&self) -> bool {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether a complete, current index is on disk.
    pub fn index_available(&self) -> bool {
        self.current_index().is_ok()
    }

    /// The open index matching the manifest on disk, reopened when a
    /// rebuild has replaced it.
    fn current_index(&self) -> Result<Arc<IndexHandle>, IndexError> {
        let manifest = match Manifest::load(self.index_dir()) {
            Ok(manifest) => manifest,
            Err(err) => {
                self.close_index();
                return Err(err);
            }
        };

        if let Some(handle) = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if *handle.manifest() == manifest {
                return Ok(Arc::clone(handle));
            }
        }

        let handle = match IndexHandle::from_manifest(self.index_dir(), manifest) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                self.close_index();
                return Err(err);
            }
        };
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Find records matching `query`, then apply `filters` and the page.
    ///
    /// Exact token matches come first, fuzzy-only matches after them, each
    /// group in ascending document id order. An empty query lists every
    /// record that passes the filters.
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MediaRecord>, SearchError> {
        let window = Window { offset, limit };
        let query = query.trim();

        if let Some(list) = query.strip_prefix(ID_LIST_PREFIX) {
            return self.search_ids(list, filters, window);
        }

        let tokens = tokens(query);
        if tokens.is_empty() {
            return self.scan_records(filters, window, |_| true);
        }

        match self.search_index(&tokens, filters, window) {
            Ok(Some(records)) => return Ok(records),
            Ok(None) => debug!(query, "index had no matches, scanning records"),
            Err(IndexError::Store(err)) => return Err(err.into()),
            Err(err) => debug!(query, error = %err, "index unavailable, scanning records"),
        }

        self.scan_records(filters, window, |record| {
            let name = record.name.to_lowercase();
            let path = record.path.to_lowercase();
            tokens
                .iter()
                .all(|token| name.contains(token.as_str()) || path.contains(token.as_str()))
        })
    }

    fn search_ids(
        &self,
        list: &str,
        filters: &SearchFilters,
        window: Window,
    ) -> Result<Vec<MediaRecord>, SearchError> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for id in list.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            if window.is_filled_by(matched.len()) {
                break;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(record) = self.store.get_by_id(id)? {
                if filters.matches(&record) {
                    matched.push(record);
                }
            }
        }
        Ok(window.slice(matched))
    }

    /// Evaluate against the index. `Ok(None)` means the index produced no
    /// match at all for this query and filter combination.
    ///
    /// Matches form one list: filtered exact candidates, then filtered
    /// fuzzy-only candidates. Fuzzy candidates are consulted only when the
    /// exact ones cannot fill the page, and every page is a slice of that
    /// same list.
    fn search_index(
        &self,
        tokens: &[String],
        filters: &SearchFilters,
        window: Window,
    ) -> Result<Option<Vec<MediaRecord>>, IndexError> {
        let handle = self.current_index()?;

        let per_token = tokens
            .iter()
            .map(|token| handle.field_union(token, TermKind::Exact, None))
            .collect::<Result<Vec<_>, _>>()?;
        let exact = intersect_all(per_token);

        let mut matched = Vec::new();
        self.resolve_into(&exact, filters, window, &mut matched)?;

        if !window.is_filled_by(matched.len()) {
            let fuzzy = self.fuzzy_candidates(&handle, tokens)?;
            let fuzzy_only = difference(&fuzzy, &exact);
            debug!(
                exact = exact.len(),
                fuzzy = fuzzy_only.len(),
                "added fuzzy candidates"
            );
            self.resolve_into(&fuzzy_only, filters, window, &mut matched)?;
        }

        if matched.is_empty() {
            return Ok(None);
        }
        Ok(Some(window.slice(matched)))
    }

    /// Per token, documents sharing all but two of its distinct 2-grams
    /// (one edit removes at most two); intersected across tokens.
    fn fuzzy_candidates(
        &self,
        handle: &IndexHandle,
        tokens: &[String],
    ) -> Result<Vec<u64>, IndexError> {
        let mut per_token = Vec::new();
        for token in tokens {
            let grams: BTreeSet<String> = ngrams(token).into_iter().collect();
            if grams.is_empty() {
                continue;
            }
            let lists = grams
                .iter()
                .map(|gram| handle.field_union(gram, TermKind::Ngram, self.fuzzy_cap))
                .collect::<Result<Vec<_>, _>>()?;
            let min = grams.len().saturating_sub(2).max(1);
            per_token.push(union_at_least(lists, min));
        }
        Ok(intersect_all(per_token))
    }

    /// Resolve candidates in order, keeping filtered records until the
    /// window is filled. Ids no longer in the store are skipped.
    fn resolve_into(
        &self,
        docs: &[u64],
        filters: &SearchFilters,
        window: Window,
        matched: &mut Vec<MediaRecord>,
    ) -> Result<(), IndexError> {
        for &doc in docs {
            if window.is_filled_by(matched.len()) {
                break;
            }
            let Some(id) = self.store.resolve_document(DocumentId(doc))? else {
                continue;
            };
            if let Some(record) = self.store.get_by_id(&id)? {
                if filters.matches(&record) {
                    matched.push(record);
                }
            }
        }
        Ok(())
    }

    fn scan_records(
        &self,
        filters: &SearchFilters,
        window: Window,
        predicate: impl Fn(&MediaRecord) -> bool,
    ) -> Result<Vec<MediaRecord>, SearchError> {
        let mut matched = Vec::new();
        for record in self.store.records() {
            if window.is_filled_by(matched.len()) {
                break;
            }
            let record = record?;
            if filters.matches(&record) && predicate(&record) {
                matched.push(record);
            }
        }
        Ok(window.slice(matched))
    }
}
