//! Primary record store over an embedded ordered key-value database.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use nasdex_core::path::{file_name_of, normalize_str};
use nasdex_core::{DocumentId, IdentityKey, MediaRecord, MediaType};
use redb::{Database, Durability, ReadableTable, Table, TableDefinition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::keys::{
    self, CORE_NAMESPACES, IndexKind, PATH_PREFIX, PRUNE_TAGS_FLAG, RECORD_PREFIX, TAG_PREFIX,
    document_key, identity_key, path_key, prefix_end, record_key, state_key, tag_key, tag_prefix,
    type_index_keys, type_namespace,
};

/// Single ordered table holding every namespace.
const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

type KvTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

/// Entries fetched per read transaction by the lazy iterators.
const SCAN_BATCH: usize = 256;

/// Keys removed per write transaction during a reset.
const RESET_BATCH: usize = 10_000;

/// Result of an [`MediaStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed under this id.
    Inserted,
    /// The record changed and its keys were rewritten.
    Updated,
    /// The serialized record was byte-identical; nothing was written.
    Unchanged,
}

/// The primary record store.
///
/// Safe to share across threads; the database serializes writers and
/// readers see committed snapshots.
pub struct MediaStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for MediaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStore").field("path", &self.path).finish()
    }
}

impl MediaStore {
    /// Open (or create) the store file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(KV)?;
        write_txn.commit()?;
        debug!(path = %path.display(), "opened record store");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or update a record and every key derived from it.
    ///
    /// Old lookup and index entries are removed before the new ones are
    /// written. Byte-identical records are not rewritten.
    pub fn upsert(&self, record: &MediaRecord) -> Result<UpsertOutcome, StoreError> {
        let mut record = record.clone();
        normalize_record(&mut record);
        let encoded = serde_json::to_vec(&record)?;
        let rec_key = record_key(&record.id);

        if self.read_raw(&rec_key)?.as_deref() == Some(encoded.as_slice()) {
            return Ok(UpsertOutcome::Unchanged);
        }

        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::None);
        let outcome = {
            let mut table = write_txn.open_table(KV)?;

            let old_bytes = table.get(rec_key.as_slice())?.map(|g| g.value().to_vec());
            if old_bytes.as_deref() == Some(encoded.as_slice()) {
                drop(table);
                write_txn.abort()?;
                return Ok(UpsertOutcome::Unchanged);
            }
            let old = old_bytes
                .map(|bytes| serde_json::from_slice::<MediaRecord>(&bytes))
                .transpose()?;

            if let Some(old) = &old {
                remove_derived_keys(&mut table, old)?;
            }

            // A different record still claiming this path or identity is stale.
            let new_path_key = path_key(&record.path);
            if let Some(other) = read_string(&table, &new_path_key)? {
                if other != record.id {
                    purge_record(&mut table, &other)?;
                }
            }
            let new_identity_key = identity_key(&record.identity());
            if let Some(other) = read_string(&table, &new_identity_key)? {
                if other != record.id {
                    purge_record(&mut table, &other)?;
                }
            }

            let id = record.id.as_bytes();
            table.insert(rec_key.as_slice(), encoded.as_slice())?;
            table.insert(new_path_key.as_slice(), id)?;
            table.insert(new_identity_key.as_slice(), id)?;
            table.insert(document_key(record.document_id()).as_slice(), id)?;
            for key in type_index_keys(&record) {
                table.insert(key.as_slice(), id)?;
            }

            if old.is_some() {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<MediaRecord>, StoreError> {
        match self.read_raw(&record_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_by_path(&self, path: &str) -> Result<Option<String>, StoreError> {
        self.read_id(&path_key(&normalize_str(path)))
    }

    pub fn get_by_identity(
        &self,
        filesystem_id: &str,
        inode: u64,
        creation_time: i64,
    ) -> Result<Option<String>, StoreError> {
        let identity = IdentityKey::new(filesystem_id, inode, creation_time);
        self.read_id(&identity_key(&identity))
    }

    /// Record id behind a postings document id.
    pub fn resolve_document(&self, doc: DocumentId) -> Result<Option<String>, StoreError> {
        self.read_id(&document_key(doc))
    }

    /// Remove a record and every key derived from it. Idempotent.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::None);
        let removed = {
            let mut table = write_txn.open_table(KV)?;
            purge_record(&mut table, id)?
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Remove the record at `path` and every record beneath it.
    ///
    /// Returns the removed ids.
    pub fn delete_path(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let path = normalize_str(path);
        let mut ids: Vec<String> = self.get_by_path(&path)?.into_iter().collect();
        let dir_prefix = if path == "/" {
            path_key(&path)
        } else {
            path_key(&format!("{path}/"))
        };
        for entry in self.scan_prefix(dir_prefix) {
            let (_, value) = entry?;
            ids.push(decode_id(&value)?);
        }
        for id in &ids {
            self.delete(id)?;
        }
        Ok(ids)
    }

    /// Lazy, ordered ids from one composite index.
    ///
    /// `prefix` narrows the range within the index (e.g. a name prefix for
    /// [`IndexKind::Name`]).
    pub fn iterate_type_index(
        &self,
        media_type: MediaType,
        is_trash: bool,
        kind: IndexKind,
        prefix: &[u8],
    ) -> TypeIndexIter<'_> {
        let mut namespace = type_namespace(media_type, is_trash, kind);
        namespace.extend_from_slice(prefix);
        TypeIndexIter {
            inner: self.scan_prefix(namespace),
        }
    }

    /// Restart an index iteration after a key returned by [`TypeIndexIter::last_key`].
    pub fn iterate_type_index_after(
        &self,
        media_type: MediaType,
        is_trash: bool,
        kind: IndexKind,
        after: Vec<u8>,
    ) -> TypeIndexIter<'_> {
        let namespace = type_namespace(media_type, is_trash, kind);
        let mut inner = self.scan_prefix(namespace);
        inner.cursor = Some(after);
        TypeIndexIter { inner }
    }

    /// One page of records in index order.
    pub fn list(
        &self,
        media_type: MediaType,
        is_trash: bool,
        kind: IndexKind,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MediaRecord>, StoreError> {
        let mut out = Vec::with_capacity(limit.min(SCAN_BATCH));
        for id in self
            .iterate_type_index(media_type, is_trash, kind, &[])
            .skip(offset)
            .take(limit)
        {
            if let Some(record) = self.get_by_id(&id?)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Lazy iteration over every stored record in id order.
    pub fn records(&self) -> RecordIter<'_> {
        RecordIter {
            inner: self.scan_prefix(RECORD_PREFIX.as_bytes().to_vec()),
        }
    }

    /// Ids of records whose physical path lies under `dir` (inclusive).
    pub fn ids_under(&self, dir: &str) -> IdIter<'_> {
        let dir = normalize_str(dir);
        IdIter {
            inner: self.scan_prefix(path_key(&dir)),
            dir,
        }
    }

    pub fn count_records(&self) -> Result<u64, StoreError> {
        let mut count = 0;
        for entry in self.scan_prefix(RECORD_PREFIX.as_bytes().to_vec()) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Make every previous non-durable commit durable.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::Immediate);
        write_txn.commit()?;
        Ok(())
    }

    /// Write a collaborator-owned state key (credentials, sessions).
    ///
    /// Committed with immediate durability.
    pub fn put_state(&self, name: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::Immediate);
        {
            let mut table = write_txn.open_table(KV)?;
            table.insert(state_key(name).as_slice(), value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_state(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_raw(&state_key(name))
    }

    pub fn delete_state(&self, name: &str) -> Result<(), StoreError> {
        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::Immediate);
        {
            let mut table = write_txn.open_table(KV)?;
            table.remove(state_key(name).as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Relate a record to a tag.
    pub fn add_tag(&self, tag: &str, id: &str) -> Result<(), StoreError> {
        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::None);
        {
            let mut table = write_txn.open_table(KV)?;
            table.insert(tag_key(tag, id).as_slice(), b"".as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn remove_tag(&self, tag: &str, id: &str) -> Result<(), StoreError> {
        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::None);
        {
            let mut table = write_txn.open_table(KV)?;
            table.remove(tag_key(tag, id).as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Record ids related to `tag`.
    pub fn tagged(&self, tag: &str) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in self.scan_prefix(tag_prefix(tag)) {
            let (key, _) = entry?;
            if let Some(id) = keys::tag_key_id(&key) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// Whether a data reset left tag relations to prune.
    pub fn prune_tags_pending(&self) -> Result<bool, StoreError> {
        Ok(self.read_raw(PRUNE_TAGS_FLAG.as_bytes())?.is_some())
    }

    /// Remove tag relations that reference missing records, then clear the
    /// reset flag. Checks `cancel` on every key.
    pub fn prune_orphan_tags(&self, cancel: &CancellationToken) -> Result<usize, StoreError> {
        let mut orphans = Vec::new();
        for entry in self.scan_prefix(TAG_PREFIX.as_bytes().to_vec()) {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let (key, _) = entry?;
            let Some(id) = keys::tag_key_id(&key) else {
                continue;
            };
            if self.read_raw(&record_key(id))?.is_none() {
                orphans.push(key);
            }
        }

        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::Immediate);
        {
            let mut table = write_txn.open_table(KV)?;
            for key in &orphans {
                table.remove(key.as_slice())?;
            }
            table.remove(PRUNE_TAGS_FLAG.as_bytes())?;
        }
        write_txn.commit()?;
        debug!(pruned = orphans.len(), "pruned orphaned tag relations");
        Ok(orphans.len())
    }

    /// Delete every record, lookup and index key.
    ///
    /// Collaborator state and tag relations survive; tags are flagged for
    /// pruning by the next cleanup.
    pub fn reset_data(&self) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for namespace in CORE_NAMESPACES {
            loop {
                let batch: Vec<Vec<u8>> = self
                    .scan_prefix(namespace.as_bytes().to_vec())
                    .take(RESET_BATCH)
                    .map(|entry| entry.map(|(key, _)| key))
                    .collect::<Result<_, _>>()?;
                if batch.is_empty() {
                    break;
                }
                let mut write_txn = self.db.begin_write()?;
                write_txn.set_durability(Durability::None);
                {
                    let mut table = write_txn.open_table(KV)?;
                    for key in &batch {
                        table.remove(key.as_slice())?;
                    }
                }
                write_txn.commit()?;
                removed += batch.len() as u64;
            }
        }

        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(Durability::Immediate);
        {
            let mut table = write_txn.open_table(KV)?;
            table.insert(PRUNE_TAGS_FLAG.as_bytes(), b"1".as_slice())?;
        }
        write_txn.commit()?;
        info!(removed, "reset record store");
        Ok(removed)
    }

    /// Lazy `(key, value)` scan over every key starting with `prefix`.
    pub(crate) fn scan_prefix(&self, prefix: Vec<u8>) -> PrefixScan<'_> {
        let end = prefix_end(&prefix);
        PrefixScan {
            store: self,
            start: prefix,
            end,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn read_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn read_id(&self, key: &[u8]) -> Result<Option<String>, StoreError> {
        self.read_raw(key)?.map(|bytes| decode_id(&bytes)).transpose()
    }

    /// Fetch up to `SCAN_BATCH` entries in `(lower, end)`.
    fn fetch_batch(
        &self,
        lower: Bound<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV)?;
        let upper = match end {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let mut batch = Vec::with_capacity(SCAN_BATCH);
        for entry in table.range::<&[u8]>((lower, upper))? {
            let (key, value) = entry?;
            batch.push((key.value().to_vec(), value.value().to_vec()));
            if batch.len() == SCAN_BATCH {
                break;
            }
        }
        Ok(batch)
    }
}

/// Normalize paths and derive name and media type.
fn normalize_record(record: &mut MediaRecord) {
    record.path = normalize_str(&record.path);
    if let Some(original) = record.original_path.take() {
        record.original_path = Some(normalize_str(&original));
    }
    record.name = file_name_of(record.logical_path()).into();
    record.media_type = MediaType::from_name(&record.name);
}

fn decode_id(bytes: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::Corrupt {
        key: String::from_utf8_lossy(bytes).into_owned(),
    })
}

fn read_string(table: &KvTable<'_>, key: &[u8]) -> Result<Option<String>, StoreError> {
    match table.get(key)? {
        Some(guard) => Ok(Some(decode_id(guard.value())?)),
        None => Ok(None),
    }
}

/// Remove lookup and index keys derived from `record`.
///
/// Lookup keys are only removed while they still point at this record.
fn remove_derived_keys(
    table: &mut KvTable<'_>,
    record: &MediaRecord,
) -> Result<(), StoreError> {
    for key in type_index_keys(record) {
        table.remove(key.as_slice())?;
    }
    for key in [path_key(&record.path), identity_key(&record.identity())] {
        if read_string(table, &key)?.as_deref() == Some(record.id.as_str()) {
            table.remove(key.as_slice())?;
        }
    }
    table.remove(document_key(record.document_id()).as_slice())?;
    Ok(())
}

/// Remove the record under `id` with all of its keys.
fn purge_record(table: &mut KvTable<'_>, id: &str) -> Result<bool, StoreError> {
    let rec_key = record_key(id);
    let old = table.get(rec_key.as_slice())?.map(|g| g.value().to_vec());
    let Some(bytes) = old else {
        return Ok(false);
    };
    let record: MediaRecord = serde_json::from_slice(&bytes)?;
    remove_derived_keys(table, &record)?;
    table.remove(rec_key.as_slice())?;
    Ok(true)
}

/// Batch-paged prefix scan.
///
/// Each batch runs in its own short read transaction, so the scan never pins
/// a snapshot and can be resumed from any key.
pub struct PrefixScan<'a> {
    store: &'a MediaStore,
    start: Vec<u8>,
    end: Option<Vec<u8>>,
    cursor: Option<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl PrefixScan<'_> {
    /// Last key handed out; pass it back to resume.
    pub fn last_key(&self) -> Option<&[u8]> {
        self.cursor.as_deref()
    }

    fn refill(&mut self) -> Result<(), StoreError> {
        let lower = match &self.cursor {
            Some(cursor) => Bound::Excluded(cursor.as_slice()),
            None => Bound::Included(self.start.as_slice()),
        };
        let batch = self.store.fetch_batch(lower, self.end.as_deref())?;
        if batch.len() < SCAN_BATCH {
            self.exhausted = true;
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for PrefixScan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.refill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        let (key, value) = self.buffer.pop_front()?;
        self.cursor = Some(key.clone());
        Some(Ok((key, value)))
    }
}

/// Ids from one composite index, in sort order.
pub struct TypeIndexIter<'a> {
    inner: PrefixScan<'a>,
}

impl TypeIndexIter<'_> {
    /// Key of the last yielded entry, for [`MediaStore::iterate_type_index_after`].
    pub fn last_key(&self) -> Option<Vec<u8>> {
        self.inner.last_key().map(<[u8]>::to_vec)
    }
}

impl Iterator for TypeIndexIter<'_> {
    type Item = Result<String, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(entry.and_then(|(_, value)| decode_id(&value)))
    }
}

/// Every record, in id order.
pub struct RecordIter<'a> {
    inner: PrefixScan<'a>,
}

impl Iterator for RecordIter<'_> {
    type Item = Result<MediaRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(entry.and_then(|(_, value)| Ok(serde_json::from_slice(&value)?)))
    }
}

/// Ids of records at or beneath a directory.
pub struct IdIter<'a> {
    inner: PrefixScan<'a>,
    dir: String,
}

impl Iterator for IdIter<'_> {
    type Item = Result<String, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, value) = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err)),
            };
            let path = &key[PATH_PREFIX.len()..];
            let path = String::from_utf8_lossy(path);
            // The raw prefix also matches siblings such as `/dir2`.
            if nasdex_core::path::is_under(&path, &self.dir) {
                return Some(decode_id(&value));
            }
        }
    }
}
