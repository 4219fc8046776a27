//! Stable file identity resolution.
//!
//! A file is identified by the triplet (filesystem id, inode, creation time).
//! The triplet survives renames and moves within one filesystem, and the
//! record id is a salted hash of it, so a rescan of an unmoved file always
//! lands on the same record.

use std::collections::HashMap;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant, UNIX_EPOCH};

use compact_str::{CompactString, format_compact};
use uuid::Uuid;

use crate::error::IdentityError;
use crate::path::{is_under, normalize_path};
use crate::record::IdentityKey;

/// Salt mixed into every derived id.
const ID_SALT: &str = "nasdex 2024-06 media identity v1";

/// Identifier used when no mount entry owns a path.
pub const ROOT_FILESYSTEM_ID: &str = "rootfs";

/// Default lifetime of the cached mount table.
pub const DEFAULT_MOUNT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Derive the record id for an identity triplet.
///
/// The result is formatted as a hyphenated UUID string.
pub fn derive_id(filesystem_id: &str, inode: u64, creation_time: i64) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(ID_SALT);
    hasher.update(filesystem_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(&inode.to_le_bytes());
    hasher.update(&creation_time.to_le_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[..16]);
    Uuid::from_bytes(bytes).hyphenated().to_string()
}

/// One mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: String,
    pub filesystem_id: CompactString,
}

/// Snapshot of the mount table, longest mount point first.
#[derive(Debug, Clone)]
struct MountTable {
    entries: Vec<MountEntry>,
    loaded_at: Instant,
}

impl MountTable {
    fn new(mut entries: Vec<MountEntry>) -> Self {
        entries.sort_by(|a, b| b.mount_point.len().cmp(&a.mount_point.len()));
        Self {
            entries,
            loaded_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }

    fn owner_of(&self, path: &str) -> Option<&MountEntry> {
        self.entries
            .iter()
            .find(|entry| is_under(path, &entry.mount_point))
    }

    fn root(&self) -> Option<&MountEntry> {
        self.entries.iter().find(|entry| entry.mount_point == "/")
    }
}

/// Source of mount entries; the system table by default.
pub trait MountSource: Send + Sync {
    fn load(&self) -> Vec<MountEntry>;
}

/// Reads `/proc/self/mountinfo` and `/dev/disk/by-uuid`.
#[derive(Debug, Clone)]
pub struct SystemMounts {
    mountinfo: PathBuf,
    by_uuid: PathBuf,
}

impl Default for SystemMounts {
    fn default() -> Self {
        Self {
            mountinfo: PathBuf::from("/proc/self/mountinfo"),
            by_uuid: PathBuf::from("/dev/disk/by-uuid"),
        }
    }
}

impl MountSource for SystemMounts {
    fn load(&self) -> Vec<MountEntry> {
        let Ok(contents) = fs::read_to_string(&self.mountinfo) else {
            return Vec::new();
        };
        let uuids = volume_uuids(&self.by_uuid);
        contents
            .lines()
            .filter_map(|line| parse_mountinfo_line(line, &uuids))
            .collect()
    }
}

/// Map canonical device paths to their volume UUIDs.
fn volume_uuids(dir: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return map;
    };
    for entry in entries.flatten() {
        let uuid = entry.file_name().to_string_lossy().into_owned();
        if let Ok(target) = fs::canonicalize(entry.path()) {
            map.insert(target.to_string_lossy().into_owned(), uuid);
        }
    }
    map
}

/// Parse one line of `/proc/self/mountinfo`.
///
/// Format: `id parent major:minor root mount_point options [optional...] - fstype source super_options`
fn parse_mountinfo_line(line: &str, uuids: &HashMap<String, String>) -> Option<MountEntry> {
    let (left, right) = line.split_once(" - ")?;
    let fields: Vec<&str> = left.split_whitespace().collect();
    let device = fields.get(2)?;
    let mount_point = unescape_mount_field(fields.get(4)?);
    let mut right_fields = right.split_whitespace();
    let fs_type = right_fields.next()?;
    let source = unescape_mount_field(right_fields.next().unwrap_or(""));

    let canonical_source = fs::canonicalize(&source)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| source.clone());

    let filesystem_id = if let Some(uuid) = uuids.get(&canonical_source) {
        format_compact!("uuid:{uuid}")
    } else if source.starts_with("/dev/") {
        format_compact!("dev:{source}")
    } else {
        format_compact!("{fs_type}:{device}")
    };

    Some(MountEntry {
        mount_point,
        filesystem_id,
    })
}

/// Decode the octal escapes (`\040` etc.) mountinfo uses for whitespace.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Resolves filesystem ids and identity triplets for paths.
pub struct IdentityResolver {
    source: Box<dyn MountSource>,
    ttl: Duration,
    table: RwLock<Option<MountTable>>,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNT_CACHE_TTL)
    }
}

impl IdentityResolver {
    /// Resolver backed by the system mount table.
    pub fn new(ttl: Duration) -> Self {
        Self::with_source(SystemMounts::default(), ttl)
    }

    /// Resolver backed by a custom mount source.
    pub fn with_source(source: impl MountSource + 'static, ttl: Duration) -> Self {
        Self {
            source: Box::new(source),
            ttl,
            table: RwLock::new(None),
        }
    }

    /// Stable id of the filesystem that owns `path`.
    ///
    /// Uses the cached mount table while it is fresh and reloads it on expiry
    /// or on a miss. Falls back to the root filesystem's id.
    pub fn resolve_filesystem_id(&self, path: impl AsRef<Path>) -> CompactString {
        let path = path.as_ref();
        let normalized = normalize_path(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));

        if let Ok(guard) = self.table.read() {
            if let Some(table) = guard.as_ref().filter(|t| t.is_fresh(self.ttl)) {
                if let Some(entry) = table.owner_of(&normalized) {
                    return entry.filesystem_id.clone();
                }
            }
        }

        let table = MountTable::new(self.source.load());
        let resolved = table
            .owner_of(&normalized)
            .or_else(|| table.root())
            .map(|entry| entry.filesystem_id.clone())
            .unwrap_or_else(|| CompactString::const_new(ROOT_FILESYSTEM_ID));

        if let Ok(mut guard) = self.table.write() {
            *guard = Some(table);
        }
        resolved
    }

    /// Inode and creation time of `path`.
    pub fn identity_of(&self, path: impl AsRef<Path>) -> Result<(u64, i64), IdentityError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|e| IdentityError::io(path, e))?;
        identity_from_metadata(path, &metadata)
    }

    /// Full identity triplet of `path`.
    pub fn identify(&self, path: impl AsRef<Path>) -> Result<IdentityKey, IdentityError> {
        let path = path.as_ref();
        let (inode, creation_time) = self.identity_of(path)?;
        Ok(IdentityKey::new(
            self.resolve_filesystem_id(path),
            inode,
            creation_time,
        ))
    }

    /// Identity triplet from metadata the caller already holds.
    pub fn identify_with(
        &self,
        path: &Path,
        metadata: &Metadata,
    ) -> Result<IdentityKey, IdentityError> {
        let (inode, creation_time) = identity_from_metadata(path, metadata)?;
        Ok(IdentityKey::new(
            self.resolve_filesystem_id(path),
            inode,
            creation_time,
        ))
    }
}

/// Inode and creation time from already-fetched metadata.
///
/// Filesystems without a birth time report creation time 0; the inode and
/// filesystem id still pin the identity.
pub fn identity_from_metadata(path: &Path, metadata: &Metadata) -> Result<(u64, i64), IdentityError> {
    let inode = inode_of(path, metadata)?;
    let creation_time = match metadata.created() {
        Ok(created) => match created.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
        },
        Err(err) if err.kind() == std::io::ErrorKind::Unsupported => 0,
        Err(err) => return Err(IdentityError::io(path, err)),
    };
    Ok((inode, creation_time))
}

#[cfg(unix)]
fn inode_of(_path: &Path, metadata: &Metadata) -> Result<u64, IdentityError> {
    use std::os::unix::fs::MetadataExt;
    Ok(metadata.ino())
}

#[cfg(not(unix))]
fn inode_of(path: &Path, _metadata: &Metadata) -> Result<u64, IdentityError> {
    Err(IdentityError::Unsupported {
        path: path.to_path_buf(),
    })
}

/// Seconds since the Unix epoch of the file's modification time.
pub fn modified_seconds(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
