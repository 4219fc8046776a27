//! Media records and the value types they carry.

use chrono::{DateTime, TimeZone, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::path::{file_name_of, parent_of};

/// Broad media category, inferred from the file extension.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MediaType {
    Audio,
    Video,
    Image,
    #[default]
    Other,
}

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "aac", "m4a", "ogg", "oga", "opus", "wma", "alac", "aiff", "aif", "ape",
    "dsf", "dff",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "avi", "mov", "wmv", "flv", "webm", "mpg", "mpeg", "ts", "m2ts", "mts",
    "3gp", "vob", "ogv", "rmvb",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "heif", "tif", "tiff", "raw", "cr2", "nef",
    "arw", "dng", "svg", "avif",
];

impl MediaType {
    /// All media types, in key-space order.
    pub const ALL: [MediaType; 4] = [
        MediaType::Audio,
        MediaType::Video,
        MediaType::Image,
        MediaType::Other,
    ];

    /// Infer the media type from a bare extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if AUDIO_EXTENSIONS.contains(&ext) {
            MediaType::Audio
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            MediaType::Video
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            MediaType::Image
        } else {
            MediaType::Other
        }
    }

    /// Infer the media type from a file name.
    pub fn from_name(name: &str) -> Self {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Self::from_extension(ext),
            _ => MediaType::Other,
        }
    }
}

/// Outcome of validating a cached value against the file's current stat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Freshness<'a, T> {
    /// The stamp matches; the value can be trusted.
    Fresh(&'a T),
    /// The file changed since the value was computed.
    Stale,
}

/// A best-effort cached value stamped with the file state it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedValue<T> {
    pub value: T,
    pub ref_modified_at: i64,
    pub ref_size: u64,
}

impl<T> CachedValue<T> {
    /// Stamp a freshly computed value with the file state it came from.
    pub fn new(value: T, ref_modified_at: i64, ref_size: u64) -> Self {
        Self {
            value,
            ref_modified_at,
            ref_size,
        }
    }

    /// Check the stamp against the given file state.
    pub fn check(&self, modified_at: i64, size: u64) -> Freshness<'_, T> {
        if self.ref_modified_at == modified_at && self.ref_size == size {
            Freshness::Fresh(&self.value)
        } else {
            Freshness::Stale
        }
    }

    /// Returns the value only if the stamp still matches.
    pub fn fresh(&self, modified_at: i64, size: u64) -> Option<&T> {
        match self.check(modified_at, size) {
            Freshness::Fresh(value) => Some(value),
            Freshness::Stale => None,
        }
    }
}

/// Filesystem-scoped identity of a physical file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub filesystem_id: CompactString,
    pub inode: u64,
    pub creation_time: i64,
}

impl IdentityKey {
    pub fn new(filesystem_id: impl Into<CompactString>, inode: u64, creation_time: i64) -> Self {
        Self {
            filesystem_id: filesystem_id.into(),
            inode,
            creation_time,
        }
    }

    /// Stable hex digest used as the identity lookup key.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.filesystem_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.inode.to_le_bytes());
        hasher.update(&self.creation_time.to_le_bytes());
        hasher.finalize().to_hex()[..32].to_string()
    }
}

/// Compact 64-bit document id used as the postings payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl DocumentId {
    /// Hash a record id into its document id.
    pub fn of(record_id: &str) -> Self {
        let hash = blake3::hash(record_id.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        Self(u64::from_le_bytes(bytes))
    }
}

/// The unit of record: one indexed media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: String,
    pub filesystem_id: CompactString,
    pub inode: u64,
    pub creation_time: i64,
    /// Current physical location, slash-normalized.
    pub path: String,
    /// Location before the file was trashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    pub name: CompactString,
    pub size: u64,
    /// Unix seconds.
    pub modified_at: i64,
    pub media_type: MediaType,
    #[serde(default)]
    pub is_trash: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trashed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<CachedValue<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<CachedValue<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<CachedValue<String>>,
}

impl MediaRecord {
    /// Build a record for a file that is not in the trash.
    pub fn new(
        id: impl Into<String>,
        identity: &IdentityKey,
        path: impl Into<String>,
        size: u64,
        modified_at: i64,
    ) -> Self {
        let path = path.into();
        let name = CompactString::from(file_name_of(&path));
        Self {
            id: id.into(),
            filesystem_id: identity.filesystem_id.clone(),
            inode: identity.inode,
            creation_time: identity.creation_time,
            media_type: MediaType::from_name(&name),
            name,
            path,
            original_path: None,
            size,
            modified_at,
            is_trash: false,
            trashed_at: None,
            duration_seconds: None,
            artist: None,
            title: None,
        }
    }

    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(self.filesystem_id.clone(), self.inode, self.creation_time)
    }

    pub fn document_id(&self) -> DocumentId {
        DocumentId::of(&self.id)
    }

    /// The path used for grouping: the original location while trashed.
    pub fn logical_path(&self) -> &str {
        match (&self.original_path, self.is_trash) {
            (Some(original), true) => original,
            _ => &self.path,
        }
    }

    /// Parent directory of the logical path.
    pub fn bucket(&self) -> &str {
        parent_of(self.logical_path())
    }

    /// Flag the record as trashed after the trash collaborator moved it.
    pub fn mark_trashed(&mut self, trash_path: impl Into<String>, at: i64) {
        if !self.is_trash {
            self.original_path = Some(std::mem::take(&mut self.path));
        }
        self.path = trash_path.into();
        self.is_trash = true;
        self.trashed_at = Some(at);
    }

    /// Clear the trash flag after the file was restored to `path`.
    pub fn mark_restored(&mut self, path: impl Into<String>) {
        self.path = path.into();
        self.original_path = None;
        self.is_trash = false;
        self.trashed_at = None;
    }

    pub fn modified_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.modified_at, 0).single()
    }

    /// Carry cached metadata over from a previous version of this record.
    ///
    /// Stale values are kept as-is; they are re-validated on read.
    pub fn inherit_metadata(&mut self, previous: &MediaRecord) {
        if self.duration_seconds.is_none() {
            self.duration_seconds = previous.duration_seconds.clone();
        }
        if self.artist.is_none() {
            self.artist = previous.artist.clone();
        }
        if self.title.is_none() {
            self.title = previous.title.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MediaRecord {
        let identity = IdentityKey::new("uuid:abcd", 42, 1_700_000_000);
        MediaRecord::new("id-1", &identity, "/srv/media/Movies/Heat.mkv", 1024, 1_700_000_100)
    }

    #[test]
    fn test_media_type_from_name() {
        assert_eq!(MediaType::from_name("song.FLAC"), MediaType::Audio);
        assert_eq!(MediaType::from_name("clip.mkv"), MediaType::Video);
        assert_eq!(MediaType::from_name("photo.jpeg"), MediaType::Image);
        assert_eq!(MediaType::from_name("notes.txt"), MediaType::Other);
        assert_eq!(MediaType::from_name(".mp3"), MediaType::Other);
        assert_eq!(MediaType::from_name("README"), MediaType::Other);
    }

    #[test]
    fn test_media_type_parse_and_display() {
        assert_eq!("video".parse::<MediaType>().unwrap(), MediaType::Video);
        assert_eq!("Audio".parse::<MediaType>().unwrap(), MediaType::Audio);
        assert_eq!(MediaType::Image.to_string(), "image");
    }

    #[test]
    fn test_cached_value_freshness() {
        let cached = CachedValue::new(93.5, 100, 2048);
        assert_eq!(cached.check(100, 2048), Freshness::Fresh(&93.5));
        assert_eq!(cached.check(101, 2048), Freshness::Stale);
        assert_eq!(cached.fresh(100, 4096), None);
    }

    #[test]
    fn test_record_defaults() {
        let record = sample();
        assert_eq!(record.name.as_str(), "Heat.mkv");
        assert_eq!(record.media_type, MediaType::Video);
        assert_eq!(record.bucket(), "/srv/media/Movies");
        assert!(!record.is_trash);
    }

    #[test]
    fn test_trash_uses_original_path_for_grouping() {
        let mut record = sample();
        record.mark_trashed("/srv/media/.trash/Heat.mkv", 1_700_000_500);

        assert!(record.is_trash);
        assert_eq!(record.path, "/srv/media/.trash/Heat.mkv");
        assert_eq!(record.logical_path(), "/srv/media/Movies/Heat.mkv");
        assert_eq!(record.bucket(), "/srv/media/Movies");

        record.mark_restored("/srv/media/Movies/Heat.mkv");
        assert!(!record.is_trash);
        assert!(record.original_path.is_none());
    }

    #[test]
    fn test_identity_digest_is_stable() {
        let a = IdentityKey::new("uuid:abcd", 42, 7);
        let b = IdentityKey::new("uuid:abcd", 42, 7);
        let c = IdentityKey::new("uuid:abcd", 43, 7);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let record = sample();
        let first = serde_json::to_vec(&record).unwrap();
        let second = serde_json::to_vec(&record.clone()).unwrap();
        assert_eq!(first, second);

        let decoded: MediaRecord = serde_json::from_slice(&first).unwrap();
        assert_eq!(decoded, record);
    }
}
