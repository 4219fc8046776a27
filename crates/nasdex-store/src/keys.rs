//! Key namespaces and sort-key encoding.
//!
//! Everything lives in one ordered byte-keyed table. Namespaces are string
//! prefixes; composite index keys are laid out as
//! `type:{media_type}:trash:{0|1}:{kind}:{suffix}:{id}` so that a prefix range
//! yields records in sort order.

use nasdex_core::{DocumentId, IdentityKey, MediaRecord, MediaType};
use strum::{AsRefStr, Display, EnumString};

pub const RECORD_PREFIX: &str = "rec:";
pub const PATH_PREFIX: &str = "path:";
pub const IDENTITY_PREFIX: &str = "ident:";
pub const DOCUMENT_PREFIX: &str = "doc:";
pub const TYPE_PREFIX: &str = "type:";
pub const TAG_PREFIX: &str = "tag:";
pub const STATE_PREFIX: &str = "state:";
pub const META_PREFIX: &str = "meta:";

/// Namespaces cleared by a data reset.
pub const CORE_NAMESPACES: [&str; 5] = [
    RECORD_PREFIX,
    PATH_PREFIX,
    IDENTITY_PREFIX,
    DOCUMENT_PREFIX,
    TYPE_PREFIX,
];

/// Set by a data reset; the next cleanup prunes orphaned tag relations.
pub const PRUNE_TAGS_FLAG: &str = "meta:prune_tags";

/// Terminates a complemented name so that shorter names sort after their extensions.
const DESC_NAME_TERMINATOR: u8 = 0xFF;
/// Ends an ascending name so it sorts before every longer name it prefixes.
const ASC_NAME_TERMINATOR: u8 = 0x00;

/// One of the seven composite secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum IndexKind {
    Uuid,
    Mod,
    #[strum(serialize = "moddesc")]
    ModDesc,
    Name,
    #[strum(serialize = "namedesc")]
    NameDesc,
    Size,
    #[strum(serialize = "sizedesc")]
    SizeDesc,
}

impl IndexKind {
    pub const ALL: [IndexKind; 7] = [
        IndexKind::Uuid,
        IndexKind::Mod,
        IndexKind::ModDesc,
        IndexKind::Name,
        IndexKind::NameDesc,
        IndexKind::Size,
        IndexKind::SizeDesc,
    ];
}

pub fn record_key(id: &str) -> Vec<u8> {
    prefixed(RECORD_PREFIX, id.as_bytes())
}

pub fn path_key(path: &str) -> Vec<u8> {
    prefixed(PATH_PREFIX, path.as_bytes())
}

pub fn identity_key(identity: &IdentityKey) -> Vec<u8> {
    prefixed(IDENTITY_PREFIX, identity.digest().as_bytes())
}

pub fn document_key(doc: DocumentId) -> Vec<u8> {
    format!("{DOCUMENT_PREFIX}{:016x}", doc.0).into_bytes()
}

pub fn state_key(name: &str) -> Vec<u8> {
    prefixed(STATE_PREFIX, name.as_bytes())
}

pub fn tag_prefix(tag: &str) -> Vec<u8> {
    format!("{TAG_PREFIX}{tag}:").into_bytes()
}

pub fn tag_key(tag: &str, id: &str) -> Vec<u8> {
    format!("{TAG_PREFIX}{tag}:{id}").into_bytes()
}

/// Record id referenced by a tag relation key.
pub fn tag_key_id(key: &[u8]) -> Option<&str> {
    let key = std::str::from_utf8(key).ok()?;
    key.strip_prefix(TAG_PREFIX)?.rsplit_once(':').map(|(_, id)| id)
}

/// Namespace prefix of one composite index.
pub fn type_namespace(media_type: MediaType, is_trash: bool, kind: IndexKind) -> Vec<u8> {
    format!(
        "{TYPE_PREFIX}{media_type}:trash:{}:{kind}:",
        if is_trash { 1 } else { 0 }
    )
    .into_bytes()
}

/// Sort-field encoding for `kind` (without the trailing `:{id}`).
pub fn sort_suffix(kind: IndexKind, record: &MediaRecord) -> Vec<u8> {
    let modified = u64::try_from(record.modified_at).unwrap_or(0);
    match kind {
        IndexKind::Uuid => Vec::new(),
        IndexKind::Mod => numeric_asc(modified),
        IndexKind::ModDesc => numeric_desc(modified),
        IndexKind::Name => name_asc(&record.name),
        IndexKind::NameDesc => name_desc(&record.name),
        IndexKind::Size => numeric_asc(record.size),
        IndexKind::SizeDesc => numeric_desc(record.size),
    }
}

/// Full composite index key for `record` in index `kind`.
pub fn type_index_key(kind: IndexKind, record: &MediaRecord) -> Vec<u8> {
    let mut key = type_namespace(record.media_type, record.is_trash, kind);
    let suffix = sort_suffix(kind, record);
    if !suffix.is_empty() {
        key.extend_from_slice(&suffix);
        key.push(b':');
    }
    key.extend_from_slice(record.id.as_bytes());
    key
}

/// All seven composite index keys for `record`.
pub fn type_index_keys(record: &MediaRecord) -> [Vec<u8>; 7] {
    IndexKind::ALL.map(|kind| type_index_key(kind, record))
}

/// Zero-padded 20-digit decimal.
pub fn numeric_asc(value: u64) -> Vec<u8> {
    format!("{value:020}").into_bytes()
}

/// Max-value-minus-value, zero-padded.
pub fn numeric_desc(value: u64) -> Vec<u8> {
    numeric_asc(u64::MAX - value)
}

/// Lowercased name terminated by 0x00, so names sort case-insensitively.
pub fn name_asc(name: &str) -> Vec<u8> {
    let mut out = name.to_lowercase().into_bytes();
    out.push(ASC_NAME_TERMINATOR);
    out
}

/// Byte-complement of the lowercased name, terminated by 0xFF.
pub fn name_desc(name: &str) -> Vec<u8> {
    let mut out: Vec<u8> = name.to_lowercase().bytes().map(|b| !b).collect();
    out.push(DESC_NAME_TERMINATOR);
    out
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn prefixed(prefix: &str, rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + rest.len());
    key.extend_from_slice(prefix.as_bytes());
    key.extend_from_slice(rest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use nasdex_core::IdentityKey;

    fn record(id: &str, name: &str, size: u64, modified_at: i64) -> MediaRecord {
        let identity = IdentityKey::new("fs", 1, 1);
        MediaRecord::new(id, &identity, format!("/srv/{name}"), size, modified_at)
    }

    #[test]
    fn test_namespace_layout() {
        assert_eq!(
            type_namespace(MediaType::Video, false, IndexKind::ModDesc),
            b"type:video:trash:0:moddesc:".to_vec()
        );
        assert_eq!(
            type_namespace(MediaType::Audio, true, IndexKind::Uuid),
            b"type:audio:trash:1:uuid:".to_vec()
        );
    }

    #[test]
    fn test_numeric_keys() {
        let r = record("abc", "a.mp4", 42, 1_700_000_000);
        assert_eq!(
            type_index_key(IndexKind::Size, &r),
            b"type:video:trash:0:size:00000000000000000042:abc".to_vec()
        );
        assert_eq!(
            type_index_key(IndexKind::Uuid, &r),
            b"type:video:trash:0:uuid:abc".to_vec()
        );
        assert!(numeric_desc(10) < numeric_desc(9));
        assert!(numeric_asc(9) < numeric_asc(10));
    }

    #[test]
    fn test_descending_name_order() {
        let mut names = vec!["ab", "abc", "b", "Aa"];
        names.sort_by_key(|n| name_desc(n));
        assert_eq!(names, vec!["b", "abc", "ab", "Aa"]);

        let mut names = vec!["b", "abc", "Ab"];
        names.sort_by_key(|n| name_asc(n));
        assert_eq!(names, vec!["Ab", "abc", "b"]);
    }

    #[test]
    fn test_prefixed_names_sort_shorter_first() {
        // ' ', '-' and '.' all sort below the ':' that follows the suffix.
        let short = record("id2", "a", 1, 0);
        for longer in ["a b", "a-b", "a.b"] {
            let long = record("id1", longer, 1, 0);
            assert!(
                type_index_key(IndexKind::Name, &short) < type_index_key(IndexKind::Name, &long),
                "{longer}"
            );
            assert!(
                type_index_key(IndexKind::NameDesc, &long)
                    < type_index_key(IndexKind::NameDesc, &short),
                "{longer}"
            );
        }
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_end(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_end(b"\xff\xff"), None);
    }

    #[test]
    fn test_tag_key_id() {
        let key = tag_key("favourite:films", "1234-5678");
        assert_eq!(tag_key_id(&key), Some("1234-5678"));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("moddesc".parse::<IndexKind>().unwrap(), IndexKind::ModDesc);
        assert_eq!(IndexKind::SizeDesc.to_string(), "sizedesc");
    }
}
