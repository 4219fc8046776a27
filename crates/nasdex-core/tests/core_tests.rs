use nasdex_core::path::{is_under, normalize_path};
use nasdex_core::{
    CachedValue, DocumentId, IdentityKey, IdentityResolver, LibraryConfig, MediaRecord, MediaType,
    derive_id,
};

#[test]
fn test_document_id_is_pure_function_of_record_id() {
    let a = DocumentId::of("0b6f3c1e-8f0e-4a0a-9d51-4f8e2f0f6f10");
    let b = DocumentId::of("0b6f3c1e-8f0e-4a0a-9d51-4f8e2f0f6f10");
    let c = DocumentId::of("0b6f3c1e-8f0e-4a0a-9d51-4f8e2f0f6f11");

    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_record_id_follows_identity_triplet() {
    let identity = IdentityKey::new("uuid:disk-a", 1234, 1_650_000_000_000_000_000);
    let id = derive_id(&identity.filesystem_id, identity.inode, identity.creation_time);
    let record = MediaRecord::new(id.clone(), &identity, "/srv/music/track01.flac", 30_000_000, 1_650_000_100);

    assert_eq!(record.identity(), identity);
    assert_eq!(record.media_type, MediaType::Audio);
    assert_eq!(record.document_id(), DocumentId::of(&id));

    let other_fs = derive_id("uuid:disk-b", identity.inode, identity.creation_time);
    assert_ne!(id, other_fs);
}

#[test]
fn test_cached_metadata_is_inherited_but_revalidated() {
    let identity = IdentityKey::new("uuid:disk-a", 1, 1);
    let mut previous = MediaRecord::new("id", &identity, "/srv/a.mp3", 100, 10);
    previous.duration_seconds = Some(CachedValue::new(200.0, 10, 100));
    previous.artist = Some(CachedValue::new("Artist".to_string(), 10, 100));

    let mut current = MediaRecord::new("id", &identity, "/srv/a.mp3", 150, 20);
    current.inherit_metadata(&previous);

    let duration = current.duration_seconds.as_ref().unwrap();
    assert!(duration.fresh(current.modified_at, current.size).is_none());
    assert_eq!(duration.fresh(10, 100), Some(&200.0));
}

#[test]
fn test_path_normalization_feeds_prefix_checks() {
    let normalized = normalize_path("/srv//media/Movies/");
    assert_eq!(normalized, "/srv/media/Movies");
    assert!(is_under("/srv/media/Movies/a.mkv", &normalized));
}

#[test]
fn test_config_paths() {
    let config = LibraryConfig::new("/var/lib/nasdex", "/srv/media");
    assert!(config.index_dir().ends_with("search-index"));
    assert!(config.store_path().ends_with("records.redb"));
    assert_eq!(config.mount_cache_ttl().as_secs(), 30);
}

#[cfg(unix)]
#[test]
fn test_resolver_on_real_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let file = temp.path().join("clip.mp4");
    std::fs::write(&file, b"not really a video").unwrap();

    let resolver = IdentityResolver::default();
    let identity = resolver.identify(&file).unwrap();
    assert!(identity.inode > 0);
    assert!(!identity.filesystem_id.is_empty());

    let again = resolver.identify(&file).unwrap();
    assert_eq!(identity, again);
}
