use nasdex_core::{IdentityKey, MediaRecord, MediaType};
use nasdex_store::{IndexKind, MediaStore, UpsertOutcome};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn open_store() -> (TempDir, MediaStore) {
    let temp = TempDir::new().unwrap();
    let store = MediaStore::open(temp.path().join("records.redb")).unwrap();
    (temp, store)
}

fn record(id: &str, inode: u64, path: &str, size: u64, modified_at: i64) -> MediaRecord {
    let identity = IdentityKey::new("uuid:test", inode, 1_600_000_000);
    MediaRecord::new(id, &identity, path, size, modified_at)
}

/// Every composite index entry for `id`, as (media_type, trash, kind).
fn index_entries(store: &MediaStore, id: &str) -> Vec<(MediaType, bool, IndexKind)> {
    let mut found = Vec::new();
    for media_type in MediaType::ALL {
        for trash in [false, true] {
            for kind in IndexKind::ALL {
                for entry in store.iterate_type_index(media_type, trash, kind, &[]) {
                    if entry.unwrap() == id {
                        found.push((media_type, trash, kind));
                    }
                }
            }
        }
    }
    found
}

fn assert_indexed_once_in(store: &MediaStore, id: &str, media_type: MediaType, trash: bool) {
    let entries = index_entries(store, id);
    assert_eq!(entries.len(), IndexKind::ALL.len(), "entries: {entries:?}");
    assert!(
        entries
            .iter()
            .all(|(mt, t, _)| *mt == media_type && *t == trash),
        "entries: {entries:?}"
    );
}

#[test]
fn test_upsert_is_idempotent() {
    let (_temp, store) = open_store();
    let rec = record("r1", 1, "/srv/media/Heat.mkv", 100, 1_700_000_000);

    assert_eq!(store.upsert(&rec).unwrap(), UpsertOutcome::Inserted);
    assert_eq!(store.upsert(&rec).unwrap(), UpsertOutcome::Unchanged);
    assert_eq!(store.upsert(&rec).unwrap(), UpsertOutcome::Unchanged);

    assert_indexed_once_in(&store, "r1", MediaType::Video, false);
    assert_eq!(store.count_records().unwrap(), 1);
    assert_eq!(
        store.get_by_path("/srv/media/Heat.mkv").unwrap().as_deref(),
        Some("r1")
    );
    assert_eq!(
        store
            .get_by_identity("uuid:test", 1, 1_600_000_000)
            .unwrap()
            .as_deref(),
        Some("r1")
    );
}

#[test]
fn test_no_dangling_index_entries_after_changes() {
    let (_temp, store) = open_store();
    let mut rec = record("r1", 1, "/srv/media/clip.mp4", 100, 1_700_000_000);
    store.upsert(&rec).unwrap();
    assert_indexed_once_in(&store, "r1", MediaType::Video, false);

    // Size and mtime change.
    rec.size = 5_000;
    rec.modified_at = 1_700_000_500;
    assert_eq!(store.upsert(&rec).unwrap(), UpsertOutcome::Updated);
    assert_indexed_once_in(&store, "r1", MediaType::Video, false);
    let sizes: Vec<String> = store
        .iterate_type_index(MediaType::Video, false, IndexKind::Size, &[])
        .map(Result::unwrap)
        .collect();
    assert_eq!(sizes, vec!["r1".to_string()]);

    // Rename changes the name and the media type.
    let renamed = record("r1", 1, "/srv/media/clip.flac", 5_000, 1_700_000_500);
    store.upsert(&renamed).unwrap();
    assert_indexed_once_in(&store, "r1", MediaType::Audio, false);
    assert!(store.get_by_path("/srv/media/clip.mp4").unwrap().is_none());
    assert_eq!(
        store.get_by_path("/srv/media/clip.flac").unwrap().as_deref(),
        Some("r1")
    );

    // Trash and restore.
    let mut trashed = renamed.clone();
    trashed.mark_trashed("/srv/media/#recycle/clip.flac", 1_700_001_000);
    store.upsert(&trashed).unwrap();
    assert_indexed_once_in(&store, "r1", MediaType::Audio, true);

    let mut restored = trashed.clone();
    restored.mark_restored("/srv/media/clip.flac");
    store.upsert(&restored).unwrap();
    assert_indexed_once_in(&store, "r1", MediaType::Audio, false);
    assert!(
        store
            .get_by_path("/srv/media/#recycle/clip.flac")
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_media_type_is_inferred_from_name() {
    let (_temp, store) = open_store();
    let mut rec = record("r1", 1, "/srv/photos/IMG_0001.JPG", 10, 1);
    rec.media_type = MediaType::Audio;
    store.upsert(&rec).unwrap();

    let stored = store.get_by_id("r1").unwrap().unwrap();
    assert_eq!(stored.media_type, MediaType::Image);
    assert_eq!(stored.name, "IMG_0001.JPG");
}

#[test]
fn test_delete_is_idempotent() {
    let (_temp, store) = open_store();
    let rec = record("r1", 1, "/srv/a.mp3", 1, 1);
    store.upsert(&rec).unwrap();

    assert!(store.delete("r1").unwrap());
    assert!(!store.delete("r1").unwrap());
    assert!(!store.delete("never-existed").unwrap());

    assert!(store.get_by_id("r1").unwrap().is_none());
    assert!(store.get_by_path("/srv/a.mp3").unwrap().is_none());
    assert!(
        store
            .get_by_identity("uuid:test", 1, 1_600_000_000)
            .unwrap()
            .is_none()
    );
    assert!(store.resolve_document(rec.document_id()).unwrap().is_none());
    assert!(index_entries(&store, "r1").is_empty());
}

#[test]
fn test_path_collision_purges_stale_record() {
    let (_temp, store) = open_store();
    let old = record("old", 1, "/srv/song.mp3", 1, 1);
    store.upsert(&old).unwrap();

    // A different file now lives at the same path.
    let new = record("new", 2, "/srv/song.mp3", 2, 2);
    store.upsert(&new).unwrap();

    assert!(store.get_by_id("old").unwrap().is_none());
    assert!(index_entries(&store, "old").is_empty());
    assert_eq!(
        store.get_by_path("/srv/song.mp3").unwrap().as_deref(),
        Some("new")
    );
    assert_eq!(store.count_records().unwrap(), 1);
}

#[test]
fn test_list_orders_by_index() {
    let (_temp, store) = open_store();
    store
        .upsert(&record("a", 1, "/srv/b-movie.mkv", 300, 30))
        .unwrap();
    store
        .upsert(&record("b", 2, "/srv/Alpha.mkv", 100, 10))
        .unwrap();
    store
        .upsert(&record("c", 3, "/srv/cast.mkv", 200, 20))
        .unwrap();
    store.upsert(&record("d", 4, "/srv/song.mp3", 999, 99)).unwrap();

    let names = |kind| -> Vec<String> {
        store
            .list(MediaType::Video, false, kind, 0, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    };

    assert_eq!(names(IndexKind::Uuid), vec!["a", "b", "c"]);
    assert_eq!(names(IndexKind::Size), vec!["b", "c", "a"]);
    assert_eq!(names(IndexKind::SizeDesc), vec!["a", "c", "b"]);
    assert_eq!(names(IndexKind::Mod), vec!["b", "c", "a"]);
    assert_eq!(names(IndexKind::ModDesc), vec!["a", "c", "b"]);
    assert_eq!(names(IndexKind::Name), vec!["b", "a", "c"]);
    assert_eq!(names(IndexKind::NameDesc), vec!["c", "a", "b"]);

    let page = store
        .list(MediaType::Video, false, IndexKind::SizeDesc, 1, 1)
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "c");
}

#[test]
fn test_iteration_resumes_after_last_key() {
    let (_temp, store) = open_store();
    for i in 0..600u64 {
        let rec = record(&format!("id-{i:04}"), i, &format!("/srv/v{i}.mp4"), i, 0);
        store.upsert(&rec).unwrap();
    }

    let mut first = store.iterate_type_index(MediaType::Video, false, IndexKind::Size, &[]);
    let head: Vec<String> = first.by_ref().take(300).map(Result::unwrap).collect();
    let cursor = first.last_key().unwrap();
    drop(first);

    let tail: Vec<String> = store
        .iterate_type_index_after(MediaType::Video, false, IndexKind::Size, cursor)
        .map(Result::unwrap)
        .collect();

    assert_eq!(head.len(), 300);
    assert_eq!(tail.len(), 300);
    assert_eq!(head[0], "id-0000");
    assert_eq!(tail[0], "id-0300");
    assert_eq!(tail[299], "id-0599");
}

#[test]
fn test_delete_path_removes_subtree_only() {
    let (_temp, store) = open_store();
    store.upsert(&record("x", 1, "/srv/a/x.mp4", 1, 1)).unwrap();
    store.upsert(&record("y", 2, "/srv/a/b/y.mp4", 1, 1)).unwrap();
    store.upsert(&record("z", 3, "/srv/ab/z.mp4", 1, 1)).unwrap();

    let under: Vec<String> = store.ids_under("/srv/a").map(Result::unwrap).collect();
    assert_eq!(under.len(), 2);

    let mut removed = store.delete_path("/srv/a/").unwrap();
    removed.sort();
    assert_eq!(removed, vec!["x".to_string(), "y".to_string()]);
    assert!(store.get_by_id("z").unwrap().is_some());
    assert_eq!(store.count_records().unwrap(), 1);
}

#[test]
fn test_reset_keeps_state_and_prunes_tags() {
    let (_temp, store) = open_store();
    store.upsert(&record("keep", 1, "/srv/a.mp4", 1, 1)).unwrap();
    store.upsert(&record("gone", 2, "/srv/b.mp4", 1, 1)).unwrap();
    store.add_tag("favourites", "keep").unwrap();
    store.add_tag("favourites", "gone").unwrap();
    store.put_state("session", b"token").unwrap();

    let removed = store.reset_data().unwrap();
    assert!(removed > 0);
    assert_eq!(store.count_records().unwrap(), 0);
    assert!(index_entries(&store, "keep").is_empty());
    assert!(store.prune_tags_pending().unwrap());
    assert_eq!(store.get_state("session").unwrap().as_deref(), Some(&b"token"[..]));

    // Rescan brings one record back before cleanup runs.
    store.upsert(&record("keep", 1, "/srv/a.mp4", 1, 1)).unwrap();
    let pruned = store.prune_orphan_tags(&CancellationToken::new()).unwrap();
    assert_eq!(pruned, 1);
    assert!(!store.prune_tags_pending().unwrap());
    assert_eq!(store.tagged("favourites").unwrap(), vec!["keep".to_string()]);
}

#[test]
fn test_prune_observes_cancellation() {
    let (_temp, store) = open_store();
    store.add_tag("t", "orphan").unwrap();
    store.reset_data().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = store.prune_orphan_tags(&cancel).unwrap_err();
    assert!(err.is_cancelled());
    assert!(store.prune_tags_pending().unwrap());
}

#[test]
fn test_state_keys() {
    let (_temp, store) = open_store();
    assert!(store.get_state("creds").unwrap().is_none());
    store.put_state("creds", b"v1").unwrap();
    store.put_state("creds", b"v2").unwrap();
    assert_eq!(store.get_state("creds").unwrap().as_deref(), Some(&b"v2"[..]));
    store.delete_state("creds").unwrap();
    assert!(store.get_state("creds").unwrap().is_none());
}

#[test]
fn test_records_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("records.redb");
    let rec = record("r1", 1, "/srv/a.mkv", 1, 1);
    {
        let store = MediaStore::open(&path).unwrap();
        store.upsert(&rec).unwrap();
        store.flush().unwrap();
    }

    let store = MediaStore::open(&path).unwrap();
    assert_eq!(store.get_by_id("r1").unwrap().unwrap().path, "/srv/a.mkv");
    assert_eq!(
        store.resolve_document(rec.document_id()).unwrap().as_deref(),
        Some("r1")
    );
}
