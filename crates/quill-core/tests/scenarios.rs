//! End-to-end store scenarios, run both against the local cache and against
//! a bound in-process backend.

use std::sync::Arc;
use std::time::Duration;

use quill_core::query::{by_filter, search};
use quill_core::{
    BackendError, Block, DocumentCodec, LocalCache, MemoryBackend, Note, NoteFilter, Store,
    StoreOptions, SyncError, SyncMode, TagColor,
};
use tempfile::TempDir;

const USER: &str = "user-1";

fn options() -> StoreOptions {
    StoreOptions {
        reflection_timeout: Duration::from_secs(2),
        bind_timeout: Duration::from_secs(2),
        seed_sample_content: false,
    }
}

fn local_store() -> Store {
    Store::new(
        Arc::new(MemoryBackend::new()),
        LocalCache::open_in_memory().unwrap(),
        options(),
    )
    .unwrap()
}

async fn bound_store() -> (Arc<MemoryBackend>, Store) {
    let backend = Arc::new(MemoryBackend::new());
    let store = Store::new(
        backend.clone(),
        LocalCache::open_in_memory().unwrap(),
        options(),
    )
    .unwrap();
    store.bind(USER).await.unwrap();
    (backend, store)
}

/// A local store and a bound store, for running one scenario in both modes
async fn both_modes() -> Vec<(&'static str, Store)> {
    let (_, bound) = bound_store().await;
    vec![("unbound", local_store()), ("bound", bound)]
}

fn remote_note(backend: &MemoryBackend, note: &Note) -> Option<Note> {
    backend
        .document(&format!("users/{}/notes/{}", USER, note.id))
        .map(|doc| Note::decode(&doc).unwrap())
}

// ---- Scenario 1: deleting a folder clears it from its notes ----

#[tokio::test]
async fn test_delete_folder_clears_notes() {
    for (mode, store) in both_modes().await {
        let work = store.create_folder("Work").await.unwrap();
        let note = store.create_note("Plan", Some(work.id)).await.unwrap();
        let trashed = store.create_note("Old plan", Some(work.id)).await.unwrap();
        store.soft_delete_note(trashed.id).await.unwrap();

        store.delete_folder(work.id).await.unwrap();

        assert!(store.folder(work.id).is_none(), "{}", mode);
        assert_eq!(store.note(note.id).unwrap().folder_id, None, "{}", mode);
        assert_eq!(store.note(trashed.id).unwrap().folder_id, None, "{}", mode);
        assert!(store
            .notes()
            .iter()
            .all(|n| n.folder_id != Some(work.id)));
    }
}

#[tokio::test]
async fn test_delete_folder_is_atomic_remotely() {
    let (backend, store) = bound_store().await;
    let work = store.create_folder("Work").await.unwrap();
    let note = store.create_note("Plan", Some(work.id)).await.unwrap();

    backend.fail_next_writes(1);
    assert!(store.delete_folder(work.id).await.is_err());

    // Nothing was applied: folder and reference both remain
    assert!(store.folder(work.id).is_some());
    assert_eq!(store.note(note.id).unwrap().folder_id, Some(work.id));
    assert_eq!(
        remote_note(&backend, &note).unwrap().folder_id,
        Some(work.id)
    );
}

// ---- Scenario 2: deleting a tag removes it from every note ----

#[tokio::test]
async fn test_delete_tag_scrubs_notes() {
    for (mode, store) in both_modes().await {
        let urgent = store
            .create_tag("Urgent", TagColor::parse("#EF4444").unwrap())
            .await
            .unwrap();
        let a = store.create_note("A", None).await.unwrap();
        let b = store.create_note("B", None).await.unwrap();
        store.add_tag_to_note(a.id, urgent.id).await.unwrap();
        store.add_tag_to_note(b.id, urgent.id).await.unwrap();
        assert!(store.note(a.id).unwrap().has_tag(urgent.id), "{}", mode);

        store.delete_tag(urgent.id).await.unwrap();

        assert!(store.tag(urgent.id).is_none(), "{}", mode);
        assert!(!store.note(a.id).unwrap().has_tag(urgent.id), "{}", mode);
        assert!(!store.note(b.id).unwrap().has_tag(urgent.id), "{}", mode);
    }
}

// ---- Scenario 3: soft delete, restore, permanent delete ----

#[tokio::test]
async fn test_note_deletion_lifecycle() {
    for (mode, store) in both_modes().await {
        let draft = store.create_note("Draft", None).await.unwrap();
        let in_filter = |filter: NoteFilter| {
            by_filter(&store.notes(), filter)
                .iter()
                .any(|n| n.id == draft.id)
        };

        store.soft_delete_note(draft.id).await.unwrap();
        assert!(!in_filter(NoteFilter::All), "{}", mode);
        assert!(in_filter(NoteFilter::RecentlyDeleted), "{}", mode);

        store.restore_note(draft.id).await.unwrap();
        assert!(in_filter(NoteFilter::All), "{}", mode);
        assert!(!in_filter(NoteFilter::RecentlyDeleted), "{}", mode);

        store.permanently_delete_note(draft.id).await.unwrap();
        assert!(!in_filter(NoteFilter::All), "{}", mode);
        assert!(!in_filter(NoteFilter::RecentlyDeleted), "{}", mode);
        assert!(store.note(draft.id).is_none(), "{}", mode);
    }
}

// ---- Scenario 4: unbound notes survive a cache reload ----

#[tokio::test]
async fn test_unbound_notes_survive_reload() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("cache.db");

    let store = Store::new(
        Arc::new(MemoryBackend::new()),
        LocalCache::open(&path).unwrap(),
        options(),
    )
    .unwrap();
    let folder = store.create_folder("Inbox").await.unwrap();
    for title in ["One", "Two", "Three"] {
        let note = store.create_note(title, Some(folder.id)).await.unwrap();
        store
            .add_block(note.id, Block::text(format!("{} body", title)))
            .await
            .unwrap();
    }
    let mut before = store.notes().to_vec();
    drop(store);

    let reopened = Store::new(
        Arc::new(MemoryBackend::new()),
        LocalCache::open(&path).unwrap(),
        options(),
    )
    .unwrap();
    let mut after = reopened.notes().to_vec();

    before.sort_by_key(|n| n.id);
    after.sort_by_key(|n| n.id);
    assert_eq!(after, before);
    assert_eq!(reopened.folders().len(), 1);
}

// ---- Scenario 5: a failed pin toggle changes nothing ----

#[tokio::test]
async fn test_failed_pin_toggle_keeps_state() {
    let (backend, store) = bound_store().await;
    let note = store.create_note("Pin me", None).await.unwrap();

    backend.fail_next_writes(1);
    let result = store.toggle_pin(note.id).await;

    assert!(matches!(result, Err(SyncError::Remote(_))));
    assert!(!store.note(note.id).unwrap().is_pinned);
    assert!(!remote_note(&backend, &note).unwrap().is_pinned);
    assert!(store.status().last_error.is_some());

    // The next attempt goes through
    let pinned = store.toggle_pin(note.id).await.unwrap();
    assert!(pinned.is_pinned);
    assert!(store.note(note.id).unwrap().is_pinned);
}

#[tokio::test]
async fn test_field_patch_leaves_other_fields() {
    let (backend, store) = bound_store().await;
    let note = store.create_note("Shared", None).await.unwrap();

    // Another client renames the note
    let mut elsewhere = note.clone();
    elsewhere.set_title("Renamed elsewhere");
    backend
        .put_raw(
            &format!("users/{}/notes/{}", USER, note.id),
            elsewhere.encode(),
        )
        .unwrap();

    let mut changes = store.changes();
    changes
        .wait_for(|s| s.note(note.id).is_some_and(|n| n.title == "Renamed elsewhere"))
        .await
        .unwrap();

    store.toggle_pin(note.id).await.unwrap();
    let stored = remote_note(&backend, &note).unwrap();
    assert!(stored.is_pinned);
    assert_eq!(stored.title, "Renamed elsewhere");
}

// ---- Properties ----

#[tokio::test]
async fn test_all_and_deleted_partition_store() {
    let store = local_store();
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(store.create_note(format!("Note {}", i), None).await.unwrap().id);
    }
    store.soft_delete_notes(&ids[..2]).await.unwrap();

    let notes = store.notes();
    let live = by_filter(&notes, NoteFilter::All);
    let deleted = by_filter(&notes, NoteFilter::RecentlyDeleted);
    assert_eq!(live.len(), 4);
    assert_eq!(deleted.len(), 2);
    assert!(live.iter().all(|n| !n.is_deleted()));
    assert!(deleted.iter().all(|n| n.is_deleted()));

    let found = search(&notes, "note 1");
    assert!(found.iter().all(|f| notes.contains(f)));
}

#[tokio::test]
async fn test_bulk_operations_bound() {
    let (backend, store) = bound_store().await;
    let tag = store.create_tag("Later", TagColor::default()).await.unwrap();
    let a = store.create_note("A", None).await.unwrap();
    let b = store.create_note("B", None).await.unwrap();
    let writes = backend.writes_applied();

    let tagged = store.add_tag_to_notes(&[a.id, b.id], tag.id).await.unwrap();

    assert_eq!(tagged, 2);
    assert_eq!(backend.writes_applied(), writes + 1);
    assert!(store.note(a.id).unwrap().has_tag(tag.id));
    assert!(store.note(b.id).unwrap().has_tag(tag.id));
}

// ---- Binding ----

#[tokio::test]
async fn test_bind_failure_falls_back_to_cache() {
    let backend = Arc::new(MemoryBackend::new());
    let store = Store::new(
        backend.clone(),
        LocalCache::open_in_memory().unwrap(),
        options(),
    )
    .unwrap();
    let local = store.create_note("Offline", None).await.unwrap();

    backend.set_fail_listens(true);
    let result = store.bind(USER).await;

    assert!(matches!(result, Err(SyncError::Binding(_))));
    assert_eq!(store.mode(), SyncMode::Unbound);
    assert!(store.status().last_error.is_some());
    assert!(!store.status().is_loading);
    assert!(store.note(local.id).is_some());
    assert_eq!(backend.active_listeners(), 0);

    // Unbound mutations still work
    store.create_note("Still offline", None).await.unwrap();
    assert_eq!(store.notes().len(), 2);
}

#[tokio::test]
async fn test_bind_replaces_local_state_with_remote() {
    let backend = Arc::new(MemoryBackend::new());
    let existing = Note::new("From the cloud", USER, None);
    backend
        .put_raw(
            &format!("users/{}/notes/{}", USER, existing.id),
            existing.encode(),
        )
        .unwrap();

    let store = Store::new(
        backend.clone(),
        LocalCache::open_in_memory().unwrap(),
        options(),
    )
    .unwrap();
    store.create_note("Local only", None).await.unwrap();

    store.bind(USER).await.unwrap();
    let titles: Vec<_> = store.notes().iter().map(|n| n.title.clone()).collect();
    assert_eq!(titles, vec!["From the cloud"]);
}

#[tokio::test]
async fn test_unbind_releases_listeners_and_restores_cache() {
    let backend = Arc::new(MemoryBackend::new());
    let store = Store::new(
        backend.clone(),
        LocalCache::open_in_memory().unwrap(),
        options(),
    )
    .unwrap();
    let local = store.create_note("Local", None).await.unwrap();

    store.bind(USER).await.unwrap();
    assert_eq!(backend.active_listeners(), 3);
    let remote = store.create_note("Remote", None).await.unwrap();

    store.unbind().await;

    assert_eq!(backend.active_listeners(), 0);
    assert_eq!(store.mode(), SyncMode::Unbound);
    assert!(store.note(local.id).is_some());
    assert!(store.note(remote.id).is_none());

    // Remote writes made after unbinding are not seen
    let mut late = Note::new("Late", USER, None);
    late.blocks.push(Block::text("after sign-out"));
    backend
        .put_raw(&format!("users/{}/notes/{}", USER, late.id), late.encode())
        .unwrap();
    tokio::task::yield_now().await;
    assert!(store.note(late.id).is_none());
}

#[tokio::test]
async fn test_rebinding_switches_users() {
    let (backend, store) = bound_store().await;
    store.create_note("Mine", None).await.unwrap();

    store.bind("user-2").await.unwrap();

    assert!(store.notes().is_empty());
    assert_eq!(backend.active_listeners(), 3);
    let theirs = store.create_note("Theirs", None).await.unwrap();
    assert_eq!(theirs.owner_id, "user-2");
}

#[tokio::test]
async fn test_listener_error_keeps_last_snapshot() {
    let (backend, store) = bound_store().await;
    let note = store.create_note("Kept", None).await.unwrap();
    let mut status = store.status_changes();

    backend.fail_listeners(BackendError::Unavailable("stream reset".into()));
    status
        .wait_for(|s| s.last_error.is_some())
        .await
        .unwrap();

    assert!(store.note(note.id).is_some());
    store.refresh().await.unwrap();
    assert!(store.note(note.id).is_some());
}

#[tokio::test]
async fn test_writes_fail_fast_once_listeners_are_lost() {
    let (backend, store) = bound_store().await;
    store.create_note("Before", None).await.unwrap();
    let mut status = store.status_changes();

    backend.fail_listeners(BackendError::Unavailable("stream reset".into()));
    status
        .wait_for(|s| s.last_error.is_some())
        .await
        .unwrap();
    assert_eq!(backend.active_listeners(), 0);

    let started = std::time::Instant::now();
    let result = store.create_note("After", None).await;
    assert!(matches!(result, Err(SyncError::ListenerLost(_))));
    assert!(started.elapsed() < options().reflection_timeout);
    assert_eq!(store.notes().len(), 1);

    store.refresh().await.unwrap();
    let note = store.create_note("After", None).await.unwrap();
    store
        .add_block(note.id, Block::text("appended"))
        .await
        .unwrap();
    assert_eq!(store.note(note.id).unwrap().blocks.len(), 1);
}

#[tokio::test]
async fn test_dropping_store_releases_listeners() {
    let (backend, store) = bound_store().await;
    assert_eq!(backend.active_listeners(), 3);

    drop(store);
    // Aborted tasks release their registrations once the runtime polls them
    for _ in 0..10 {
        if backend.active_listeners() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(backend.active_listeners(), 0);
}
