//! Synchronized store
//!
//! Owns the in-memory notes, folders and tags and keeps them in step with
//! either the local cache (no user) or the remote backend (a bound user).
//!
//! ## Modes
//!
//! - `Unbound`: mutations apply to memory and are persisted to the cache.
//! - `Binding`: live queries are opened for all three collections; the store
//!   becomes `Bound` once each has delivered its first snapshot, or falls
//!   back to `Unbound` with the error recorded.
//! - `Bound`: listener snapshots are the only writer of in-memory state.
//!   Mutations go to the remote backend and return once their snapshot
//!   arrives. A failed write changes nothing locally. If a listener stops,
//!   writes are refused with `ListenerLost` until `refresh` re-subscribes.
//!
//! Mutation entry points are serialized by a single async mutex, so each
//! computes its new value from the latest state.

mod sample;
mod state;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{keys, Collection, DocumentCodec};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::models::{Block, BlockKind, Entity, Folder, Note, Tag, TagColor, DEFAULT_NOTE_TITLE};
use crate::query::NoteQuery;
use crate::remote::{DocumentBackend, RemoteStore, Subscription, WriteBatch};
use crate::storage::{CacheWrite, LocalCache};

use state::{Change, Collected, Mutation, Shared};

pub use state::{Snapshot, StoreStatus, SyncMode};

/// Owner id stamped on entities created while no user is bound
pub const LOCAL_OWNER: &str = "local";

/// Store tuning
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a bound mutation waits to see its write in a snapshot
    pub reflection_timeout: Duration,
    /// How long binding waits for the first snapshots
    pub bind_timeout: Duration,
    /// Seed an empty store with sample content on open
    pub seed_sample_content: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            reflection_timeout: Duration::from_millis(5000),
            bind_timeout: Duration::from_millis(10_000),
            seed_sample_content: false,
        }
    }
}

impl From<&Config> for StoreOptions {
    fn from(config: &Config) -> Self {
        Self {
            reflection_timeout: config.reflection_timeout(),
            bind_timeout: config.bind_timeout(),
            seed_sample_content: config.seed_sample_content,
        }
    }
}

#[derive(Default)]
struct Session {
    remote: Option<RemoteStore>,
    listeners: Vec<JoinHandle<()>>,
}

impl Session {
    fn owner(&self) -> String {
        self.remote
            .as_ref()
            .and_then(|remote| remote.user_id())
            .unwrap_or(LOCAL_OWNER)
            .to_string()
    }
}

/// The synchronized notes store
pub struct Store {
    backend: Arc<dyn DocumentBackend>,
    cache: LocalCache,
    options: StoreOptions,
    shared: Arc<Shared>,
    session: Mutex<Session>,
}

fn load_cache(cache: &LocalCache) -> Snapshot {
    Snapshot {
        notes: Arc::new(cache.load::<Note>()),
        folders: Arc::new(cache.load::<Folder>()),
        tags: Arc::new(cache.load::<Tag>()),
    }
}

fn note_patch(note: Note, fields: &[&str]) -> Change<Note> {
    let mut fields = fields.to_vec();
    fields.push(keys::UPDATED_AT);
    let patch = note.encode_fields(&fields);
    Change::Patch {
        entity: note,
        fields: patch,
    }
}

/// Open a live query and wait for its first snapshot
async fn first_snapshot<T: DocumentCodec>(
    remote: &RemoteStore,
) -> SyncResult<(Subscription<T>, Vec<T>)> {
    let mut subscription = remote.subscribe::<T>().await?;
    match subscription.next().await {
        Some(Ok(items)) => Ok((subscription, items)),
        Some(Err(e)) => Err(e.into()),
        None => Err(SyncError::Binding(format!(
            "{} listener closed before its first snapshot",
            T::COLLECTION
        ))),
    }
}

/// Apply every later snapshot of one collection until the listener ends
fn spawn_listener<T: Collected>(
    shared: Arc<Shared>,
    generation: u64,
    mut subscription: Subscription<T>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            match event {
                Ok(items) => {
                    if !shared.apply_snapshot(generation, items) {
                        break;
                    }
                }
                Err(e) => shared.listener_failed(generation, e.into()),
            }
        }
        shared.listener_ended(generation);
        debug!("{} listener stopped", T::COLLECTION);
    })
}

impl Store {
    /// Create a store over `cache`, starting Unbound
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        cache: LocalCache,
        options: StoreOptions,
    ) -> SyncResult<Self> {
        let mut initial = load_cache(&cache);
        if options.seed_sample_content && initial.is_empty() {
            info!("Seeding empty store with sample content");
            initial = sample::sample_content(LOCAL_OWNER);
            cache.save(initial.notes.as_slice())?;
            cache.save(initial.folders.as_slice())?;
            cache.save(initial.tags.as_slice())?;
        }

        debug!(
            "Store opened with {} notes, {} folders, {} tags",
            initial.notes.len(),
            initial.folders.len(),
            initial.tags.len()
        );

        Ok(Self {
            backend,
            cache,
            options,
            shared: Arc::new(Shared::new(initial)),
            session: Mutex::new(Session::default()),
        })
    }

    /// Create a store using the cache location and timeouts from `config`
    pub fn open(config: &Config, backend: Arc<dyn DocumentBackend>) -> SyncResult<Self> {
        let cache = LocalCache::open(config.cache_path())?;
        Self::new(backend, cache, StoreOptions::from(config))
    }

    // ---- Reads ----

    /// The current state of all three collections
    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn notes(&self) -> Arc<Vec<Note>> {
        self.shared.snapshot.borrow().notes.clone()
    }

    pub fn folders(&self) -> Arc<Vec<Folder>> {
        self.shared.snapshot.borrow().folders.clone()
    }

    pub fn tags(&self) -> Arc<Vec<Tag>> {
        self.shared.snapshot.borrow().tags.clone()
    }

    pub fn note(&self, id: Uuid) -> Option<Note> {
        self.shared.snapshot.borrow().note(id).cloned()
    }

    pub fn folder(&self, id: Uuid) -> Option<Folder> {
        self.shared.snapshot.borrow().folder(id).cloned()
    }

    pub fn tag(&self, id: Uuid) -> Option<Tag> {
        self.shared.snapshot.borrow().tag(id).cloned()
    }

    /// Run a filter/search/sort query over the current notes
    pub fn query(&self, query: &NoteQuery) -> Vec<Note> {
        query.run(&self.notes())
    }

    /// Receiver notified whenever any collection changes
    pub fn changes(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn status(&self) -> StoreStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver notified whenever the status changes
    pub fn status_changes(&self) -> watch::Receiver<StoreStatus> {
        self.shared.status.subscribe()
    }

    pub fn mode(&self) -> SyncMode {
        self.shared.status.borrow().mode.clone()
    }

    /// Dismiss the recorded error
    pub fn clear_error(&self) {
        self.shared.clear_error();
    }

    // ---- Lifecycle ----

    /// Bind to `user_id`'s remote collections
    ///
    /// On failure the store falls back to the local cache, records the
    /// error and returns it.
    pub async fn bind(&self, user_id: impl Into<String>) -> SyncResult<()> {
        let user_id = user_id.into();
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;

        info!("Binding store to user {}", user_id);
        self.shared.set_mode(
            SyncMode::Binding {
                user_id: user_id.clone(),
            },
            true,
        );

        let remote = RemoteStore::for_user(self.backend.clone(), user_id.clone());
        let opened = timeout(self.options.bind_timeout, async {
            tokio::try_join!(
                first_snapshot::<Note>(&remote),
                first_snapshot::<Folder>(&remote),
                first_snapshot::<Tag>(&remote),
            )
        })
        .await;

        let ((notes_sub, notes), (folders_sub, folders), (tags_sub, tags)) = match opened {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => return Err(self.bind_failed(e.to_string())),
            Err(_) => {
                return Err(self.bind_failed(format!(
                    "no initial snapshot within {:?}",
                    self.options.bind_timeout
                )))
            }
        };

        let generation = self.shared.next_generation();
        self.shared.live.send_replace(true);
        self.shared.snapshot.send_replace(Snapshot {
            notes: Arc::new(notes),
            folders: Arc::new(folders),
            tags: Arc::new(tags),
        });
        session.listeners = vec![
            spawn_listener(self.shared.clone(), generation, notes_sub),
            spawn_listener(self.shared.clone(), generation, folders_sub),
            spawn_listener(self.shared.clone(), generation, tags_sub),
        ];
        session.remote = Some(remote);

        self.shared.set_mode(SyncMode::Bound { user_id }, false);
        info!("Store bound");
        Ok(())
    }

    fn bind_failed(&self, reason: String) -> SyncError {
        warn!("Binding failed, falling back to local cache: {}", reason);
        let error = SyncError::Binding(reason);
        self.shared.record_error(&error);
        self.shared.snapshot.send_replace(load_cache(&self.cache));
        self.shared.set_mode(SyncMode::Unbound, false);
        error
    }

    /// Stop syncing and return to the local cache
    pub async fn unbind(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
        self.shared.snapshot.send_replace(load_cache(&self.cache));
        self.shared.set_mode(SyncMode::Unbound, false);
        info!("Store unbound");
    }

    /// Re-open the live queries for the bound user, or reload the cache
    pub async fn refresh(&self) -> SyncResult<()> {
        match self.mode().user_id() {
            Some(user_id) => self.bind(user_id.to_string()).await,
            None => {
                let _session = self.session.lock().await;
                self.shared.snapshot.send_replace(load_cache(&self.cache));
                debug!("Reloaded store from local cache");
                Ok(())
            }
        }
    }

    /// Stop every listener and forget the remote
    ///
    /// Waits for the listener tasks to finish so their registrations are
    /// released before returning.
    async fn teardown(&self, session: &mut Session) {
        self.shared.next_generation();
        self.shared.live.send_replace(false);
        session.remote = None;
        for handle in session.listeners.drain(..) {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Listener task failed: {}", e);
                }
            }
        }
    }

    // ---- Commit ----

    async fn commit(&self, session: &Session, mutations: Vec<Mutation>) -> SyncResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        match &session.remote {
            Some(remote) => self.commit_remote(remote, mutations).await,
            None => self.commit_local(mutations),
        }
    }

    async fn commit_remote(&self, remote: &RemoteStore, mutations: Vec<Mutation>) -> SyncResult<()> {
        let mut live = self.shared.live.subscribe();
        if !*live.borrow_and_update() {
            let error = SyncError::ListenerLost("refresh to resubscribe before writing".into());
            warn!("Refusing remote write: {}", error);
            self.shared.record_error(&error);
            return Err(error);
        }
        let mut changes = self.shared.snapshot.subscribe();

        let result = match mutations.as_slice() {
            [single] => single.send(remote).await,
            many => {
                let mut batch = WriteBatch::new();
                for mutation in many {
                    mutation.add_to(&mut batch);
                }
                remote.batch(batch).await
            }
        };

        if let Err(e) = result {
            warn!("Remote write failed: {}", e);
            self.shared.record_error(&e);
            return Err(e);
        }

        let wait = self.options.reflection_timeout;
        let reflected = tokio::select! {
            biased;
            seen = timeout(
                wait,
                changes.wait_for(|snapshot| mutations.iter().all(|m| m.is_reflected(snapshot))),
            ) => match seen {
                Ok(Ok(_)) => Ok(()),
                _ => Err(SyncError::NotReflected(wait)),
            },
            _ = live.wait_for(|live| !*live) => Err(SyncError::ListenerLost(
                "listener closed before the write was reflected".into(),
            )),
        };
        if let Err(e) = &reflected {
            warn!("Remote write not visible: {}", e);
            self.shared.record_error(e);
        }
        reflected
    }

    /// Persist the changed collections, then publish them
    ///
    /// Nothing is published when the cache write fails, so memory never runs
    /// ahead of the cache.
    fn commit_local(&self, mutations: Vec<Mutation>) -> SyncResult<()> {
        let mut next = self.snapshot();
        for mutation in &mutations {
            mutation.apply(&mut next);
        }

        let touched: HashSet<Collection> = mutations.iter().map(Mutation::collection).collect();
        let mut write = CacheWrite::new();
        for collection in touched {
            match collection {
                Collection::Notes => write.put(next.notes.as_slice()),
                Collection::Folders => write.put(next.folders.as_slice()),
                Collection::Tags => write.put(next.tags.as_slice()),
            }
        }
        if !write.is_empty() {
            if let Err(e) = self.cache.write(write) {
                let error = SyncError::from(e);
                warn!("Failed to persist changes: {}", error);
                self.shared.record_error(&error);
                return Err(error);
            }
        }

        self.shared.snapshot.send_replace(next);
        Ok(())
    }

    // ---- Lookups ----

    fn find_note(&self, id: Uuid) -> SyncResult<Note> {
        self.note(id).ok_or(SyncError::NotFound {
            kind: Note::KIND,
            id,
        })
    }

    fn require_folder(&self, id: Uuid) -> SyncResult<Folder> {
        self.folder(id).ok_or(SyncError::NotFound {
            kind: Folder::KIND,
            id,
        })
    }

    fn require_tag(&self, id: Uuid) -> SyncResult<Tag> {
        self.tag(id).ok_or(SyncError::NotFound { kind: Tag::KIND, id })
    }

    /// Reject folder or tag references that `previous` did not already hold
    fn check_references(&self, note: &Note, previous: Option<&Note>) -> SyncResult<()> {
        if let Some(folder_id) = note.folder_id {
            if previous.and_then(|p| p.folder_id) != Some(folder_id) {
                self.require_folder(folder_id)?;
            }
        }
        for tag_id in &note.tag_ids {
            if !previous.is_some_and(|p| p.has_tag(*tag_id)) {
                self.require_tag(*tag_id)?;
            }
        }
        Ok(())
    }

    // ---- Notes ----

    /// Create an empty note; a blank title becomes "New Note"
    pub async fn create_note(
        &self,
        title: impl Into<String>,
        folder_id: Option<Uuid>,
    ) -> SyncResult<Note> {
        let session = self.session.lock().await;
        if let Some(folder_id) = folder_id {
            self.require_folder(folder_id)?;
        }

        let title = title.into();
        let title = if title.trim().is_empty() {
            DEFAULT_NOTE_TITLE.to_string()
        } else {
            title
        };
        let note = Note::new(title, session.owner(), folder_id);

        self.commit(&session, vec![Change::Create(note.clone()).into()])
            .await?;
        debug!("Created note {}", note.id);
        Ok(note)
    }

    /// Add a fully built note, owned by the current user
    pub async fn add_note(&self, mut note: Note) -> SyncResult<Note> {
        let session = self.session.lock().await;
        self.check_references(&note, None)?;
        note.owner_id = session.owner();

        self.commit(&session, vec![Change::Create(note.clone()).into()])
            .await?;
        debug!("Added note {} with {} blocks", note.id, note.blocks.len());
        Ok(note)
    }

    /// Replace a note with `note`, stamping `updated_at`
    pub async fn update_note(&self, mut note: Note) -> SyncResult<Note> {
        let session = self.session.lock().await;
        let previous = self.find_note(note.id)?;
        self.check_references(&note, Some(&previous))?;
        note.touch();

        self.commit(&session, vec![Change::Update(note.clone()).into()])
            .await?;
        Ok(note)
    }

    /// Apply a whole-note edit and write the full note
    async fn edit_note<R>(
        &self,
        id: Uuid,
        edit: impl FnOnce(&mut Note) -> SyncResult<R>,
    ) -> SyncResult<R> {
        let session = self.session.lock().await;
        let mut note = self.find_note(id)?;
        let result = edit(&mut note)?;
        self.commit(&session, vec![Change::Update(note).into()]).await?;
        Ok(result)
    }

    /// Apply a single-field edit and write only `fields`
    ///
    /// `edit` returns false when nothing changed, which skips the write.
    async fn patch_note(
        &self,
        id: Uuid,
        fields: &[&str],
        edit: impl FnOnce(&mut Note) -> bool,
    ) -> SyncResult<Note> {
        let session = self.session.lock().await;
        let mut note = self.find_note(id)?;
        if !edit(&mut note) {
            return Ok(note);
        }
        self.commit(&session, vec![note_patch(note.clone(), fields).into()])
            .await?;
        Ok(note)
    }

    /// Apply the same edit to many notes in one write; missing ids are skipped
    async fn patch_notes(
        &self,
        ids: &[Uuid],
        fields: &[&str],
        mut edit: impl FnMut(&mut Note) -> bool,
    ) -> SyncResult<usize> {
        let session = self.session.lock().await;
        let snapshot = self.snapshot();
        let mut seen = HashSet::new();

        let mutations: Vec<Mutation> = ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| snapshot.note(*id).cloned())
            .filter_map(|mut note| edit(&mut note).then(|| Mutation::from(note_patch(note, fields))))
            .collect();

        let count = mutations.len();
        self.commit(&session, mutations).await?;
        Ok(count)
    }

    /// Append a block; returns its id
    pub async fn add_block(&self, note_id: Uuid, block: Block) -> SyncResult<Uuid> {
        self.edit_note(note_id, |note| {
            let block_id = block.id;
            note.push_block(block);
            Ok(block_id)
        })
        .await
    }

    pub async fn update_block_content(
        &self,
        note_id: Uuid,
        block_id: Uuid,
        content: impl Into<String>,
    ) -> SyncResult<()> {
        self.edit_note(note_id, |note| {
            note.update_block_content(block_id, content)
                .then_some(())
                .ok_or(SyncError::NotFound {
                    kind: "block",
                    id: block_id,
                })
        })
        .await
    }

    pub async fn set_block_kind(
        &self,
        note_id: Uuid,
        block_id: Uuid,
        kind: BlockKind,
    ) -> SyncResult<()> {
        self.edit_note(note_id, |note| {
            note.set_block_kind(block_id, kind)
                .then_some(())
                .ok_or(SyncError::NotFound {
                    kind: "block",
                    id: block_id,
                })
        })
        .await
    }

    pub async fn remove_block(&self, note_id: Uuid, block_id: Uuid) -> SyncResult<()> {
        self.edit_note(note_id, |note| {
            note.remove_block(block_id)
                .then_some(())
                .ok_or(SyncError::NotFound {
                    kind: "block",
                    id: block_id,
                })
        })
        .await
    }

    pub async fn rename_note(&self, id: Uuid, title: impl Into<String>) -> SyncResult<Note> {
        self.patch_note(id, &[keys::TITLE], |note| {
            note.set_title(title);
            true
        })
        .await
    }

    pub async fn toggle_pin(&self, id: Uuid) -> SyncResult<Note> {
        self.patch_note(id, &[keys::IS_PINNED], |note| {
            note.toggle_pin();
            true
        })
        .await
    }

    /// Move a note into `folder_id`, or out of any folder with `None`
    pub async fn move_note(&self, id: Uuid, folder_id: Option<Uuid>) -> SyncResult<Note> {
        if let Some(folder_id) = folder_id {
            self.require_folder(folder_id)?;
        }
        self.patch_note(id, &[keys::FOLDER_ID], |note| {
            if note.folder_id == folder_id {
                return false;
            }
            note.set_folder(folder_id);
            true
        })
        .await
    }

    pub async fn add_tag_to_note(&self, id: Uuid, tag_id: Uuid) -> SyncResult<Note> {
        self.require_tag(tag_id)?;
        self.patch_note(id, &[keys::TAG_IDS], |note| note.add_tag(tag_id))
            .await
    }

    pub async fn remove_tag_from_note(&self, id: Uuid, tag_id: Uuid) -> SyncResult<Note> {
        self.patch_note(id, &[keys::TAG_IDS], |note| note.remove_tag(tag_id))
            .await
    }

    /// Move a note to recently deleted
    pub async fn soft_delete_note(&self, id: Uuid) -> SyncResult<Note> {
        self.patch_note(id, &[keys::IS_DELETED, keys::DELETED_AT], |note| {
            if note.is_deleted() {
                return false;
            }
            note.soft_delete();
            true
        })
        .await
    }

    /// Bring a note back from recently deleted
    pub async fn restore_note(&self, id: Uuid) -> SyncResult<Note> {
        self.patch_note(id, &[keys::IS_DELETED, keys::DELETED_AT], |note| {
            if !note.is_deleted() {
                return false;
            }
            note.restore();
            true
        })
        .await
    }

    /// Remove a note for good
    pub async fn permanently_delete_note(&self, id: Uuid) -> SyncResult<()> {
        let session = self.session.lock().await;
        self.find_note(id)?;
        self.commit(&session, vec![Change::<Note>::Delete(id).into()])
            .await?;
        info!("Permanently deleted note {}", id);
        Ok(())
    }

    /// Soft-delete every listed note; returns how many changed
    pub async fn soft_delete_notes(&self, ids: &[Uuid]) -> SyncResult<usize> {
        self.patch_notes(ids, &[keys::IS_DELETED, keys::DELETED_AT], |note| {
            if note.is_deleted() {
                return false;
            }
            note.soft_delete();
            true
        })
        .await
    }

    pub async fn move_notes(&self, ids: &[Uuid], folder_id: Option<Uuid>) -> SyncResult<usize> {
        if let Some(folder_id) = folder_id {
            self.require_folder(folder_id)?;
        }
        self.patch_notes(ids, &[keys::FOLDER_ID], |note| {
            if note.folder_id == folder_id {
                return false;
            }
            note.set_folder(folder_id);
            true
        })
        .await
    }

    pub async fn add_tag_to_notes(&self, ids: &[Uuid], tag_id: Uuid) -> SyncResult<usize> {
        self.require_tag(tag_id)?;
        self.patch_notes(ids, &[keys::TAG_IDS], |note| note.add_tag(tag_id))
            .await
    }

    // ---- Folders ----

    pub async fn create_folder(&self, name: impl Into<String>) -> SyncResult<Folder> {
        let session = self.session.lock().await;
        let folder = Folder::new(name, session.owner());
        self.commit(&session, vec![Change::Create(folder.clone()).into()])
            .await?;
        debug!("Created folder {}", folder.id);
        Ok(folder)
    }

    pub async fn rename_folder(&self, id: Uuid, name: impl Into<String>) -> SyncResult<Folder> {
        let session = self.session.lock().await;
        let mut folder = self.require_folder(id)?;
        folder.rename(name);
        self.commit(&session, vec![Change::Update(folder.clone()).into()])
            .await?;
        Ok(folder)
    }

    /// Delete a folder, moving its notes (deleted ones included) out of it
    pub async fn delete_folder(&self, id: Uuid) -> SyncResult<()> {
        let session = self.session.lock().await;
        self.require_folder(id)?;

        let snapshot = self.snapshot();
        let mut mutations: Vec<Mutation> = snapshot
            .notes
            .iter()
            .filter(|note| note.folder_id == Some(id))
            .map(|note| {
                let mut note = note.clone();
                note.set_folder(None);
                Mutation::from(note_patch(note, &[keys::FOLDER_ID]))
            })
            .collect();
        let moved = mutations.len();
        mutations.push(Change::<Folder>::Delete(id).into());

        self.commit(&session, mutations).await?;
        info!("Deleted folder {} and moved {} notes out of it", id, moved);
        Ok(())
    }

    // ---- Tags ----

    pub async fn create_tag(&self, name: impl Into<String>, color: TagColor) -> SyncResult<Tag> {
        let session = self.session.lock().await;
        let tag = Tag::new(name, session.owner(), color);
        self.commit(&session, vec![Change::Create(tag.clone()).into()])
            .await?;
        debug!("Created tag {}", tag.id);
        Ok(tag)
    }

    /// Rename and/or recolor a tag
    pub async fn update_tag(
        &self,
        id: Uuid,
        name: Option<String>,
        color: Option<TagColor>,
    ) -> SyncResult<Tag> {
        let session = self.session.lock().await;
        let mut tag = self.require_tag(id)?;
        if let Some(name) = name {
            tag.rename(name);
        }
        if let Some(color) = color {
            tag.set_color(color);
        }
        self.commit(&session, vec![Change::Update(tag.clone()).into()])
            .await?;
        Ok(tag)
    }

    /// Delete a tag and remove it from every note carrying it
    pub async fn delete_tag(&self, id: Uuid) -> SyncResult<()> {
        let session = self.session.lock().await;
        self.require_tag(id)?;

        let snapshot = self.snapshot();
        let mut mutations: Vec<Mutation> = snapshot
            .notes
            .iter()
            .filter(|note| note.has_tag(id))
            .map(|note| {
                let mut note = note.clone();
                note.remove_tag(id);
                Mutation::from(note_patch(note, &[keys::TAG_IDS]))
            })
            .collect();
        let scrubbed = mutations.len();
        mutations.push(Change::<Tag>::Delete(id).into());

        self.commit(&session, mutations).await?;
        info!("Deleted tag {} from {} notes", id, scrubbed);
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.shared.next_generation();
        for handle in self.session.get_mut().listeners.drain(..) {
            handle.abort();
        }
    }
}
