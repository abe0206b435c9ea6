//! Store state: the in-memory snapshot, sync status, and pending changes

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

use crate::codec::{Collection, Document, DocumentCodec};
use crate::error::{SyncError, SyncResult};
use crate::models::{Folder, Note, Tag};
use crate::remote::{RemoteStore, WriteBatch};

/// The three collections at one point in time
///
/// Cloning is cheap; each collection is shared until replaced.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub notes: Arc<Vec<Note>>,
    pub folders: Arc<Vec<Folder>>,
    pub tags: Arc<Vec<Tag>>,
}

impl Snapshot {
    pub fn note(&self, id: Uuid) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn folder(&self, id: Uuid) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == id)
    }

    pub fn tag(&self, id: Uuid) -> Option<&Tag> {
        self.tags.iter().find(|t| t.id == id)
    }

    /// Whether all three collections are empty
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.folders.is_empty() && self.tags.is_empty()
    }
}

/// Where the store reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// No user; the local cache is the source of truth
    Unbound,
    /// Waiting for the first remote snapshots
    Binding { user_id: String },
    /// Remote snapshots are authoritative
    Bound { user_id: String },
}

impl SyncMode {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            SyncMode::Unbound => None,
            SyncMode::Binding { user_id } | SyncMode::Bound { user_id } => Some(user_id),
        }
    }
}

/// Observable store status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub mode: SyncMode,
    pub is_loading: bool,
    /// Message of the most recent failure, until cleared
    pub last_error: Option<String>,
}

impl Default for StoreStatus {
    fn default() -> Self {
        Self {
            mode: SyncMode::Unbound,
            is_loading: false,
            last_error: None,
        }
    }
}

/// A collection held in the snapshot
pub(crate) trait Collected: DocumentCodec {
    fn items(snapshot: &Snapshot) -> &Arc<Vec<Self>>;
    fn items_mut(snapshot: &mut Snapshot) -> &mut Arc<Vec<Self>>;

    fn find(snapshot: &Snapshot, id: Uuid) -> Option<&Self> {
        Self::items(snapshot).iter().find(|item| item.id() == id)
    }
}

impl Collected for Note {
    fn items(snapshot: &Snapshot) -> &Arc<Vec<Self>> {
        &snapshot.notes
    }

    fn items_mut(snapshot: &mut Snapshot) -> &mut Arc<Vec<Self>> {
        &mut snapshot.notes
    }
}

impl Collected for Folder {
    fn items(snapshot: &Snapshot) -> &Arc<Vec<Self>> {
        &snapshot.folders
    }

    fn items_mut(snapshot: &mut Snapshot) -> &mut Arc<Vec<Self>> {
        &mut snapshot.folders
    }
}

impl Collected for Tag {
    fn items(snapshot: &Snapshot) -> &Arc<Vec<Self>> {
        &snapshot.tags
    }

    fn items_mut(snapshot: &mut Snapshot) -> &mut Arc<Vec<Self>> {
        &mut snapshot.tags
    }
}

/// One computed change to a single entity
#[derive(Debug, Clone)]
pub(crate) enum Change<T> {
    Create(T),
    Update(T),
    /// `entity` is the full new value; `fields` is what goes over the wire
    Patch { entity: T, fields: Document },
    Delete(Uuid),
}

impl<T: Collected> Change<T> {
    fn entity(&self) -> Option<&T> {
        match self {
            Change::Create(entity) | Change::Update(entity) | Change::Patch { entity, .. } => {
                Some(entity)
            }
            Change::Delete(_) => None,
        }
    }

    fn id(&self) -> Uuid {
        match self {
            Change::Delete(id) => *id,
            Change::Create(entity) | Change::Update(entity) | Change::Patch { entity, .. } => {
                entity.id()
            }
        }
    }

    /// Apply directly to the in-memory collection
    fn apply(&self, snapshot: &mut Snapshot) {
        let id = self.id();
        let items = Arc::make_mut(T::items_mut(snapshot));
        match self.entity() {
            Some(entity) => match items.iter_mut().find(|item| item.id() == id) {
                Some(existing) => *existing = entity.clone(),
                None => items.push(entity.clone()),
            },
            None => items.retain(|item| item.id() != id),
        }
    }

    /// Whether a remote snapshot already contains this change
    fn is_reflected(&self, snapshot: &Snapshot) -> bool {
        let current = T::find(snapshot, self.id());
        match (self.entity(), current) {
            (Some(expected), Some(current)) => current.updated_at() >= expected.updated_at(),
            (Some(_), None) => false,
            (None, current) => current.is_none(),
        }
    }

    async fn send(&self, remote: &RemoteStore) -> SyncResult<()> {
        match self {
            Change::Create(entity) => remote.create(entity).await.map(|_| ()),
            Change::Update(entity) => remote.update(entity).await,
            Change::Patch { entity, fields } => {
                remote.update_fields::<T>(entity.id(), fields.clone()).await
            }
            Change::Delete(id) => remote.delete::<T>(*id).await,
        }
    }

    fn add_to(&self, batch: &mut WriteBatch) {
        match self {
            Change::Create(entity) => batch.create(entity),
            Change::Update(entity) => batch.update(entity),
            Change::Patch { entity, fields } => batch.update_fields::<T>(entity.id(), fields.clone()),
            Change::Delete(id) => batch.delete::<T>(*id),
        };
    }
}

/// A change to any collection
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    Note(Change<Note>),
    Folder(Change<Folder>),
    Tag(Change<Tag>),
}

impl From<Change<Note>> for Mutation {
    fn from(change: Change<Note>) -> Self {
        Mutation::Note(change)
    }
}

impl From<Change<Folder>> for Mutation {
    fn from(change: Change<Folder>) -> Self {
        Mutation::Folder(change)
    }
}

impl From<Change<Tag>> for Mutation {
    fn from(change: Change<Tag>) -> Self {
        Mutation::Tag(change)
    }
}

impl Mutation {
    pub(crate) fn collection(&self) -> Collection {
        match self {
            Mutation::Note(_) => Collection::Notes,
            Mutation::Folder(_) => Collection::Folders,
            Mutation::Tag(_) => Collection::Tags,
        }
    }

    pub(crate) fn apply(&self, snapshot: &mut Snapshot) {
        match self {
            Mutation::Note(c) => c.apply(snapshot),
            Mutation::Folder(c) => c.apply(snapshot),
            Mutation::Tag(c) => c.apply(snapshot),
        }
    }

    pub(crate) fn is_reflected(&self, snapshot: &Snapshot) -> bool {
        match self {
            Mutation::Note(c) => c.is_reflected(snapshot),
            Mutation::Folder(c) => c.is_reflected(snapshot),
            Mutation::Tag(c) => c.is_reflected(snapshot),
        }
    }

    pub(crate) async fn send(&self, remote: &RemoteStore) -> SyncResult<()> {
        match self {
            Mutation::Note(c) => c.send(remote).await,
            Mutation::Folder(c) => c.send(remote).await,
            Mutation::Tag(c) => c.send(remote).await,
        }
    }

    pub(crate) fn add_to(&self, batch: &mut WriteBatch) {
        match self {
            Mutation::Note(c) => c.add_to(batch),
            Mutation::Folder(c) => c.add_to(batch),
            Mutation::Tag(c) => c.add_to(batch),
        }
    }
}

/// State shared between the store and its listener tasks
pub(crate) struct Shared {
    pub(crate) snapshot: watch::Sender<Snapshot>,
    pub(crate) status: watch::Sender<StoreStatus>,
    /// Whether every listener of the current binding is still running
    pub(crate) live: watch::Sender<bool>,
    /// Bumped whenever listeners are replaced; stale listeners stop applying
    generation: AtomicU64,
}

impl Shared {
    pub(crate) fn new(initial: Snapshot) -> Self {
        let (snapshot, _) = watch::channel(initial);
        let (status, _) = watch::channel(StoreStatus::default());
        let (live, _) = watch::channel(false);
        Self {
            snapshot,
            status,
            live,
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Replace one collection with a listener snapshot
    ///
    /// Ignored if `generation` is no longer current. The check happens under
    /// the snapshot lock, so nothing lands after a teardown.
    pub(crate) fn apply_snapshot<T: Collected>(&self, generation: u64, items: Vec<T>) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if !self.is_current(generation) {
                return false;
            }
            *T::items_mut(snapshot) = Arc::new(items);
            true
        })
    }

    /// Record a listener failure, unless the listener is stale
    ///
    /// The binding stops being live, so bound writes fail fast until the
    /// store is refreshed.
    pub(crate) fn listener_failed(&self, generation: u64, error: SyncError) {
        if self.is_current(generation) {
            warn!("Live query failed: {}", error);
            self.live.send_replace(false);
            self.record_error(&error);
        }
    }

    /// A current listener's stream ended
    pub(crate) fn listener_ended(&self, generation: u64) {
        if self.is_current(generation) && self.live.send_replace(false) {
            warn!("Live query closed; writes are refused until refresh");
        }
    }

    pub(crate) fn record_error(&self, error: &SyncError) {
        let message = match error.recovery_suggestion() {
            Some(hint) => format!("{} {}", error, hint),
            None => error.to_string(),
        };
        self.status.send_modify(|status| status.last_error = Some(message));
    }

    pub(crate) fn clear_error(&self) {
        self.status.send_if_modified(|status| status.last_error.take().is_some());
    }

    pub(crate) fn set_mode(&self, mode: SyncMode, is_loading: bool) {
        self.status.send_modify(|status| {
            status.mode = mode;
            status.is_loading = is_loading;
        });
    }
}
