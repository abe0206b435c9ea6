//! Remote store adapter
//!
//! Wraps a [`DocumentBackend`] with per-user scoping and typed entities.
//! Every collection lives under `users/{user_id}/{collection}` and every
//! document is keyed by its entity id.
//!
//! The adapter never retries. Transport failures surface as
//! [`SyncError::Remote`]; what to do about them is the caller's decision.
//! Documents that fail to decode are skipped with a warning in bulk reads
//! and subscriptions, so one corrupt record cannot hide the rest.

pub mod backend;
pub mod memory;

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::{Collection, Document, DocumentCodec, Value};
use crate::error::{SyncError, SyncResult};

pub use backend::{
    BackendError, DocumentBackend, DocumentSnapshot, Listener, ListenerRegistration,
    SnapshotEvent, Write,
};
pub use memory::MemoryBackend;

/// Typed, user-scoped access to the remote collections
#[derive(Clone)]
pub struct RemoteStore {
    backend: Arc<dyn DocumentBackend>,
    user_id: Option<String>,
}

impl RemoteStore {
    /// Create an adapter with no bound user
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            user_id: None,
        }
    }

    /// Create an adapter bound to `user_id`
    pub fn for_user(backend: Arc<dyn DocumentBackend>, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            user_id: Some(user_id.into()),
        }
    }

    /// The bound user, if any
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn collection_path(&self, collection: Collection) -> SyncResult<String> {
        let user_id = self.user_id.as_deref().ok_or(SyncError::Unauthenticated)?;
        Ok(format!("users/{}/{}", user_id, collection.name()))
    }

    fn document_path(&self, collection: Collection, id: Uuid) -> SyncResult<String> {
        Ok(format!("{}/{}", self.collection_path(collection)?, id))
    }

    /// Write a new entity under its own id
    pub async fn create<T: DocumentCodec>(&self, entity: &T) -> SyncResult<Uuid> {
        let path = self.document_path(T::COLLECTION, entity.id())?;
        self.backend.set(&path, entity.encode(), false).await?;
        debug!("Created {} {}", T::KIND, entity.id());
        Ok(entity.id())
    }

    /// Read one entity; `None` if no document exists
    pub async fn read<T: DocumentCodec>(&self, id: Uuid) -> SyncResult<Option<T>> {
        let path = self.document_path(T::COLLECTION, id)?;
        match self.backend.get(&path).await? {
            Some(doc) => Ok(Some(T::decode(&doc)?)),
            None => Ok(None),
        }
    }

    /// Read a whole collection, skipping documents that fail to decode
    pub async fn read_all<T: DocumentCodec>(&self, limit: Option<usize>) -> SyncResult<Vec<T>> {
        let path = self.collection_path(T::COLLECTION)?;
        let docs = self.backend.list(&path, limit).await?;
        Ok(decode_snapshot(docs))
    }

    /// Equality query on a single field, evaluated over the full collection
    pub async fn query_where<T: DocumentCodec>(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> SyncResult<Vec<T>> {
        let value = value.into();
        let path = self.collection_path(T::COLLECTION)?;
        let docs = self
            .backend
            .list(&path, None)
            .await?
            .into_iter()
            .filter(|doc| doc.data.get(field) == Some(&value))
            .collect();
        Ok(decode_snapshot(docs))
    }

    /// Merge-write a whole entity; absent optional fields are cleared
    pub async fn update<T: DocumentCodec>(&self, entity: &T) -> SyncResult<()> {
        let path = self.document_path(T::COLLECTION, entity.id())?;
        self.backend.set(&path, entity.encode_for_merge(), true).await?;
        debug!("Updated {} {}", T::KIND, entity.id());
        Ok(())
    }

    /// Patch individual fields of an existing entity
    pub async fn update_fields<T: DocumentCodec>(&self, id: Uuid, fields: Document) -> SyncResult<()> {
        let path = self.document_path(T::COLLECTION, id)?;
        self.backend.update(&path, fields).await?;
        debug!("Patched {} {}", T::KIND, id);
        Ok(())
    }

    /// Hard-delete an entity
    pub async fn delete<T: DocumentCodec>(&self, id: Uuid) -> SyncResult<()> {
        let path = self.document_path(T::COLLECTION, id)?;
        self.backend.delete(&path).await?;
        debug!("Deleted {} {}", T::KIND, id);
        Ok(())
    }

    /// Open a live query on `T`'s collection
    pub async fn subscribe<T: DocumentCodec>(&self) -> SyncResult<Subscription<T>> {
        let path = self.collection_path(T::COLLECTION)?;
        let listener = self.backend.listen(&path).await?;
        debug!("Subscribed to {}", path);
        Ok(Subscription::new(listener))
    }

    /// Apply every operation in `batch` atomically
    pub async fn batch(&self, batch: WriteBatch) -> SyncResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        let writes = batch
            .ops
            .into_iter()
            .map(|op| self.resolve(op))
            .collect::<SyncResult<Vec<_>>>()?;
        self.backend.commit(writes).await?;
        debug!("Committed batch of {} writes", count);
        Ok(())
    }

    fn resolve(&self, op: BatchOp) -> SyncResult<Write> {
        let path = self.document_path(op.collection, op.id)?;
        Ok(match op.kind {
            BatchOpKind::Set(data) => Write::Set {
                path,
                data,
                merge: false,
            },
            BatchOpKind::Merge(data) => Write::Set {
                path,
                data,
                merge: true,
            },
            BatchOpKind::Update(fields) => Write::Update { path, fields },
            BatchOpKind::Delete => Write::Delete { path },
        })
    }
}

fn decode_snapshot<T: DocumentCodec>(docs: Vec<DocumentSnapshot>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| match T::decode(&doc.data) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!("Skipping {} document {}: {}", T::KIND, doc.id, e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
enum BatchOpKind {
    Set(Document),
    Merge(Document),
    Update(Document),
    Delete,
}

#[derive(Debug, Clone)]
struct BatchOp {
    collection: Collection,
    id: Uuid,
    kind: BatchOpKind,
}

/// Writes to commit together through [`RemoteStore::batch`]
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a new entity
    pub fn create<T: DocumentCodec>(&mut self, entity: &T) -> &mut Self {
        self.push::<T>(entity.id(), BatchOpKind::Set(entity.encode()))
    }

    /// Merge-write a whole entity
    pub fn update<T: DocumentCodec>(&mut self, entity: &T) -> &mut Self {
        self.push::<T>(entity.id(), BatchOpKind::Merge(entity.encode_for_merge()))
    }

    /// Patch fields of an existing entity
    pub fn update_fields<T: DocumentCodec>(&mut self, id: Uuid, fields: Document) -> &mut Self {
        self.push::<T>(id, BatchOpKind::Update(fields))
    }

    /// Delete an entity
    pub fn delete<T: DocumentCodec>(&mut self, id: Uuid) -> &mut Self {
        self.push::<T>(id, BatchOpKind::Delete)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn push<T: DocumentCodec>(&mut self, id: Uuid, kind: BatchOpKind) -> &mut Self {
        self.ops.push(BatchOp {
            collection: T::COLLECTION,
            id,
            kind,
        });
        self
    }
}

/// Live snapshots of one collection
///
/// Yields the full decoded collection on every change. Dropping the
/// subscription, or calling [`cancel`](Self::cancel), releases the listener.
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
    registration: ListenerRegistration,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    fn new(listener: Listener) -> Self {
        Self {
            events: listener.events,
            registration: listener.registration,
            _entity: PhantomData,
        }
    }

    /// Stop receiving snapshots
    pub fn cancel(self) {
        self.registration.cancel();
    }
}

impl<T: DocumentCodec> Stream for Subscription<T> {
    type Item = Result<Vec<T>, BackendError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events
            .poll_recv(cx)
            .map(|event| event.map(|snapshot| snapshot.map(decode_snapshot::<T>)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::keys;
    use crate::models::{Folder, Note, Tag, TagColor};
    use futures_util::StreamExt;

    fn remote() -> (Arc<MemoryBackend>, RemoteStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = RemoteStore::for_user(backend.clone(), "user-1");
        (backend, store)
    }

    #[tokio::test]
    async fn test_requires_user() {
        let store = RemoteStore::new(Arc::new(MemoryBackend::new()));
        let note = Note::new("x", "nobody", None);
        assert!(matches!(
            store.create(&note).await,
            Err(SyncError::Unauthenticated)
        ));
        assert!(matches!(
            store.read_all::<Note>(None).await,
            Err(SyncError::Unauthenticated)
        ));
        assert!(matches!(
            store.subscribe::<Folder>().await,
            Err(SyncError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let (backend, store) = remote();
        let folder = Folder::new("Work", "user-1");

        let id = store.create(&folder).await.unwrap();
        assert_eq!(id, folder.id);
        assert!(backend
            .document(&format!("users/user-1/folders/{}", folder.id))
            .is_some());
        assert_eq!(store.read::<Folder>(id).await.unwrap(), Some(folder.clone()));

        store.delete::<Folder>(id).await.unwrap();
        assert_eq!(store.read::<Folder>(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_all_skips_corrupt_documents() {
        let (backend, store) = remote();
        let good = Tag::new("Urgent", "user-1", TagColor::default());
        store.create(&good).await.unwrap();
        backend
            .put_raw(
                "users/user-1/tags/broken",
                Document::new().with(keys::NAME, "no id"),
            )
            .unwrap();

        let tags = store.read_all::<Tag>(None).await.unwrap();
        assert_eq!(tags, vec![good]);
    }

    #[tokio::test]
    async fn test_update_clears_removed_optionals() {
        let (backend, store) = remote();
        let folder = Uuid::new_v4();
        let mut note = Note::new("Filed", "user-1", Some(folder));
        store.create(&note).await.unwrap();

        note.set_folder(None);
        store.update(&note).await.unwrap();

        let raw = backend
            .document(&format!("users/user-1/notes/{}", note.id))
            .unwrap();
        assert_eq!(raw.get(keys::FOLDER_ID), Some(&Value::Null));
        assert_eq!(store.read::<Note>(note.id).await.unwrap(), Some(note));
    }

    #[tokio::test]
    async fn test_update_fields() {
        let (_, store) = remote();
        let note = Note::new("Pin", "user-1", None);
        store.create(&note).await.unwrap();

        let fields = Document::new().with(keys::IS_PINNED, true);
        store.update_fields::<Note>(note.id, fields.clone()).await.unwrap();
        let stored = store.read::<Note>(note.id).await.unwrap().unwrap();
        assert!(stored.is_pinned);
        assert_eq!(stored.title, "Pin");

        let missing = store.update_fields::<Note>(Uuid::new_v4(), fields).await;
        assert!(matches!(
            missing,
            Err(SyncError::Remote(BackendError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_query_where() {
        let (_, store) = remote();
        let mut pinned = Note::new("Pinned", "user-1", None);
        pinned.is_pinned = true;
        store.create(&pinned).await.unwrap();
        store.create(&Note::new("Plain", "user-1", None)).await.unwrap();

        let found = store.query_where::<Note>(keys::IS_PINNED, true).await.unwrap();
        assert_eq!(found, vec![pinned]);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let (backend, store) = remote();
        let folder = Folder::new("Doomed", "user-1");
        let note = Note::new("Inside", "user-1", Some(folder.id));
        store.create(&folder).await.unwrap();
        store.create(&note).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .update_fields::<Note>(note.id, Document::new().with(keys::FOLDER_ID, Value::Null))
            .delete::<Folder>(folder.id);

        backend.fail_next_writes(1);
        assert!(store.batch(batch.clone()).await.is_err());
        assert!(store.read::<Folder>(folder.id).await.unwrap().is_some());

        store.batch(batch).await.unwrap();
        assert!(store.read::<Folder>(folder.id).await.unwrap().is_none());
        let note = store.read::<Note>(note.id).await.unwrap().unwrap();
        assert!(note.folder_id.is_none());
    }

    #[tokio::test]
    async fn test_subscription_delivers_snapshots() {
        let (backend, store) = remote();
        let mut sub = store.subscribe::<Folder>().await.unwrap();
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        let folder = Folder::new("Live", "user-1");
        store.create(&folder).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), vec![folder]);

        // Corrupt documents do not break the stream
        backend
            .put_raw("users/user-1/folders/bad", Document::new())
            .unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 1);

        assert_eq!(backend.active_listeners(), 1);
        sub.cancel();
        assert_eq!(backend.active_listeners(), 0);
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let backend = Arc::new(MemoryBackend::new());
        let alice = RemoteStore::for_user(backend.clone(), "alice");
        let bob = RemoteStore::for_user(backend.clone(), "bob");

        alice.create(&Folder::new("Mine", "alice")).await.unwrap();
        assert_eq!(alice.read_all::<Folder>(None).await.unwrap().len(), 1);
        assert!(bob.read_all::<Folder>(None).await.unwrap().is_empty());
    }
}
