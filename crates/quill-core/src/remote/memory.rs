//! In-process document backend
//!
//! Keeps every collection in memory and delivers listener snapshots
//! synchronously with each write, so a write that returns `Ok` has already
//! been queued to every live listener. Used for offline sessions, demos and
//! tests; failures can be injected to exercise the store's error paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::backend::{
    BackendError, DocumentBackend, DocumentSnapshot, Listener, ListenerRegistration,
    SnapshotEvent, Write,
};
use crate::codec::Document;

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

struct ListenerEntry {
    id: u64,
    collection: String,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
}

#[derive(Default)]
struct Inner {
    collections: Collections,
    listeners: Vec<ListenerEntry>,
    next_listener_id: u64,
    failing_writes: usize,
    fail_listens: bool,
    writes_applied: usize,
}

impl Inner {
    fn take_write_failure(&mut self) -> Result<(), BackendError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(BackendError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    fn snapshot(&self, collection: &str) -> Vec<DocumentSnapshot> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| DocumentSnapshot {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify(&mut self, collection: &str) {
        let snapshot = self.snapshot(collection);
        self.listeners.retain(|listener| {
            listener.collection != collection || listener.tx.send(Ok(snapshot.clone())).is_ok()
        });
    }

    fn commit(&mut self, writes: Vec<Write>) -> Result<(), BackendError> {
        let mut staged = self.collections.clone();
        let mut touched = BTreeSet::new();
        for write in writes {
            let (collection, _) = split_path(write.path())?;
            touched.insert(collection.to_string());
            apply(&mut staged, write)?;
        }

        self.collections = staged;
        self.writes_applied += 1;
        for collection in touched {
            self.notify(&collection);
        }
        Ok(())
    }
}

fn apply(collections: &mut Collections, write: Write) -> Result<(), BackendError> {
    match write {
        Write::Set { path, data, merge } => {
            let (collection, id) = split_path(&path)?;
            let docs = collections.entry(collection.to_string()).or_default();
            match docs.get_mut(id) {
                Some(existing) if merge => existing.merge(data),
                _ => {
                    docs.insert(id.to_string(), data);
                }
            }
        }
        Write::Update { path, fields } => {
            let (collection, id) = split_path(&path)?;
            let existing = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| BackendError::NotFound(path.clone()))?;
            existing.merge(fields);
        }
        Write::Delete { path } => {
            let (collection, id) = split_path(&path)?;
            if let Some(docs) = collections.get_mut(collection) {
                docs.remove(id);
            }
        }
    }
    Ok(())
}

/// Split a document path into its collection path and document id
fn split_path(path: &str) -> Result<(&str, &str), BackendError> {
    match path.rsplit_once('/') {
        Some((collection, id)) if !collection.is_empty() && !id.is_empty() => Ok((collection, id)),
        _ => Err(BackendError::Rejected(format!("invalid document path '{}'", path))),
    }
}

/// Document backend held entirely in memory
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }

    /// Make the next `count` writes (including commits) fail as unavailable
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Make new listeners fail to open
    pub fn set_fail_listens(&self, fail: bool) {
        self.lock().fail_listens = fail;
    }

    /// Number of listeners still registered
    pub fn active_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Number of successful writes and commits so far
    pub fn writes_applied(&self) -> usize {
        self.lock().writes_applied
    }

    /// Read a stored document directly
    pub fn document(&self, path: &str) -> Option<Document> {
        let (collection, id) = split_path(path).ok()?;
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Store a document as-is, bypassing failure injection
    ///
    /// Stands in for writes made by another client, including malformed ones.
    pub fn put_raw(&self, path: &str, data: Document) -> Result<(), BackendError> {
        let (collection, id) = split_path(path)?;
        let mut inner = self.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        inner.notify(collection);
        Ok(())
    }

    /// End every listener with `error`, as a dropped server stream would
    pub fn fail_listeners(&self, error: BackendError) {
        let mut inner = self.lock();
        for listener in inner.listeners.drain(..) {
            let _ = listener.tx.send(Err(error.clone()));
        }
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn set(&self, path: &str, data: Document, merge: bool) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.take_write_failure()?;
        inner.commit(vec![Write::Set {
            path: path.to_string(),
            data,
            merge,
        }])
    }

    async fn update(&self, path: &str, fields: Document) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.take_write_failure()?;
        inner.commit(vec![Write::Update {
            path: path.to_string(),
            fields,
        }])
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, BackendError> {
        split_path(path)?;
        Ok(self.document(path))
    }

    async fn list(
        &self,
        collection_path: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSnapshot>, BackendError> {
        let mut docs = self.lock().snapshot(collection_path);
        if let Some(limit) = limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.take_write_failure()?;
        inner.commit(vec![Write::Delete {
            path: path.to_string(),
        }])
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.take_write_failure()?;
        inner
            .commit(writes)
            .map_err(|e| BackendError::Aborted(e.to_string()))
    }

    async fn listen(&self, collection_path: &str) -> Result<Listener, BackendError> {
        let mut inner = self.lock();
        if inner.fail_listens {
            return Err(BackendError::Unavailable("injected listen failure".to_string()));
        }

        let (tx, events) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(inner.snapshot(collection_path)));

        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push(ListenerEntry {
            id,
            collection: collection_path.to_string(),
            tx,
        });
        debug!("Registered listener {} on {}", id, collection_path);

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let registration = ListenerRegistration::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock_inner(&inner).listeners.retain(|l| l.id != id);
                debug!("Removed listener {}", id);
            }
        });

        Ok(Listener {
            events,
            registration,
        })
    }
}
