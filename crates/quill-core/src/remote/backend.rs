//! Document backend abstraction
//!
//! The minimal contract the remote adapter needs from a managed document
//! database: path-addressed documents grouped in collections, merge-writes,
//! field patches, atomic multi-document commits, and live collection
//! listeners that deliver the full collection on every change.
//!
//! Paths are `/`-separated. A collection path has an odd number of
//! segments (`users/{uid}/notes`), a document path an even number
//! (`users/{uid}/notes/{id}`).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::Document;

/// Transport and server-side failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The backend could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// A patch or read targeted a document that does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The server refused the request for the signed-in user
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The request was malformed
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// A batch was rolled back as a whole
    #[error("Batch aborted: {0}")]
    Aborted(String),
}

impl BackendError {
    /// Whether the same request may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Aborted(_))
    }
}

/// A document as seen in a collection listing or snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Last path segment
    pub id: String,
    pub data: Document,
}

/// One collection snapshot, or the error that ended the listener
pub type SnapshotEvent = Result<Vec<DocumentSnapshot>, BackendError>;

/// One write inside an atomic commit
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create or replace (`merge == false`), or merge into (`merge == true`)
    Set {
        path: String,
        data: Document,
        merge: bool,
    },
    /// Patch fields of an existing document
    Update { path: String, fields: Document },
    /// Remove a document; removing a missing document succeeds
    Delete { path: String },
}

impl Write {
    /// Document path this write targets
    pub fn path(&self) -> &str {
        match self {
            Write::Set { path, .. } | Write::Update { path, .. } | Write::Delete { path } => path,
        }
    }
}

/// Handle that stops a live listener
///
/// Cancelling happens exactly once: either through [`cancel`](Self::cancel)
/// or when the handle is dropped.
pub struct ListenerRegistration {
    on_cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerRegistration {
    pub fn new(on_cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Stop receiving snapshots and release the listener
    pub fn cancel(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.on_cancel.is_some())
            .finish()
    }
}

/// An open live query
///
/// The first event is the collection's state at the time the listener was
/// registered; every later event is the full state after a change.
#[derive(Debug)]
pub struct Listener {
    pub events: mpsc::UnboundedReceiver<SnapshotEvent>,
    pub registration: ListenerRegistration,
}

/// A managed document database
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Write a whole document, replacing or merging into any existing one
    async fn set(&self, path: &str, data: Document, merge: bool) -> Result<(), BackendError>;

    /// Patch fields of an existing document
    ///
    /// Fails with [`BackendError::NotFound`] if the document does not exist.
    async fn update(&self, path: &str, fields: Document) -> Result<(), BackendError>;

    /// Read a single document
    async fn get(&self, path: &str) -> Result<Option<Document>, BackendError>;

    /// List the documents of a collection, in id order
    async fn list(
        &self,
        collection_path: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSnapshot>, BackendError>;

    /// Delete a document
    async fn delete(&self, path: &str) -> Result<(), BackendError>;

    /// Apply every write, or none of them
    async fn commit(&self, writes: Vec<Write>) -> Result<(), BackendError>;

    /// Open a live listener on a collection
    async fn listen(&self, collection_path: &str) -> Result<Listener, BackendError>;
}
