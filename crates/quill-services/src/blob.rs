//! Object storage for note attachments
//!
//! Files live under `users/{user_id}/notes/{note_id}/{category}/{file_name}`.
//! Uploads report progress through an [`UploadTracker`]; cancelling an
//! upload removes its entry, and stores stop at the next chunk.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use quill_core::{Attachment, Block, BlockKind, Store, SyncError};

const MB: u64 = 1024 * 1024;

/// MIME types accepted for upload
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
    "text/markdown",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "audio/mpeg",
    "audio/wav",
    "audio/m4a",
    "video/mp4",
    "video/quicktime",
];

/// Object storage errors
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Not signed in: uploads need a bound user")]
    NotAuthenticated,

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File is too large: {size} bytes (maximum {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Upload cancelled: {0}")]
    Cancelled(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Store(#[from] SyncError),
}

/// Whether `mime_type` may be uploaded
pub fn is_supported(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

/// Size limit in bytes for `mime_type`
pub fn max_file_size(mime_type: &str) -> u64 {
    if mime_type.starts_with("image/") {
        10 * MB
    } else if mime_type == "application/pdf" {
        50 * MB
    } else if mime_type.starts_with("video/") {
        100 * MB
    } else {
        25 * MB
    }
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`, forcing an extension
pub fn sanitize_file_name(file_name: &str) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.contains('.') {
        sanitized
    } else {
        format!("{}.file", sanitized)
    }
}

/// Top-level folder of a note's attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Images,
    Documents,
    Files,
}

impl FileCategory {
    pub fn for_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            FileCategory::Images
        } else if mime_type == "application/pdf" {
            FileCategory::Documents
        } else {
            FileCategory::Files
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Images => "images",
            FileCategory::Documents => "documents",
            FileCategory::Files => "files",
        }
    }
}

/// Location of one stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    pub user_id: String,
    pub note_id: Uuid,
    pub category: FileCategory,
    /// Already sanitized
    pub file_name: String,
}

impl StoragePath {
    pub fn new(
        user_id: impl Into<String>,
        note_id: Uuid,
        category: FileCategory,
        file_name: &str,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            note_id,
            category,
            file_name: sanitize_file_name(file_name),
        }
    }

    /// Folder holding every file of the note
    pub fn note_prefix(user_id: &str, note_id: Uuid) -> String {
        format!("users/{}/notes/{}/", user_id, note_id)
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}/{}",
            Self::note_prefix(&self.user_id, self.note_id),
            self.category.as_str(),
            self.file_name
        )
    }
}

/// Progress of in-flight uploads, keyed by storage path
#[derive(Debug, Clone, Default)]
pub struct UploadTracker {
    progress: Arc<Mutex<HashMap<String, f64>>>,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, f64>> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self, path: &str) {
        self.lock().insert(path.to_string(), 0.0);
    }

    /// Record progress; returns false if the upload was cancelled
    pub fn update(&self, path: &str, fraction: f64) -> bool {
        match self.lock().get_mut(path) {
            Some(progress) => {
                *progress = fraction.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }

    /// Progress in `[0, 1]`; 0 for unknown paths
    pub fn progress(&self, path: &str) -> f64 {
        self.lock().get(path).copied().unwrap_or(0.0)
    }

    pub fn is_active(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    /// Cancel an upload by dropping its entry
    pub fn cancel(&self, path: &str) {
        if self.lock().remove(path).is_some() {
            debug!("Cancelled upload {}", path);
        }
    }

    pub(crate) fn finish(&self, path: &str) {
        self.lock().remove(path);
    }

    pub fn active_uploads(&self) -> usize {
        self.lock().len()
    }
}

/// A managed object store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` and return its download URL
    async fn upload(
        &self,
        path: &StoragePath,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
        tracker: &UploadTracker,
    ) -> Result<String, BlobError>;

    async fn download(&self, url: &str) -> Result<Vec<u8>, BlobError>;

    async fn delete(&self, url: &str) -> Result<(), BlobError>;

    /// Delete every file stored for a note; returns how many were removed
    async fn delete_all_for_note(&self, user_id: &str, note_id: Uuid) -> Result<usize, BlobError>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
    metadata: HashMap<String, String>,
}

/// Object store held in memory, uploading in fixed-size chunks
#[derive(Debug, Clone)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    chunk_size: usize,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self {
            objects: Arc::default(),
            chunk_size: 64 * 1024,
        }
    }
}

impl MemoryBlobStore {
    pub const URL_SCHEME: &'static str = "memory://";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(url: &str) -> Result<&str, BlobError> {
        url.strip_prefix(Self::URL_SCHEME)
            .ok_or_else(|| BlobError::NotFound(url.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Content type and custom metadata of a stored object
    pub fn metadata(&self, url: &str) -> Option<(String, HashMap<String, String>)> {
        let key = Self::key(url).ok()?;
        self.lock()
            .get(key)
            .map(|o| (o.content_type.clone(), o.metadata.clone()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        path: &StoragePath,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
        tracker: &UploadTracker,
    ) -> Result<String, BlobError> {
        let key = path.to_string();
        let total = bytes.len().max(1);
        let mut sent = 0;

        for chunk in bytes.chunks(self.chunk_size) {
            sent += chunk.len();
            if !tracker.update(&key, sent as f64 / total as f64) {
                return Err(BlobError::Cancelled(key));
            }
            tokio::task::yield_now().await;
        }
        if !tracker.is_active(&key) {
            return Err(BlobError::Cancelled(key));
        }

        self.lock().insert(
            key.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                metadata,
            },
        );
        Ok(format!("{}{}", Self::URL_SCHEME, key))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, BlobError> {
        let key = Self::key(url)?;
        self.lock()
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| BlobError::NotFound(url.to_string()))
    }

    async fn delete(&self, url: &str) -> Result<(), BlobError> {
        let key = Self::key(url)?;
        self.lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(url.to_string()))
    }

    async fn delete_all_for_note(&self, user_id: &str, note_id: Uuid) -> Result<usize, BlobError> {
        let prefix = StoragePath::note_prefix(user_id, note_id);
        let mut objects = self.lock();
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(&prefix));
        Ok(before - objects.len())
    }
}

/// Validate and upload one file for a note
pub async fn upload_attachment(
    blobs: &dyn BlobStore,
    tracker: &UploadTracker,
    user_id: &str,
    note_id: Uuid,
    file_name: &str,
    mime_type: &str,
    bytes: Vec<u8>,
) -> Result<Attachment, BlobError> {
    if !is_supported(mime_type) {
        return Err(BlobError::UnsupportedType(mime_type.to_string()));
    }
    let size = bytes.len() as u64;
    let max = max_file_size(mime_type);
    if size > max {
        return Err(BlobError::TooLarge { size, max });
    }

    let category = FileCategory::for_mime(mime_type);
    let path = StoragePath::new(user_id, note_id, category, file_name);
    let key = path.to_string();

    let metadata = HashMap::from([
        ("originalFileName".to_string(), path.file_name.clone()),
        (
            "uploadedAt".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (
            "type".to_string(),
            match category {
                FileCategory::Images => "note_image",
                FileCategory::Documents => "note_document",
                FileCategory::Files => "note_file",
            }
            .to_string(),
        ),
    ]);

    tracker.start(&key);
    let result = blobs.upload(&path, bytes, mime_type, metadata, tracker).await;
    tracker.finish(&key);

    let url = result?;
    info!("Uploaded {} ({} bytes)", key, size);
    Ok(Attachment {
        url: Some(url),
        file_name: Some(file_name.to_string()),
        mime_type: Some(mime_type.to_string()),
    })
}

fn attachment_block(attachment: Attachment, mime_type: &str) -> Block {
    let kind = if mime_type.starts_with("image/") {
        BlockKind::Image(attachment)
    } else if mime_type == "application/pdf" {
        BlockKind::EmbeddedDocument {
            attachment,
            page: None,
        }
    } else if mime_type.starts_with("audio/") {
        BlockKind::Audio(attachment)
    } else if mime_type.starts_with("video/") {
        BlockKind::Video(attachment)
    } else {
        BlockKind::Link(attachment)
    };
    Block::new(kind, "")
}

/// Upload a file and append it to a note as a media block
///
/// Needs a bound user, since paths are namespaced by user id.
pub async fn attach_file(
    store: &Store,
    blobs: &dyn BlobStore,
    tracker: &UploadTracker,
    note_id: Uuid,
    file_name: &str,
    mime_type: &str,
    bytes: Vec<u8>,
) -> Result<Uuid, BlobError> {
    let user_id = store
        .mode()
        .user_id()
        .map(str::to_string)
        .ok_or(BlobError::NotAuthenticated)?;
    if store.note(note_id).is_none() {
        return Err(SyncError::NotFound {
            kind: "note",
            id: note_id,
        }
        .into());
    }

    let attachment = upload_attachment(
        blobs, tracker, &user_id, note_id, file_name, mime_type, bytes,
    )
    .await?;
    let block_id = store
        .add_block(note_id, attachment_block(attachment, mime_type))
        .await?;
    Ok(block_id)
}

/// Permanently delete a note and every file uploaded for it
///
/// Returns how many files were removed. Unbound stores have no uploads.
pub async fn purge_note(store: &Store, blobs: &dyn BlobStore, note_id: Uuid) -> Result<usize, BlobError> {
    let user_id = store.mode().user_id().map(str::to_string);
    store.permanently_delete_note(note_id).await?;

    let removed = match user_id {
        Some(user_id) => blobs.delete_all_for_note(&user_id, note_id).await?,
        None => 0,
    };
    if removed > 0 {
        info!("Removed {} stored files of note {}", removed, note_id);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{LocalCache, MemoryBackend, StoreOptions};

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("my report (final).pdf"), "my_report__final_.pdf");
        assert_eq!(sanitize_file_name("notes"), "notes.file");
        assert_eq!(sanitize_file_name("résumé.doc"), "r_sum_.doc");
    }

    #[test]
    fn test_storage_path() {
        let note_id = Uuid::nil();
        let path = StoragePath::new("u1", note_id, FileCategory::Documents, "a b.pdf");
        assert_eq!(
            path.to_string(),
            format!("users/u1/notes/{}/documents/a_b.pdf", note_id)
        );
        assert!(path
            .to_string()
            .starts_with(&StoragePath::note_prefix("u1", note_id)));
    }

    #[test]
    fn test_limits_and_categories() {
        assert_eq!(max_file_size("image/png"), 10 * MB);
        assert_eq!(max_file_size("application/pdf"), 50 * MB);
        assert_eq!(max_file_size("video/mp4"), 100 * MB);
        assert_eq!(max_file_size("text/plain"), 25 * MB);

        assert!(is_supported("audio/mpeg"));
        assert!(!is_supported("application/x-msdownload"));

        assert_eq!(FileCategory::for_mime("image/gif"), FileCategory::Images);
        assert_eq!(FileCategory::for_mime("application/pdf"), FileCategory::Documents);
        assert_eq!(FileCategory::for_mime("audio/wav"), FileCategory::Files);
    }

    #[test]
    fn test_tracker_cancel_removes_entry() {
        let tracker = UploadTracker::new();
        tracker.start("p");
        assert!(tracker.update("p", 0.5));
        assert_eq!(tracker.progress("p"), 0.5);

        tracker.cancel("p");
        assert!(!tracker.is_active("p"));
        assert_eq!(tracker.progress("p"), 0.0);
        assert!(!tracker.update("p", 0.9));
    }

    #[tokio::test]
    async fn test_upload_download_delete() {
        let blobs = MemoryBlobStore::new();
        let tracker = UploadTracker::new();
        let note_id = Uuid::new_v4();

        let attachment = upload_attachment(
            &blobs,
            &tracker,
            "u1",
            note_id,
            "scan.pdf",
            "application/pdf",
            b"%PDF-1.7".to_vec(),
        )
        .await
        .unwrap();

        let url = attachment.url.clone().unwrap();
        assert!(url.contains("/documents/scan.pdf"));
        assert_eq!(tracker.active_uploads(), 0);
        assert_eq!(blobs.download(&url).await.unwrap(), b"%PDF-1.7");

        let (content_type, metadata) = blobs.metadata(&url).unwrap();
        assert_eq!(content_type, "application/pdf");
        assert_eq!(metadata.get("type").map(String::as_str), Some("note_document"));

        blobs.delete(&url).await.unwrap();
        assert!(matches!(blobs.download(&url).await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_upload_rejects_before_sending() {
        let blobs = MemoryBlobStore::new();
        let tracker = UploadTracker::new();

        let too_big = vec![0u8; (10 * MB + 1) as usize];
        let err = upload_attachment(&blobs, &tracker, "u1", Uuid::new_v4(), "big.png", "image/png", too_big)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::TooLarge { .. }));

        let err = upload_attachment(&blobs, &tracker, "u1", Uuid::new_v4(), "x.exe", "application/x-msdownload", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::UnsupportedType(_)));
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_upload_is_not_stored() {
        let blobs = MemoryBlobStore::new().with_chunk_size(4);
        let tracker = UploadTracker::new();
        let path = StoragePath::new("u1", Uuid::new_v4(), FileCategory::Files, "a.txt");
        let key = path.to_string();

        tracker.start(&key);
        let upload = blobs.upload(&path, vec![7u8; 64], "text/plain", HashMap::new(), &tracker);
        tracker.cancel(&key);

        assert!(matches!(upload.await, Err(BlobError::Cancelled(_))));
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn test_attach_file_requires_bound_user() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Store::new(
            backend,
            LocalCache::open_in_memory().unwrap(),
            StoreOptions::default(),
        )
        .unwrap();
        let note = store.create_note("Photos", None).await.unwrap();
        let blobs = MemoryBlobStore::new();
        let tracker = UploadTracker::new();

        let err = attach_file(&store, &blobs, &tracker, note.id, "cat.jpg", "image/jpeg", vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NotAuthenticated));

        store.bind("u1").await.unwrap();
        let note = store.create_note("Photos", None).await.unwrap();
        let block_id = attach_file(&store, &blobs, &tracker, note.id, "cat.jpg", "image/jpeg", vec![1, 2, 3])
            .await
            .unwrap();

        let stored = store.note(note.id).unwrap();
        match &stored.block(block_id).unwrap().kind {
            BlockKind::Image(attachment) => {
                assert_eq!(attachment.file_name.as_deref(), Some("cat.jpg"));
                assert!(attachment.url.as_deref().unwrap().contains("users/u1/notes/"));
            }
            other => panic!("unexpected block kind {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_all_for_note_keeps_other_notes() {
        let blobs = MemoryBlobStore::new();
        let tracker = UploadTracker::new();
        let kept = Uuid::new_v4();
        let purged = Uuid::new_v4();
        for (note_id, name) in [(purged, "a.png"), (purged, "b.pdf"), (kept, "c.png")] {
            let mime = if name.ends_with(".pdf") { "application/pdf" } else { "image/png" };
            upload_attachment(&blobs, &tracker, "u1", note_id, name, mime, vec![0; 8])
                .await
                .unwrap();
        }

        assert_eq!(blobs.delete_all_for_note("u1", purged).await.unwrap(), 2);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs.delete_all_for_note("u2", kept).await.unwrap(), 0);
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_note_removes_uploads() {
        let store = Store::new(
            Arc::new(MemoryBackend::new()),
            LocalCache::open_in_memory().unwrap(),
            StoreOptions::default(),
        )
        .unwrap();
        store.bind("u1").await.unwrap();
        let note = store.create_note("Scans", None).await.unwrap();
        let blobs = MemoryBlobStore::new();
        let tracker = UploadTracker::new();
        attach_file(&store, &blobs, &tracker, note.id, "page.pdf", "application/pdf", vec![7; 16])
            .await
            .unwrap();
        assert_eq!(blobs.len(), 1);

        assert_eq!(purge_note(&store, &blobs, note.id).await.unwrap(), 1);
        assert!(store.note(note.id).is_none());
        assert!(blobs.is_empty());
    }
}
