//! Quill Services
//!
//! External collaborators of the Quill store, each behind a small trait so
//! the store's callers can swap in test doubles:
//!
//! - `ai`: text generation from note content
//! - `video`: video metadata lookup and video-to-note import
//! - `blob`: object storage for attachments, with upload tracking
//!
//! Each module also provides the flow that feeds its results back into a
//! [`quill_core::Store`].

pub mod ai;
pub mod blob;
pub mod video;

pub use ai::{generate_into_note, AiError, GeminiClient, GenerationKind, TextGenerator};
pub use blob::{
    attach_file, purge_note, upload_attachment, BlobError, BlobStore, FileCategory, MemoryBlobStore,
    StoragePath, UploadTracker,
};
pub use video::{import_video, VideoInfo, VideoInfoError, VideoInfoSource, YouTubeClient};
