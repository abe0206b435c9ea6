//! Quill Core Library
//!
//! This crate provides the core functionality for Quill, a block-based
//! notes app whose notes, folders and tags stay synchronized between a
//! device-local cache and a per-user remote document database.
//!
//! # Architecture
//!
//! - **Store**: single owner of the in-memory collections
//! - **Remote**: typed, user-scoped access to a document database
//! - **Cache**: SQLite-backed state for offline (unbound) sessions
//!
//! Queries run over the store's in-memory snapshot.
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open(&config, backend)?;
//! store.bind("user-1").await?;
//!
//! let folder = store.create_folder("Work").await?;
//! let note = store.create_note("Standup", Some(folder.id)).await?;
//! store.add_block(note.id, Block::text("Agenda")).await?;
//!
//! let work = store.query(&NoteQuery::new(NoteFilter::Folder(folder.id)));
//! ```
//!
//! # Modules
//!
//! - `store`: Synchronized store (main entry point)
//! - `models`: Notes, blocks, folders and tags
//! - `codec`: Wire documents and entity encoding
//! - `remote`: Remote document backend and adapter
//! - `storage`: Local cache
//! - `query`: Filtering, search and sorting
//! - `validation`: Length and count limits
//! - `config`: Application configuration
//! - `logging`: Tracing subscriber setup

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod query;
pub mod remote;
pub mod storage;
pub mod store;
pub mod validation;

pub use codec::{CodecError, Collection, Document, DocumentCodec, Value};
pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use models::{Attachment, Block, BlockKind, Entity, Folder, Note, Tag, TagColor};
pub use query::{NoteFilter, NoteQuery, SortOrder};
pub use remote::{BackendError, DocumentBackend, MemoryBackend, RemoteStore, WriteBatch};
pub use storage::{CacheError, CacheWrite, LocalCache};
pub use store::{Snapshot, Store, StoreOptions, StoreStatus, SyncMode};
pub use validation::ValidationError;
