//! Storage layer
//!
//! Device-local persistence for the three collections.
//!
//! ## Architecture
//!
//! - **SQLite**: a single key/value table, one entry per collection
//! - **JSON**: entries hold wire documents in their JSON form
//!
//! The cache is the source of truth only while the store is unbound; once
//! a user is bound the remote database takes over.

pub mod cache;
pub mod error;
pub mod schema;

pub use cache::{CacheWrite, LocalCache};
pub use error::{CacheError, CacheResult};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
