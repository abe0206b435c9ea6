//! Store-facing errors

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::codec::CodecError;
use crate::remote::BackendError;
use crate::storage::CacheError;

/// Errors surfaced by the remote adapter and the synchronized store
#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote operation was attempted with no bound user
    #[error("Not signed in: remote operations need a bound user")]
    Unauthenticated,

    /// A single record failed to decode
    #[error("Invalid document: {0}")]
    InvalidDocument(#[from] CodecError),

    /// The remote backend rejected or failed a request
    #[error("Remote error: {0}")]
    Remote(#[from] BackendError),

    /// The local cache failed to persist
    #[error("Local cache error: {0}")]
    Cache(#[from] CacheError),

    /// A mutation targeted an entity that is not in the store
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    /// Subscribing to the remote collections failed
    #[error("Failed to bind to remote store: {0}")]
    Binding(String),

    /// A bound store's live queries stopped; `refresh` re-subscribes
    #[error("Live query lost: {0}")]
    ListenerLost(String),

    /// A remote write succeeded but no snapshot showed it in time
    #[error("Write not reflected in a snapshot within {0:?}")]
    NotReflected(Duration),
}

impl SyncError {
    /// Check if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Unauthenticated
            | SyncError::Binding(_)
            | SyncError::ListenerLost(_)
            | SyncError::NotReflected(_) => true,
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Cache(e) => e.is_recoverable(),
            SyncError::InvalidDocument(_) | SyncError::NotFound { .. } => false,
        }
    }
}

impl SyncError {
    /// What the user can do about it, when there is something
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::Cache(e) => e.recovery_suggestion(),
            SyncError::ListenerLost(_) => Some("Refresh to reconnect to the remote store."),
            _ => None,
        }
    }
}

/// Result type for store operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(SyncError::Unauthenticated.is_recoverable());
        assert!(SyncError::Remote(BackendError::Unavailable("offline".into())).is_recoverable());
        assert!(!SyncError::Remote(BackendError::PermissionDenied("nope".into())).is_recoverable());
        assert!(!SyncError::NotFound {
            kind: "note",
            id: Uuid::nil()
        }
        .is_recoverable());
    }

    #[test]
    fn test_recovery_suggestion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SyncError = CacheError::from_io(io_err, "/data".into()).into();
        assert!(err.recovery_suggestion().unwrap().contains("permissions"));
        assert!(SyncError::Unauthenticated.recovery_suggestion().is_none());
    }

    #[test]
    fn test_display() {
        let err = SyncError::NotFound {
            kind: "folder",
            id: Uuid::nil(),
        };
        assert_eq!(
            err.to_string(),
            "folder not found: 00000000-0000-0000-0000-000000000000"
        );

        let err: SyncError = CodecError::MissingField("title".into()).into();
        assert!(err.to_string().contains("title"));
    }
}
