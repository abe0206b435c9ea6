//! Local cache error handling
//!
//! Provides typed errors for cache operations with descriptive messages
//! and recovery suggestions.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing the local cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Failed to create the cache directory
    #[error("Failed to create cache directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to open the cache database
    #[error("Failed to open cache at '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The connection lock was poisoned by a panicking writer
    #[error("Cache connection is unavailable after a previous failure")]
    Poisoned,

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => CacheError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => CacheError::DiskFull {
                path,
                source: error,
            },
            _ => CacheError::CreateDirectory {
                path,
                source: error,
            },
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::DiskFull { .. } | CacheError::PermissionDenied { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            CacheError::DiskFull { .. } => Some("Free up disk space and try again."),
            CacheError::PermissionDenied { .. } => {
                Some("Check file and directory permissions. You may need to change ownership of the data directory.")
            }
            CacheError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            CacheError::Open { .. } => {
                Some("The cache file may be damaged. Deleting it is safe; it is rebuilt on the next save.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
