//! Logging bootstrap
//!
//! Installs a `tracing` subscriber scoped to the quill crates. Embedders
//! call [`init`] once at startup; later calls are ignored.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Filter directive enabling `level` for the quill crates only
pub fn filter_directive(level: &str) -> String {
    format!("quill_core={},quill_services={}", level, level)
}

/// Initialize logging at `level`
///
/// Appends to `log_file` when given (without ANSI colors), otherwise writes
/// to stderr. Returns `Ok(false)` if a global subscriber was already set.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<bool> {
    let env_filter = EnvFilter::try_new(filter_directive(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let installed = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(file)
                .try_init()
                .is_ok()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
    };

    if installed {
        info!("Logging initialized at level {}", level);
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("debug"), "quill_core=debug,quill_services=debug");
    }

    #[test]
    fn test_init_creates_log_file_and_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs").join("quill.log");

        init("debug", Some(&path)).unwrap();
        assert!(path.exists());

        // A second install never replaces the first
        assert!(!init("info", None).unwrap());
    }
}
