//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/quill/config.toml)
//! 3. Environment variables (QUILL_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "QUILL";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (cache database, log file)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// How long a mutation waits to see its own write in a remote snapshot
    #[serde(default = "default_reflection_timeout_ms")]
    pub reflection_timeout_ms: u64,

    /// How long binding waits for the first snapshot of every collection
    #[serde(default = "default_bind_timeout_ms")]
    pub bind_timeout_ms: u64,

    /// Log verbosity for the quill crates
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seed an empty local store with sample folders, tags and a welcome note
    #[serde(default)]
    pub seed_sample_content: bool,

    /// API key for AI text generation
    #[serde(default)]
    pub ai_api_key: Option<String>,

    /// Override for the AI generation endpoint
    #[serde(default)]
    pub ai_endpoint: Option<String>,

    /// API key for video metadata lookups
    #[serde(default)]
    pub video_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            reflection_timeout_ms: default_reflection_timeout_ms(),
            bind_timeout_ms: default_bind_timeout_ms(),
            log_level: default_log_level(),
            seed_sample_content: false,
            ai_api_key: None,
            ai_endpoint: None,
            video_api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (QUILL_DATA_DIR, QUILL_LOG_LEVEL, QUILL_AI_API_KEY, ...)
    /// 2. Config file (~/.config/quill/config.toml or QUILL_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = env_var("LOG_LEVEL") {
            if !val.is_empty() {
                self.log_level = val;
            }
        }

        if let Ok(val) = env_var("REFLECTION_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.reflection_timeout_ms = ms;
            }
        }

        if let Ok(val) = env_var("BIND_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.bind_timeout_ms = ms;
            }
        }

        if let Ok(val) = env_var("SEED_SAMPLE_CONTENT") {
            self.seed_sample_content = val.eq_ignore_ascii_case("true") || val == "1";
        }

        // Empty strings clear optional values
        if let Ok(val) = env_var("AI_API_KEY") {
            self.ai_api_key = non_empty(val);
        }
        if let Ok(val) = env_var("AI_ENDPOINT") {
            self.ai_endpoint = non_empty(val);
        }
        if let Ok(val) = env_var("VIDEO_API_KEY") {
            self.video_api_key = non_empty(val);
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with QUILL_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill")
            .join("config.toml")
    }

    /// Get the path to the local cache database
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    /// Get the path to the log file
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("quill.log")
    }

    pub fn reflection_timeout(&self) -> Duration {
        Duration::from_millis(self.reflection_timeout_ms)
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }
}

fn env_var(suffix: &str) -> Result<String, std::env::VarError> {
    std::env::var(format!("{}_{}", ENV_PREFIX, suffix))
}

fn non_empty(val: String) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quill")
}

fn default_reflection_timeout_ms() -> u64 {
    5_000
}

fn default_bind_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}
