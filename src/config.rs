//! Configuration file handling for `config.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::theme::{ColorMap, ColorMapError};
use crate::util::write_atomic;

/// Sending this as the user agent disables the `User-Agent` header
pub const USER_AGENT_DISABLED: &str = "-";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_BATCH_SIZE: usize = 100;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error(transparent)]
    InvalidColorMap(#[from] ColorMapError),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// When to emit ANSI colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Styling {
    /// Color only when stdout is a terminal and `NO_COLOR` is unset
    #[default]
    Auto,
    Always,
    Never,
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Value of the `User-Agent` header. `"-"` sends no header at all.
    pub user_agent: String,

    /// Per-request timeout for feed fetches, in seconds.
    pub timeout_seconds: u64,

    /// Maximum number of feeds fetched concurrently.
    pub batch_size: usize,

    /// Drop items whose publish date is after the current time.
    pub hide_future_items: bool,

    /// Print a run summary after the item list.
    pub summary: bool,

    pub styling: Styling,

    /// Palette index overrides.
    pub color_map: ColorMap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            batch_size: DEFAULT_BATCH_SIZE,
            hide_future_items: false,
            summary: false,
            styling: Styling::Auto,
            color_map: ColorMap::default(),
        }
    }
}

pub fn default_user_agent() -> String {
    format!(
        "tidings/{} (+https://github.com/dhofheinz/tidings)",
        env!("CARGO_PKG_VERSION")
    )
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "user_agent",
        "timeout_seconds",
        "batch_size",
        "hide_future_items",
        "summary",
        "styling",
        "color_map",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero `batch_size` / `timeout_seconds` fall back to their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let mut config: Config = toml::from_str(&content)?;
        config.normalize();
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the configuration back, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    fn normalize(&mut self) {
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.timeout_seconds == 0 {
            self.timeout_seconds = DEFAULT_TIMEOUT_SECONDS;
        }
    }

    /// `None` when the header should not be sent.
    pub fn user_agent(&self) -> Option<&str> {
        if self.user_agent == USER_AGENT_DISABLED || self.user_agent.is_empty() {
            None
        } else {
            Some(&self.user_agent)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ============================================================================
// Tests
// ============================================================================
