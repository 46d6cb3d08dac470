//! TOML configuration for `pcn-watch`.
//!
//! ```toml
//! [connection]
//! events = ["fork", "exec", "exit"]   # empty or absent: every event
//! handshake_timeout_ms = 5000
//! read_timeout_ms = 1000
//! reconnect_delay_ms = 2000
//!
//! [output]
//! format = "json"                     # "text" or "json"
//! log_level = "info"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = ...)]`, so a partial file (or no
//! file at all) yields a complete configuration.  Command-line flags and
//! `PCN_*` environment variables are applied on top in `main.rs`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pcn_client::ConnectionOptions;
use pcn_core::EventType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::output::OutputFormat;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Subscription and timing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Event types to subscribe to.  Empty means every event, unfiltered.
    #[serde(default)]
    pub events: Vec<EventType>,
    /// How long to wait for the kernel to acknowledge the subscription.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Upper bound on one blocking read.  Also bounds how long shutdown
    /// waits for the reader thread.  `0` blocks forever.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Pause between a lost connection and the next attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

/// Presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_handshake_timeout_ms() -> u64 {
    5000
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            log_level: default_log_level(),
        }
    }
}

impl ConnectionConfig {
    /// Builds the library connection options.  A `0` timeout means no bound.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            handshake_timeout: millis(self.handshake_timeout_ms),
            read_timeout: millis(self.read_timeout_ms),
            event_filter: (!self.events.is_empty()).then(|| self.events.clone()),
            unsubscribe_on_close: true,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads the configuration at `path`.
///
/// `None`, or a path that does not exist, yields [`WatchConfig::default`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<WatchConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(WatchConfig::default());
    };
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WatchConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parses configuration from TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed or names an
/// unknown event type or output format.
pub fn parse_config(content: &str) -> Result<WatchConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
