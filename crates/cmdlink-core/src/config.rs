//! Client configuration.
//!
//! Loaded from `<config_dir>/cmdlink/client.toml`; every key has a default,
//! so a partial or missing file is fine.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{alias::DEFAULT_MAX_ALIASES, history::DEFAULT_MAX_ENTRIES};

/// Directory name under the platform config dir.
pub const APP_DIR: &str = "cmdlink";

/// Default command server port.
pub const DEFAULT_PORT: u16 = 50051;

/// Default multicast group for discovery.
pub const DEFAULT_MULTICAST_GROUP: &str = "239.0.0.1:5000";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub history: HistoryConfig,
    pub aliases: AliasConfig,
    pub timeouts: TimeoutConfig,
}

/// Server connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server to connect to at startup, if any.
    pub address: Option<String>,
    pub port: u16,
    pub use_tls: bool,
    /// Run discovery at startup instead of connecting to `address`.
    pub auto_discover: bool,
    pub discover_timeout_secs: u64,
    pub discovery_token: String,
    pub multicast_group: String,
    /// Keep-alive cadence once logged in.
    pub keep_alive_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: DEFAULT_PORT,
            use_tls: false,
            auto_discover: false,
            discover_timeout_secs: 5,
            discovery_token: "CMDLINK_DISCOVERY".to_string(),
            multicast_group: DEFAULT_MULTICAST_GROUP.to_string(),
            keep_alive_interval_secs: 60,
        }
    }
}

/// Command history settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
    /// Persist history on shutdown.
    pub save: bool,
    /// Override of the history file location.
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            save: true,
            path: None,
        }
    }
}

/// Local alias settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    /// Expand local aliases before dispatch.
    pub enabled: bool,
    pub max_count: usize,
    /// Override of the alias file location.
    pub path: Option<PathBuf>,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_count: DEFAULT_MAX_ALIASES,
            path: None,
        }
    }
}

/// RPC timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub command_ms: u64,
    pub completion_ms: u64,
    pub streaming_ms: u64,
    pub keep_alive_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            command_ms: 30_000,
            completion_ms: 1_000,
            streaming_ms: 600_000,
            keep_alive_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    /// Connect, login, logout and catalogue calls.
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    #[must_use]
    pub const fn completion(&self) -> Duration {
        Duration::from_millis(self.completion_ms)
    }

    #[must_use]
    pub const fn streaming(&self) -> Duration {
        Duration::from_millis(self.streaming_ms)
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

impl ClientConfig {
    /// Load configuration.
    ///
    /// With `path == None` the default location is used; a missing default
    /// file yields the default configuration. An explicit path must exist.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns the parser message if the text is not valid.
    pub fn from_toml(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    /// Write configuration to `path`, creating parent directories.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `<config_dir>/cmdlink/client.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        app_dir().map(|dir| dir.join("client.toml"))
    }

    /// Resolved history file location.
    #[must_use]
    pub fn history_path(&self) -> Option<PathBuf> {
        self.history
            .path
            .clone()
            .or_else(|| app_dir().map(|dir| dir.join("history.txt")))
    }

    /// Resolved alias file location.
    #[must_use]
    pub fn alias_path(&self) -> Option<PathBuf> {
        self.aliases
            .path
            .clone()
            .or_else(|| app_dir().map(|dir| dir.join("local_aliases.txt")))
    }

    #[must_use]
    pub const fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.server.keep_alive_interval_secs)
    }

    #[must_use]
    pub const fn discover_timeout(&self) -> Duration {
        Duration::from_secs(self.server.discover_timeout_secs)
    }
}

fn app_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}
