//! Configuration loading and management
//!
//! Defaults, then `config.json` in the data directory, then environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::warn;

use crate::state::DEFAULT_LOCK_TIMEOUT;

/// Environment override for the auto-unlock delay, in seconds
pub const TIMEOUT_ENV: &str = "INPUTLOCK_TIMEOUT_SECS";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Auto-unlock delay; zero disables the timer
    pub lock_timeout: Duration,
}

/// Errors reading the config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// On-disk settings, all optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    lock_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment, config file and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("inputlock");

        let mut config = Self::with_data_dir(data_dir);
        config.apply_file(&config.config_path())?;
        config.apply_env_timeout(std::env::var(TIMEOUT_ENV).ok().as_deref());
        Ok(config)
    }

    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Location of the optional JSON config file
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Merge settings from `path`. A missing file is not an error.
    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let file: FileConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            })?;

        if let Some(secs) = file.lock_timeout_secs {
            self.lock_timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// Apply the environment override; unparsable values are ignored.
    fn apply_env_timeout(&mut self, value: Option<&str>) {
        let Some(value) = value else {
            return;
        };
        match value.trim().parse::<u64>() {
            Ok(secs) => self.lock_timeout = Duration::from_secs(secs),
            Err(_) => warn!(%value, "ignoring invalid {}", TIMEOUT_ENV),
        }
    }
}
