//! User configuration.
//!
//! Read from an optional JSON file. Every field has a default, so a missing
//! or partial file is fine.

use std::fs;
use std::path::{Component, Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::crypto::BLOCK_LEN;
use crate::error::{Error, Result};

/// Name of the config file inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Delay between two volume snapshots while waiting for a key drive.
    poll_interval_ms: u64,
    /// Bytes of plaintext transformed per step.
    chunk_size: usize,
    default_algorithm: String,
    /// Key directory relative to the root of a key drive.
    drive_key_dir: PathBuf,
    /// `tracing` filter used when `CRYPASS_LOG` is unset.
    log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            chunk_size: 64 * 1024,
            default_algorithm: String::from("Aes"),
            drive_key_dir: PathBuf::from("crypass").join("key-data"),
            log_filter: String::from("warn"),
        }
    }
}

impl Config {
    /// Loads the config from `path`, or from the platform default location
    /// when `path` is `None`.
    ///
    /// An explicit path must exist. A missing default file yields
    /// [`Config::default`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(raw).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be >= 1".into(),
            ));
        }
        if self.chunk_size < BLOCK_LEN {
            return Err(Error::InvalidConfig(format!(
                "chunk_size must be at least {BLOCK_LEN} bytes"
            )));
        }
        if self.drive_key_dir.is_absolute() {
            return Err(Error::InvalidConfig(
                "drive_key_dir must be relative to the drive root".into(),
            ));
        }
        if self
            .drive_key_dir
            .components()
            .any(|c| c == Component::ParentDir)
        {
            return Err(Error::InvalidConfig(
                "drive_key_dir must not contain '..'".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn default_algorithm(&self) -> &str {
        &self.default_algorithm
    }

    pub fn drive_key_dir(&self) -> &Path {
        &self.drive_key_dir
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "crypass").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
