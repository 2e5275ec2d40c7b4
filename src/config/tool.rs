//! Tool configuration file
//!
//! JSON at `<config_dir>/settings-overlay/config.json`. A missing file means
//! defaults; nothing is written back. Command-line flags take precedence over
//! anything set here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::log_level::parse_log_level;
use crate::constants::config::{APP_DIR, DEFAULT_LOG_LEVEL, FILENAME, STORE_FILENAME};
use crate::overlay::SettingKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub log_level: String,
    /// Socket to serve on or connect to; defaults under XDG_RUNTIME_DIR
    pub socket_path: Option<PathBuf>,
    /// Settings store served by `serve`
    pub store_path: Option<PathBuf>,
    /// Keys the server refuses to patch
    pub read_only_keys: Vec<SettingKey>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            socket_path: None,
            store_path: None,
            read_only_keys: Vec::new(),
        }
    }
}

fn config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path
}

impl ToolConfig {
    /// Default config file location
    pub fn path() -> PathBuf {
        config_dir().join(FILENAME)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load from `path`, or defaults if the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let mut config: ToolConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config JSON from {:?}", path))?;
        config.validate();
        Ok(config)
    }

    /// Normalize values the tool cannot use
    fn validate(&mut self) {
        if parse_log_level(&self.log_level).is_none() {
            warn!(log_level = %self.log_level, "Unknown log_level, falling back to info");
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }

        let before = self.read_only_keys.len();
        let mut seen = BTreeSet::new();
        self.read_only_keys
            .retain(|key| !key.as_str().is_empty() && seen.insert(key.clone()));
        if self.read_only_keys.len() != before {
            warn!(
                dropped = before - self.read_only_keys.len(),
                "Ignoring empty or duplicate read_only_keys"
            );
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| config_dir().join(STORE_FILENAME))
    }

    pub fn socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(path) => Ok(path.clone()),
            None => crate::ipc::default_socket_path(),
        }
    }
}
