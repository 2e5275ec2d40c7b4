//! Server-side settings store
//!
//! Owns the authoritative settings tree for the `serve` command and for
//! local (`--store`) sessions. The tree is kept as a flat key → value JSON
//! document with a revision that increases on every accepted patch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::SettingsSnapshot;
use crate::overlay::{SettingKey, SettingsPatch, SettingsTree};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("setting `{0}` is read-only")]
    ReadOnly(SettingKey),
    #[error("failed to write settings to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    values: SettingsTree,
}

#[derive(Debug)]
pub struct SettingsStore {
    /// `None` keeps everything in memory
    path: Option<PathBuf>,
    document: StoreDocument,
    read_only: BTreeSet<SettingKey>,
}

impl SettingsStore {
    pub fn in_memory(values: SettingsTree) -> Self {
        Self {
            path: None,
            document: StoreDocument { revision: 0, values },
            read_only: BTreeSet::new(),
        }
    }

    /// Open the store file at `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {:?}", path))?;
            let document: StoreDocument = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings JSON from {:?}", path))?;
            info!(
                path = %path.display(),
                keys = document.values.len(),
                revision = document.revision,
                "Loaded settings store"
            );
            document
        } else {
            info!(path = %path.display(), "Settings store not found, starting empty");
            StoreDocument::default()
        };

        Ok(Self {
            path: Some(path),
            document,
            read_only: BTreeSet::new(),
        })
    }

    /// Mark keys that patches may not touch
    pub fn with_read_only<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = SettingKey>,
    {
        self.read_only.extend(keys);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn revision(&self) -> u64 {
        self.document.revision
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            revision: Some(self.document.revision),
            values: self.document.values.clone(),
        }
    }

    /// Merge `patch` key by key and persist it
    ///
    /// The patch is applied whole or not at all: a read-only key or a failed
    /// write leaves the stored tree as it was. Last writer wins; there is no
    /// revision check against the caller.
    pub fn apply_patch(&mut self, patch: SettingsPatch) -> Result<u64, StoreError> {
        if let Some(key) = patch.keys().find(|key| self.read_only.contains(*key)) {
            warn!(key = %key, "Rejecting patch touching read-only setting");
            return Err(StoreError::ReadOnly(key.clone()));
        }

        let previous = self.document.clone();
        let keys = patch.len();
        self.document.values.extend(patch);
        self.document.revision += 1;

        if let Err(e) = self.save() {
            self.document = previous;
            return Err(e);
        }

        info!(keys, revision = self.document.revision, "Applied settings patch");
        Ok(self.document.revision)
    }

    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&self.document)?;
        fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(pairs: &[(&str, serde_json::Value)]) -> SettingsPatch {
        pairs
            .iter()
            .map(|(key, value)| (SettingKey::from(*key), value.clone()))
            .collect()
    }

    #[test]
    fn test_in_memory_patch_bumps_revision() {
        let mut store = SettingsStore::in_memory(patch(&[("a", json!(1))]));

        let revision = store.apply_patch(patch(&[("b", json!(2))])).unwrap();

        assert_eq!(revision, 1);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.revision, Some(1));
        assert_eq!(snapshot.values.get("a"), Some(&json!(1)));
        assert_eq!(snapshot.values.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_read_only_rejects_whole_patch() {
        let mut store = SettingsStore::in_memory(patch(&[("auth.apikey", json!("secret"))]))
            .with_read_only([SettingKey::from("auth.apikey")]);

        let err = store
            .apply_patch(patch(&[("a", json!(1)), ("auth.apikey", json!("x"))]))
            .unwrap_err();

        assert!(matches!(err, StoreError::ReadOnly(key) if key.as_str() == "auth.apikey"));
        assert_eq!(store.revision(), 0);
        assert_eq!(store.snapshot().values.get("a"), None);
    }

    #[test]
    fn test_open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json")).unwrap();

        assert_eq!(store.revision(), 0);
        assert!(store.snapshot().values.is_empty());
    }

    #[test]
    fn test_patch_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut store = SettingsStore::open(&path).unwrap();
        store
            .apply_patch(patch(&[("general.path_mappings", json!([["/tv", "/mnt/tv"]]))]))
            .unwrap();

        let reopened = SettingsStore::open(&path).unwrap();
        assert_eq!(reopened.revision(), 1);
        assert_eq!(
            reopened.snapshot().values.get("general.path_mappings"),
            Some(&json!([["/tv", "/mnt/tv"]]))
        );
    }

    #[test]
    fn test_open_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(SettingsStore::open(&path).is_err());
    }
}
