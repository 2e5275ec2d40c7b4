//! Port to whoever owns the settings
//!
//! The session only needs two calls: a full fetch and one batched partial
//! write. Timeouts and retries, if any, belong to the implementation.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::overlay::{SettingsPatch, SettingsTree};
use crate::persistence::{SettingsStore, StoreError};

/// Full settings tree as last reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    #[serde(default)]
    pub revision: Option<u64>,
    #[serde(default)]
    pub values: SettingsTree,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend refused the values
    #[error("rejected: {0}")]
    Rejected(String),
    /// The backend could not be reached or failed to answer
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<StoreError> for BackendError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ReadOnly(_) => BackendError::Rejected(e.to_string()),
            other => BackendError::Transport(other.to_string()),
        }
    }
}

pub trait SettingsBackend: Send + Sync {
    fn fetch_settings(&self) -> impl Future<Output = Result<SettingsSnapshot, BackendError>> + Send;

    /// Write `partial` in one request; returns the new revision if the backend tracks one
    fn patch_settings(
        &self,
        partial: SettingsPatch,
    ) -> impl Future<Output = Result<Option<u64>, BackendError>> + Send;
}

/// In-process backend over a shared [`SettingsStore`]
#[derive(Debug, Clone)]
pub struct StoreBackend {
    store: Arc<Mutex<SettingsStore>>,
}

impl StoreBackend {
    pub fn new(store: SettingsStore) -> Self {
        Self::shared(Arc::new(Mutex::new(store)))
    }

    pub fn shared(store: Arc<Mutex<SettingsStore>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<Mutex<SettingsStore>> {
        Arc::clone(&self.store)
    }

    fn lock(&self) -> MutexGuard<'_, SettingsStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SettingsBackend for StoreBackend {
    async fn fetch_settings(&self) -> Result<SettingsSnapshot, BackendError> {
        Ok(self.lock().snapshot())
    }

    async fn patch_settings(&self, partial: SettingsPatch) -> Result<Option<u64>, BackendError> {
        let revision = self.lock().apply_patch(partial)?;
        Ok(Some(revision))
    }
}
