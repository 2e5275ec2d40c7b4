//! Settings session context
//!
//! A [`SettingsSession`] is created when a settings surface opens and is
//! handed by reference to every fragment that reads or stages settings.
//! It owns the confirmed cache, the draft store, the backend handle and
//! the change-notification channel. Nothing here is global.
//!
//! Cache and drafts sit behind one synchronous lock that is never held
//! across an `.await`, so fragments keep reading and staging while a
//! commit is in flight.

mod commit;
mod mutation;

pub use commit::CommitError;
pub use mutation::{ListField, ValueField};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::backend::{BackendError, SettingsBackend};
use crate::constants::session::EVENT_CAPACITY;
use crate::overlay::{self, DraftStore, SettingKey, SettingValue, SettingsCache};

/// Change notification for subscribers that cache derived views
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEvent {
    /// A draft for the key was created or changed
    Staged(SettingKey),
    /// Drafts dropped without being sent
    Discarded(Vec<SettingKey>),
    /// Confirmed values changed (fetch or successful commit)
    Confirmed(Vec<SettingKey>),
}

#[derive(Debug, Default)]
struct OverlayState {
    cache: SettingsCache,
    drafts: DraftStore,
}

pub struct SettingsSession<B> {
    backend: B,
    state: Mutex<OverlayState>,
    commit_gate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SettingsEvent>,
}

impl<B: SettingsBackend> SettingsSession<B> {
    /// Empty session; call [`refresh`](Self::refresh) to populate it
    pub fn new(backend: B) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            state: Mutex::new(OverlayState::default()),
            commit_gate: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Session populated from an initial fetch
    pub async fn open(backend: B) -> Result<Self, BackendError> {
        let session = Self::new(backend);
        session.refresh().await?;
        Ok(session)
    }

    /// Replace confirmed state with a fresh fetch; drafts are kept
    pub async fn refresh(&self) -> Result<Vec<SettingKey>, BackendError> {
        let snapshot = self.backend.fetch_settings().await?;
        let keys = snapshot.values.len();
        let changed = self
            .lock()
            .cache
            .replace_all(snapshot.values, snapshot.revision);
        info!(keys, changed = changed.len(), revision = ?snapshot.revision, "Fetched settings");
        if !changed.is_empty() {
            self.notify(SettingsEvent::Confirmed(changed.clone()));
        }
        Ok(changed)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B> SettingsSession<B> {
    fn lock(&self) -> MutexGuard<'_, OverlayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: SettingsEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.events.subscribe()
    }

    /// Effective value: staged edit if any, else the confirmed value
    pub fn resolve(&self, key: &str) -> Option<SettingValue> {
        let state = self.lock();
        overlay::resolve(&state.cache, &state.drafts, key)
    }

    pub fn resolve_list(&self, key: &str) -> Vec<SettingValue> {
        let state = self.lock();
        overlay::resolve_list(&state.cache, &state.drafts, key)
    }

    /// Effective value decoded as `T`; `None` if absent or of another shape
    pub fn resolve_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        decode(key, self.resolve(key)?)
    }

    /// Confirmed value only, ignoring staged edits
    pub fn confirmed(&self, key: &str) -> Option<SettingValue> {
        self.lock().cache.get(key).cloned()
    }

    pub fn confirmed_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        decode(key, self.confirmed(key)?)
    }

    /// Whether the server has confirmed `key` as `true`
    ///
    /// For UI that stays locked until a related toggle is saved: a staged
    /// but uncommitted `true` does not count.
    pub fn is_saved_true(&self, key: &str) -> bool {
        self.confirmed(key) == Some(Value::Bool(true))
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        self.lock().drafts.is_dirty(key)
    }

    pub fn dirty_keys(&self) -> BTreeSet<SettingKey> {
        self.lock().drafts.dirty_keys()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.lock().drafts.is_empty()
    }

    /// Drop confirmed state and drafts, e.g. on logout
    pub fn reset(&self) {
        let (discarded, dropped) = {
            let mut state = self.lock();
            (state.drafts.clear_all(), state.cache.clear())
        };
        info!(discarded = discarded.len(), dropped = dropped.len(), "Settings session reset");
        if !discarded.is_empty() {
            self.notify(SettingsEvent::Discarded(discarded));
        }
        if !dropped.is_empty() {
            self.notify(SettingsEvent::Confirmed(dropped));
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: SettingValue) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            debug!(key, error = %e, "Setting has an unexpected shape");
            None
        }
    }
}
