//! Staging edits
//!
//! Typed entry points UI fragments use to stage changes, plus handles that
//! pin a key (and, for lists, its item key) so a fragment cannot mix up
//! identity fields between calls.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{OverlayState, SettingsEvent, SettingsSession};
use crate::overlay::{DraftError, ItemKey, SettingKey, SettingValue};

impl<B> SettingsSession<B> {
    /// Stage a full replacement of `key`
    pub fn update_single_value(&self, key: impl Into<SettingKey>, value: impl Into<SettingValue>) {
        let key = key.into();
        self.lock().drafts.set_scalar(key.clone(), value.into());
        self.notify(SettingsEvent::Staged(key));
    }

    /// Stage an upsert of `item` into the list at `key`, matched by `item_key`
    pub fn update_array_item(
        &self,
        key: impl Into<SettingKey>,
        item_key: &ItemKey,
        item: SettingValue,
    ) -> Result<(), DraftError> {
        let key = key.into();
        {
            let mut state = self.lock();
            ensure_list_base(&state, &key)?;
            state.drafts.upsert(key.clone(), item_key, item)?;
        }
        self.notify(SettingsEvent::Staged(key));
        Ok(())
    }

    /// Stage removal of the item whose `item_key` equals `identity`
    ///
    /// Returns `false` when the item exists nowhere, in which case nothing
    /// is staged and the key stays clean.
    pub fn remove_array_item(
        &self,
        key: impl Into<SettingKey>,
        item_key: &ItemKey,
        identity: impl Into<SettingValue>,
    ) -> Result<bool, DraftError> {
        let key = key.into();
        let identity = identity.into();
        let staged = {
            let mut state = self.lock();
            ensure_list_base(&state, &key)?;
            let present = state
                .cache
                .get(key.as_str())
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|item| item_key.matches(item, &identity)));
            state.drafts.remove(key.clone(), item_key, identity, present)?
        };
        if staged {
            self.notify(SettingsEvent::Staged(key));
        }
        Ok(staged)
    }

    /// Drop the staged edit for `key`, returning whether there was one
    pub fn discard(&self, key: &str) -> bool {
        let discarded = self.lock().drafts.clear(key);
        if discarded {
            debug!(key, "Discarded staged edit");
            self.notify(SettingsEvent::Discarded(vec![SettingKey::from(key)]));
        }
        discarded
    }

    pub fn discard_all(&self) -> Vec<SettingKey> {
        let discarded = self.lock().drafts.clear_all();
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "Discarded all staged edits");
            self.notify(SettingsEvent::Discarded(discarded.clone()));
        }
        discarded
    }

    /// Handle for a list-typed setting identified by `item_key`
    pub fn list(&self, key: impl Into<SettingKey>, item_key: ItemKey) -> ListField<'_, B> {
        ListField {
            session: self,
            key: key.into(),
            item_key,
        }
    }

    /// Handle for a single-valued setting
    pub fn value(&self, key: impl Into<SettingKey>) -> ValueField<'_, B> {
        ValueField {
            session: self,
            key: key.into(),
        }
    }
}

/// List ops need a list (or nothing) underneath when no draft exists yet
fn ensure_list_base(state: &OverlayState, key: &SettingKey) -> Result<(), DraftError> {
    if state.drafts.is_dirty(key.as_str()) {
        return Ok(());
    }
    match state.cache.get(key.as_str()) {
        Some(value) if !value.is_array() => Err(DraftError::NotAList { key: key.clone() }),
        _ => Ok(()),
    }
}

pub struct ListField<'s, B> {
    session: &'s SettingsSession<B>,
    key: SettingKey,
    item_key: ItemKey,
}

impl<B> ListField<'_, B> {
    pub fn key(&self) -> &SettingKey {
        &self.key
    }

    pub fn item_key(&self) -> &ItemKey {
        &self.item_key
    }

    pub fn items(&self) -> Vec<SettingValue> {
        self.session.resolve_list(self.key.as_str())
    }

    /// Items decoded as `T`; items of another shape are skipped
    pub fn items_as<T: DeserializeOwned>(&self) -> Vec<T> {
        self.items()
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Skipping list item with unexpected shape");
                    None
                }
            })
            .collect()
    }

    pub fn find(&self, identity: &SettingValue) -> Option<SettingValue> {
        self.items()
            .into_iter()
            .find(|item| self.item_key.matches(item, identity))
    }

    pub fn upsert(&self, item: SettingValue) -> Result<(), DraftError> {
        self.session
            .update_array_item(self.key.clone(), &self.item_key, item)
    }

    pub fn remove(&self, identity: impl Into<SettingValue>) -> Result<bool, DraftError> {
        self.session
            .remove_array_item(self.key.clone(), &self.item_key, identity)
    }

    /// Stage the whole list at once (e.g. a reordered table)
    pub fn replace(&self, items: Vec<SettingValue>) {
        self.session
            .update_single_value(self.key.clone(), Value::Array(items));
    }

    pub fn is_dirty(&self) -> bool {
        self.session.is_dirty(self.key.as_str())
    }

    pub fn discard(&self) -> bool {
        self.session.discard(self.key.as_str())
    }
}

pub struct ValueField<'s, B> {
    session: &'s SettingsSession<B>,
    key: SettingKey,
}

impl<B> ValueField<'_, B> {
    pub fn key(&self) -> &SettingKey {
        &self.key
    }

    pub fn get(&self) -> Option<SettingValue> {
        self.session.resolve(self.key.as_str())
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.session.resolve_as(self.key.as_str())
    }

    pub fn confirmed(&self) -> Option<SettingValue> {
        self.session.confirmed(self.key.as_str())
    }

    pub fn set(&self, value: impl Into<SettingValue>) {
        self.session.update_single_value(self.key.clone(), value);
    }

    pub fn is_dirty(&self) -> bool {
        self.session.is_dirty(self.key.as_str())
    }

    pub fn discard(&self) -> bool {
        self.session.discard(self.key.as_str())
    }
}
