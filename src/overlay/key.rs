//! Setting keys and list item identity

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

/// Stable identifier for one addressable unit of configuration.
///
/// Keys are path-like (`general.path_mappings`) but the engine treats them as
/// opaque strings compared by exact match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingKey(String);

impl SettingKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SettingKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SettingKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&SettingKey> for SettingKey {
    fn from(key: &SettingKey) -> Self {
        key.clone()
    }
}

// Lets maps keyed by SettingKey be queried with a plain &str
impl Borrow<str> for SettingKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How the elements of a list-typed setting are told apart
///
/// The caller picks this once per key and keeps using it; the engine never
/// guesses it from the data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKey {
    /// Record field, e.g. `name` for notification providers
    Field(String),
    /// Tuple element, e.g. `0` for `[from, to]` path mappings
    Position(usize),
}

impl ItemKey {
    pub fn field(name: impl Into<String>) -> Self {
        ItemKey::Field(name.into())
    }

    /// Identity value of `item`, or `None` if the item has none (missing or null)
    pub fn identity_of<'a>(&self, item: &'a Value) -> Option<&'a Value> {
        let identity = match self {
            ItemKey::Field(name) => item.get(name.as_str()),
            ItemKey::Position(idx) => item.get(*idx),
        };
        identity.filter(|value| !value.is_null())
    }

    pub fn matches(&self, item: &Value, identity: &Value) -> bool {
        self.identity_of(item) == Some(identity)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Field(name) => f.write_str(name),
            ItemKey::Position(idx) => write!(f, "[{idx}]"),
        }
    }
}
