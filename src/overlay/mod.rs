//! Draft-overlay engine
//!
//! - **cache**: last server-confirmed value per key
//! - **draft**: staged edits (replacements and list ops)
//! - **resolve**: effective value = draft over cache
//! - **snapshot**: frozen commit payloads and their promotion

pub mod cache;
pub mod draft;
pub mod key;
pub mod resolve;
pub mod snapshot;

use std::collections::BTreeMap;

pub use cache::{CacheEntry, SettingsCache};
pub use draft::{Draft, DraftError, DraftKind, DraftStore, ListOp};
pub use key::{ItemKey, SettingKey};
pub use resolve::{resolve, resolve_list};
pub use snapshot::{CommitReport, CommitSnapshot, StagedEntry};

/// JSON-like value stored per key; lists are arrays of records or tuples
pub type SettingValue = serde_json::Value;

/// Flat key → value view of a settings tree
pub type SettingsTree = BTreeMap<SettingKey, SettingValue>;

/// Partial update sent on commit
pub type SettingsPatch = SettingsTree;
