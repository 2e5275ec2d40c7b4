//! Pending, not-yet-committed edits
//!
//! A draft is either a full replacement of a key's value or a list
//! transform: an ordered set of upserts and removals keyed by item identity.
//! Every mutation stamps the draft with a fresh store-wide revision so the
//! commit path can tell whether a key was edited while a save was in flight.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

use super::resolve::apply_op;
use super::{ItemKey, SettingKey, SettingValue};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("item staged for `{key}` has no identity under `{item_key}`")]
    MissingIdentity { key: SettingKey, item_key: ItemKey },
    #[error("`{key}` does not hold a list")]
    NotAList { key: SettingKey },
}

/// One staged list operation, matched by item identity
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp {
    UpsertItem { identity: Value, item: Value },
    RemoveItem { identity: Value },
}

impl ListOp {
    pub fn identity(&self) -> &Value {
        match self {
            ListOp::UpsertItem { identity, .. } | ListOp::RemoveItem { identity } => identity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DraftKind {
    /// Full value replacement; overwrites whatever the server holds
    ReplaceScalar(SettingValue),
    /// Upserts/removals applied on top of the confirmed list
    List { item_key: ItemKey, ops: Vec<ListOp> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    revision: u64,
    kind: DraftKind,
}

impl Draft {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn kind(&self) -> &DraftKind {
        &self.kind
    }
}

#[derive(Debug, Default)]
pub struct DraftStore {
    drafts: BTreeMap<SettingKey, Draft>,
    last_revision: u64,
    /// Keys captured by the outstanding commit snapshot
    pinned: BTreeSet<SettingKey>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }

    pub fn get(&self, key: &str) -> Option<&Draft> {
        self.drafts.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SettingKey, &Draft)> {
        self.drafts.iter()
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        self.drafts.contains_key(key)
    }

    pub fn dirty_keys(&self) -> BTreeSet<SettingKey> {
        self.drafts.keys().cloned().collect()
    }

    /// Mark keys whose values are being sent; replaces any earlier pin set
    pub fn pin<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = SettingKey>,
    {
        self.pinned = keys.into_iter().collect();
    }

    pub fn unpin(&mut self) {
        self.pinned.clear();
    }

    pub fn is_pinned(&self, key: &str) -> bool {
        self.pinned.contains(key)
    }

    /// Stage a full replacement, dropping any earlier draft for the key
    pub fn set_scalar(&mut self, key: SettingKey, value: SettingValue) {
        let revision = self.next_revision();
        debug!(key = %key, revision, "Staged value replacement");
        self.drafts.insert(
            key,
            Draft {
                revision,
                kind: DraftKind::ReplaceScalar(value),
            },
        );
    }

    /// Stage an upsert of `item`, superseding any pending op for the same identity
    ///
    /// If the key already carries a replacement array, the upsert is folded
    /// straight into that array.
    pub fn upsert(
        &mut self,
        key: SettingKey,
        item_key: &ItemKey,
        item: SettingValue,
    ) -> Result<(), DraftError> {
        let identity = item_key
            .identity_of(&item)
            .cloned()
            .ok_or_else(|| DraftError::MissingIdentity {
                key: key.clone(),
                item_key: item_key.clone(),
            })?;
        let op = ListOp::UpsertItem { identity, item };

        match self.drafts.get_mut(&key) {
            Some(draft) => {
                stage_list_op(&key, &mut draft.kind, item_key, op)?;
            }
            None => {
                self.drafts.insert(
                    key.clone(),
                    Draft {
                        revision: 0,
                        kind: DraftKind::List {
                            item_key: item_key.clone(),
                            ops: vec![op],
                        },
                    },
                );
            }
        }

        self.touch(&key);
        debug!(key = %key, item_key = %item_key, "Staged list upsert");
        Ok(())
    }

    /// Stage removal of the item with `identity`
    ///
    /// `present` tells whether the confirmed list contains that identity.
    /// Removing something that exists neither there nor in a pending op is a
    /// no-op and leaves the key clean. A pending upsert of a never-confirmed
    /// item is dropped, unless the key is pinned by an in-flight commit: the
    /// item may be confirmed by it, so a removal op is recorded instead.
    /// Returns whether anything was staged.
    pub fn remove(
        &mut self,
        key: SettingKey,
        item_key: &ItemKey,
        identity: Value,
        present: bool,
    ) -> Result<bool, DraftError> {
        let Some(draft) = self.drafts.get_mut(&key) else {
            if !present {
                debug!(key = %key, identity = %identity, "Ignoring removal of absent item");
                return Ok(false);
            }
            self.drafts.insert(
                key.clone(),
                Draft {
                    revision: 0,
                    kind: DraftKind::List {
                        item_key: item_key.clone(),
                        ops: vec![ListOp::RemoveItem { identity }],
                    },
                },
            );
            self.touch(&key);
            return Ok(true);
        };

        let pinned = self.pinned.contains(key.as_str());
        let staged = match &mut draft.kind {
            DraftKind::List { ops, .. } if !present && !pinned => {
                // Never confirmed, so dropping the pending op removes the item
                let before = ops.len();
                ops.retain(|op| op.identity() != &identity);
                ops.len() != before
            }
            kind => stage_list_op(&key, kind, item_key, ListOp::RemoveItem { identity })?,
        };

        let emptied = matches!(&draft.kind, DraftKind::List { ops, .. } if ops.is_empty());
        if emptied {
            self.drafts.remove(&key);
        } else if staged {
            self.touch(&key);
        }
        debug!(key = %key, staged, "Staged list removal");
        Ok(staged)
    }

    /// Discard the draft for `key`, returning whether one existed
    pub fn clear(&mut self, key: &str) -> bool {
        self.drafts.remove(key).is_some()
    }

    pub fn clear_all(&mut self) -> Vec<SettingKey> {
        let keys = self.drafts.keys().cloned().collect();
        self.drafts.clear();
        keys
    }

    /// Clear `key` unless it was edited after `revision`
    ///
    /// Returns `false` when a newer draft exists and was kept.
    pub fn clear_if_unchanged(&mut self, key: &str, revision: u64) -> bool {
        match self.drafts.get(key) {
            Some(draft) if draft.revision != revision => false,
            Some(_) => {
                self.drafts.remove(key);
                true
            }
            None => true,
        }
    }

    fn touch(&mut self, key: &SettingKey) {
        let revision = self.next_revision();
        if let Some(draft) = self.drafts.get_mut(key) {
            draft.revision = revision;
        }
    }
}

/// Returns whether the draft changed
fn stage_list_op(
    key: &SettingKey,
    kind: &mut DraftKind,
    item_key: &ItemKey,
    op: ListOp,
) -> Result<bool, DraftError> {
    match kind {
        DraftKind::ReplaceScalar(Value::Array(items)) => Ok(apply_op(items, item_key, &op)),
        DraftKind::ReplaceScalar(_) => Err(DraftError::NotAList { key: key.clone() }),
        DraftKind::List { item_key: pinned, ops } => {
            if pinned != item_key {
                warn!(
                    key = %key,
                    pinned = %pinned,
                    requested = %item_key,
                    "Item key changed for a staged list, keeping the original"
                );
            }
            match ops.iter_mut().find(|pending| pending.identity() == op.identity()) {
                Some(pending) => *pending = op,
                None => ops.push(op),
            }
            Ok(true)
        }
    }
}
