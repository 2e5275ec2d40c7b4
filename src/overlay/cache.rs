//! Last server-confirmed settings
//!
//! Only two things write here: a fresh fetch from the backend and a
//! successful commit. UI code reads through the resolver instead.

use std::collections::BTreeMap;
use tracing::debug;

use super::{SettingKey, SettingValue, SettingsTree};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: SettingValue,
    /// Backend revision the value was confirmed at, if the backend reports one
    pub revision: Option<u64>,
}

#[derive(Debug, Default, Clone)]
pub struct SettingsCache {
    entries: BTreeMap<SettingKey, CacheEntry>,
}

impl SettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SettingKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge confirmed key/value pairs into the cache
    ///
    /// Returns the keys whose value changed, in key order. Keys that are
    /// re-confirmed with an identical value only get their revision updated.
    pub fn load<I>(&mut self, tree: I, revision: Option<u64>) -> Vec<SettingKey>
    where
        I: IntoIterator<Item = (SettingKey, SettingValue)>,
    {
        let mut changed = Vec::new();
        for (key, value) in tree {
            match self.entries.get_mut(&key) {
                Some(entry) if entry.value == value => {
                    entry.revision = revision.or(entry.revision);
                }
                _ => {
                    self.entries.insert(key.clone(), CacheEntry { value, revision });
                    changed.push(key);
                }
            }
        }
        changed.sort();
        debug!(changed = changed.len(), revision = ?revision, "Loaded confirmed settings");
        changed
    }

    /// Replace the whole cache with a freshly fetched tree
    ///
    /// Keys missing from `tree` are dropped and reported as changed.
    pub fn replace_all(&mut self, tree: SettingsTree, revision: Option<u64>) -> Vec<SettingKey> {
        let removed: Vec<SettingKey> = self
            .entries
            .keys()
            .filter(|key| !tree.contains_key(*key))
            .cloned()
            .collect();
        self.entries.retain(|key, _| tree.contains_key(key));

        let mut changed = self.load(tree, revision);
        changed.extend(removed);
        changed.sort();
        changed
    }

    pub fn clear(&mut self) -> Vec<SettingKey> {
        let keys = self.entries.keys().cloned().collect();
        self.entries.clear();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(pairs: &[(&str, SettingValue)]) -> SettingsTree {
        pairs
            .iter()
            .map(|(key, value)| (SettingKey::from(*key), value.clone()))
            .collect()
    }

    #[test]
    fn test_get_absent_key() {
        let cache = SettingsCache::new();
        assert_eq!(cache.get("general.debug"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_reports_only_changed_keys() {
        let mut cache = SettingsCache::new();
        let first = cache.load(tree(&[("a", json!(1)), ("b", json!(2))]), Some(1));
        assert_eq!(first, vec![SettingKey::from("a"), SettingKey::from("b")]);

        let second = cache.load(tree(&[("a", json!(1)), ("b", json!(3))]), Some(2));
        assert_eq!(second, vec![SettingKey::from("b")]);

        // Unchanged value still picks up the newer revision
        assert_eq!(cache.entry("a").unwrap().revision, Some(2));
        assert_eq!(cache.get("b"), Some(&json!(3)));
    }

    #[test]
    fn test_load_keeps_revision_when_backend_has_none() {
        let mut cache = SettingsCache::new();
        cache.load(tree(&[("a", json!(1))]), Some(7));
        cache.load(tree(&[("a", json!(1))]), None);
        assert_eq!(cache.entry("a").unwrap().revision, Some(7));
    }

    #[test]
    fn test_load_merges_instead_of_replacing() {
        let mut cache = SettingsCache::new();
        cache.load(tree(&[("a", json!(1))]), None);
        cache.load(tree(&[("b", json!(2))]), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_all_drops_missing_keys() {
        let mut cache = SettingsCache::new();
        cache.load(tree(&[("a", json!(1)), ("b", json!(2))]), Some(1));

        let changed = cache.replace_all(tree(&[("b", json!(2)), ("c", json!(3))]), Some(2));

        assert_eq!(changed, vec![SettingKey::from("a"), SettingKey::from("c")]);
        assert!(!cache.contains("a"));
        assert_eq!(cache.get("c"), Some(&json!(3)));
    }

    #[test]
    fn test_clear_returns_dropped_keys() {
        let mut cache = SettingsCache::new();
        cache.load(tree(&[("a", json!(1))]), None);
        assert_eq!(cache.clear(), vec![SettingKey::from("a")]);
        assert!(cache.is_empty());
    }
}
