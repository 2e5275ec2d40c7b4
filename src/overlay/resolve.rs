//! Effective values: drafts overlaid on confirmed settings
//!
//! Everything here is a pure function of a cache snapshot and a draft
//! snapshot, so the same inputs always render the same view.

use serde_json::Value;
use tracing::{debug, warn};

use super::cache::SettingsCache;
use super::draft::{DraftKind, DraftStore, ListOp};
use super::{ItemKey, SettingValue};

/// Effective value for `key`, or `None` if neither side knows it
pub fn resolve(cache: &SettingsCache, drafts: &DraftStore, key: &str) -> Option<SettingValue> {
    let confirmed = cache.get(key);
    match drafts.get(key).map(|draft| draft.kind()) {
        None => confirmed.cloned(),
        Some(DraftKind::ReplaceScalar(value)) => Some(value.clone()),
        Some(DraftKind::List { item_key, ops }) => {
            let mut items = base_items(key, confirmed);
            for op in ops {
                apply_op(&mut items, item_key, op);
            }
            Some(Value::Array(items))
        }
    }
}

/// Effective list for `key`; absent or non-list values read as empty
pub fn resolve_list(cache: &SettingsCache, drafts: &DraftStore, key: &str) -> Vec<SettingValue> {
    match resolve(cache, drafts, key) {
        Some(Value::Array(items)) => items,
        Some(other) => {
            debug!(key, value = %other, "Expected a list, reading as empty");
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn base_items(key: &str, confirmed: Option<&SettingValue>) -> Vec<SettingValue> {
    match confirmed {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            warn!(key, value = %other, "Confirmed value is not a list, overlaying on an empty list");
            Vec::new()
        }
        None => Vec::new(),
    }
}

/// Apply one list op in place; returns whether `items` changed
///
/// Upserts replace the matching item where it stands or append at the end.
/// Removals of an absent identity do nothing.
pub(crate) fn apply_op(items: &mut Vec<SettingValue>, item_key: &ItemKey, op: &ListOp) -> bool {
    let position = items
        .iter()
        .position(|item| item_key.matches(item, op.identity()));
    match (op, position) {
        (ListOp::UpsertItem { item, .. }, Some(idx)) => {
            let changed = &items[idx] != item;
            items[idx] = item.clone();
            changed
        }
        (ListOp::UpsertItem { item, .. }, None) => {
            items.push(item.clone());
            true
        }
        (ListOp::RemoveItem { .. }, Some(idx)) => {
            items.remove(idx);
            true
        }
        (ListOp::RemoveItem { .. }, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::SettingKey;
    use serde_json::json;

    fn cache_with(key: &str, value: SettingValue) -> SettingsCache {
        let mut cache = SettingsCache::new();
        cache.load([(SettingKey::from(key), value)], Some(1));
        cache
    }

    #[test]
    fn test_no_draft_returns_cache_value_exactly() {
        let cache = cache_with("k", json!({"nested": [1, 2, 3]}));
        let drafts = DraftStore::new();

        assert_eq!(resolve(&cache, &drafts, "k"), cache.get("k").cloned());
        assert_eq!(resolve(&cache, &drafts, "missing"), None);
    }

    #[test]
    fn test_scalar_draft_wins() {
        let cache = cache_with("k", json!(1));
        let mut drafts = DraftStore::new();
        drafts.set_scalar("k".into(), json!(5));

        assert_eq!(resolve(&cache, &drafts, "k"), Some(json!(5)));
    }

    #[test]
    fn test_upsert_then_absent_remove() {
        let cache = cache_with("k", json!([{"name": "a", "url": "u1"}]));
        let mut drafts = DraftStore::new();
        let name = ItemKey::field("name");

        drafts
            .upsert("k".into(), &name, json!({"name": "a", "url": "u2"}))
            .unwrap();
        drafts.remove("k".into(), &name, json!("b"), false).unwrap();

        assert_eq!(
            resolve(&cache, &drafts, "k"),
            Some(json!([{"name": "a", "url": "u2"}]))
        );
    }

    #[test]
    fn test_new_identity_appends() {
        let cache = cache_with("k", json!([{"name": "a", "url": "u1"}]));
        let mut drafts = DraftStore::new();
        let name = ItemKey::field("name");

        drafts
            .upsert("k".into(), &name, json!({"name": "a", "url": "u2"}))
            .unwrap();
        drafts
            .upsert("k".into(), &name, json!({"name": "b", "url": "u3"}))
            .unwrap();

        assert_eq!(
            resolve(&cache, &drafts, "k"),
            Some(json!([
                {"name": "a", "url": "u2"},
                {"name": "b", "url": "u3"},
            ]))
        );
    }

    #[test]
    fn test_updates_keep_cache_order_appends_follow_staging_order() {
        let cache = cache_with("k", json!([{"name": "a"}, {"name": "b"}, {"name": "c"}]));
        let mut drafts = DraftStore::new();
        let name = ItemKey::field("name");

        drafts.upsert("k".into(), &name, json!({"name": "y"})).unwrap();
        drafts.upsert("k".into(), &name, json!({"name": "c", "v": 1})).unwrap();
        drafts.upsert("k".into(), &name, json!({"name": "x"})).unwrap();
        drafts.remove("k".into(), &name, json!("b"), true).unwrap();
        drafts.upsert("k".into(), &name, json!({"name": "a", "v": 2})).unwrap();

        assert_eq!(
            resolve_list(&cache, &drafts, "k"),
            vec![
                json!({"name": "a", "v": 2}),
                json!({"name": "c", "v": 1}),
                json!({"name": "y"}),
                json!({"name": "x"}),
            ]
        );
    }

    #[test]
    fn test_list_draft_on_absent_cache_starts_empty() {
        let cache = SettingsCache::new();
        let mut drafts = DraftStore::new();
        drafts
            .upsert("k".into(), &ItemKey::field("name"), json!({"name": "a"}))
            .unwrap();

        assert_eq!(resolve(&cache, &drafts, "k"), Some(json!([{"name": "a"}])));
    }

    #[test]
    fn test_path_mapping_by_position() {
        let cache = cache_with("k", json!([["/tv", "/mnt/tv"], ["/movies", "/mnt/movies"]]));
        let mut drafts = DraftStore::new();
        let from = ItemKey::Position(0);

        drafts.upsert("k".into(), &from, json!(["/tv", "/data/tv"])).unwrap();
        drafts.remove("k".into(), &from, json!("/movies"), true).unwrap();

        assert_eq!(resolve(&cache, &drafts, "k"), Some(json!([["/tv", "/data/tv"]])));
    }

    #[test]
    fn test_resolve_list_of_scalar_reads_empty() {
        let cache = cache_with("k", json!("not a list"));
        let drafts = DraftStore::new();
        assert!(resolve_list(&cache, &drafts, "k").is_empty());
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let cache = cache_with("k", json!([{"name": "a"}]));
        let mut drafts = DraftStore::new();
        drafts
            .upsert("k".into(), &ItemKey::field("name"), json!({"name": "b"}))
            .unwrap();

        let first = resolve(&cache, &drafts, "k");
        let second = resolve(&cache, &drafts, "k");
        assert_eq!(first, second);
        // Source data untouched
        assert_eq!(cache.get("k"), Some(&json!([{"name": "a"}])));
    }

    #[test]
    fn test_apply_op_reports_change() {
        let name = ItemKey::field("name");
        let mut items = vec![json!({"name": "a"})];

        let same = ListOp::UpsertItem {
            identity: json!("a"),
            item: json!({"name": "a"}),
        };
        assert!(!apply_op(&mut items, &name, &same));

        let gone = ListOp::RemoveItem { identity: json!("z") };
        assert!(!apply_op(&mut items, &name, &gone));

        let remove = ListOp::RemoveItem { identity: json!("a") };
        assert!(apply_op(&mut items, &name, &remove));
        assert!(items.is_empty());
    }
}
