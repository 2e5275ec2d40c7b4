//! Frozen commit payloads
//!
//! A snapshot captures every dirty key, its effective value and the draft
//! revision at capture time, and pins the captured keys in the draft store
//! until the write settles. Promotion after a successful write only clears
//! drafts that were not touched again while the write was in flight.

use tracing::debug;

use super::cache::SettingsCache;
use super::draft::DraftStore;
use super::resolve::resolve;
use super::{SettingKey, SettingValue, SettingsPatch};

#[derive(Debug, Clone, PartialEq)]
pub struct StagedEntry {
    pub key: SettingKey,
    pub value: SettingValue,
    pub revision: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSnapshot {
    entries: Vec<StagedEntry>,
}

impl CommitSnapshot {
    pub fn capture(cache: &SettingsCache, drafts: &mut DraftStore) -> Self {
        let staged: &DraftStore = drafts;
        let entries: Vec<StagedEntry> = staged
            .iter()
            .filter_map(|(key, draft)| {
                resolve(cache, staged, key.as_str()).map(|value| StagedEntry {
                    key: key.clone(),
                    value,
                    revision: draft.revision(),
                })
            })
            .collect();
        drafts.pin(entries.iter().map(|entry| entry.key.clone()));
        Self { entries }
    }

    /// Unpin after a failed write; drafts and cache stay as they are
    pub fn release(self, drafts: &mut DraftStore) {
        drafts.unpin();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[StagedEntry] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<SettingKey> {
        self.entries.iter().map(|entry| entry.key.clone()).collect()
    }

    /// Partial update holding exactly the captured values
    pub fn to_patch(&self) -> SettingsPatch {
        self.entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect()
    }

    /// Promote the sent values into `cache` and settle the matching drafts
    pub fn promote(
        self,
        cache: &mut SettingsCache,
        drafts: &mut DraftStore,
        revision: Option<u64>,
    ) -> CommitReport {
        drafts.unpin();
        let changed = cache.load(
            self.entries
                .iter()
                .map(|entry| (entry.key.clone(), entry.value.clone())),
            revision,
        );

        let mut report = CommitReport {
            revision,
            changed,
            ..CommitReport::default()
        };
        for entry in self.entries {
            if drafts.clear_if_unchanged(entry.key.as_str(), entry.revision) {
                report.committed.push(entry.key);
            } else {
                debug!(key = %entry.key, "Key edited during commit, keeping newer draft");
                report.retained.push(entry.key);
            }
        }
        report
    }
}

/// Outcome of a successful commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Keys sent and now clean
    pub committed: Vec<SettingKey>,
    /// Keys sent but edited again mid-flight; still dirty
    pub retained: Vec<SettingKey>,
    /// Keys whose confirmed value changed
    pub changed: Vec<SettingKey>,
    pub revision: Option<u64>,
}

impl CommitReport {
    /// True when there was nothing to send
    pub fn is_noop(&self) -> bool {
        self.committed.is_empty() && self.retained.is_empty()
    }

    pub fn sent(&self) -> usize {
        self.committed.len() + self.retained.len()
    }
}
