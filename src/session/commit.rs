//! Commit coordinator
//!
//! Sends every staged key in one partial update. Commits are serialized:
//! a second call waits for the outstanding one and then snapshots whatever
//! is still dirty. On failure nothing local changes, so calling
//! [`SettingsSession::commit`] again is the retry.
//!
//! There is no conflict detection against the server; the last commit to
//! arrive wins.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{SettingsEvent, SettingsSession};
use crate::backend::{BackendError, SettingsBackend};
use crate::overlay::{CommitReport, CommitSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    /// The backend refused a staged value; drafts are kept for correction
    #[error("settings rejected by backend: {reason}")]
    ValidationRejected { reason: String },
    /// The backend could not be reached; drafts are kept for retry
    #[error("failed to reach settings backend: {reason}")]
    NetworkFailure { reason: String },
}

impl From<BackendError> for CommitError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Rejected(reason) => CommitError::ValidationRejected { reason },
            BackendError::Transport(reason) => CommitError::NetworkFailure { reason },
        }
    }
}

impl<B: SettingsBackend> SettingsSession<B> {
    /// Send all staged edits in one request and promote them on success
    ///
    /// Edits staged while the request is in flight are not part of it and
    /// stay dirty for the next commit.
    pub async fn commit(&self) -> Result<CommitReport, CommitError> {
        let _gate = self.commit_gate.lock().await;

        let snapshot = {
            let mut state = self.lock();
            let state = &mut *state;
            CommitSnapshot::capture(&state.cache, &mut state.drafts)
        };
        if snapshot.is_empty() {
            debug!("Nothing staged, skipping commit");
            return Ok(CommitReport::default());
        }

        let sent = snapshot.keys();
        info!(keys = sent.len(), "Committing staged settings");

        match self.backend.patch_settings(snapshot.to_patch()).await {
            Ok(revision) => {
                let report = {
                    let mut state = self.lock();
                    let state = &mut *state;
                    snapshot.promote(&mut state.cache, &mut state.drafts, revision)
                };
                info!(
                    committed = report.committed.len(),
                    retained = report.retained.len(),
                    revision = ?report.revision,
                    "Commit succeeded"
                );
                self.notify(SettingsEvent::Confirmed(sent));
                Ok(report)
            }
            Err(e) => {
                snapshot.release(&mut self.lock().drafts);
                warn!(error = %e, keys = sent.len(), "Commit failed, staged settings kept");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::overlay::{ItemKey, SettingKey, SettingsTree};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn session_with(pairs: &[(&str, serde_json::Value)]) -> SettingsSession<ScriptedBackend> {
        let tree: SettingsTree = pairs
            .iter()
            .map(|(key, value)| (SettingKey::from(*key), value.clone()))
            .collect();
        let session = SettingsSession::new(ScriptedBackend::with_values(tree.clone()));
        session.lock().cache.load(tree, Some(1));
        session
    }

    #[tokio::test]
    async fn test_noop_commit_skips_network() {
        let session = session_with(&[("k", json!(1))]);

        let report = session.commit().await.unwrap();

        assert!(report.is_noop());
        assert_eq!(session.backend().patch_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_promotes_on_success() {
        let session = session_with(&[("k", json!(1))]);
        session.update_single_value("k", 5);

        let report = session.commit().await.unwrap();

        assert_eq!(report.committed, vec![SettingKey::from("k")]);
        assert_eq!(report.revision, Some(2));
        assert!(!session.is_dirty("k"));
        assert_eq!(session.confirmed("k"), Some(json!(5)));
        assert_eq!(session.resolve("k"), Some(json!(5)));
    }

    #[tokio::test]
    async fn test_commit_sends_one_batched_patch() {
        let session = session_with(&[("list", json!([{"name": "a", "url": "u1"}]))]);
        let name = ItemKey::field("name");
        session.update_single_value("general.debug", true);
        session
            .update_array_item("list", &name, json!({"name": "b", "url": "u2"}))
            .unwrap();

        session.commit().await.unwrap();

        let patches = session.backend().patches.lock().unwrap().clone();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].get("general.debug"), Some(&json!(true)));
        assert_eq!(
            patches[0].get("list"),
            Some(&json!([{"name": "a", "url": "u1"}, {"name": "b", "url": "u2"}]))
        );
        assert!(!session.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_rejected_commit_keeps_drafts() {
        let session = session_with(&[("k", json!(1))]);
        session.update_single_value("k", 5);
        session
            .backend()
            .fail_with(BackendError::Rejected("rejected".to_string()));

        let err = session.commit().await.unwrap_err();

        assert_eq!(
            err,
            CommitError::ValidationRejected {
                reason: "rejected".to_string()
            }
        );
        assert!(session.is_dirty("k"));
        assert_eq!(session.confirmed("k"), Some(json!(1)));
        assert_eq!(session.resolve("k"), Some(json!(5)));
    }

    #[tokio::test]
    async fn test_retry_after_network_failure() {
        let session = session_with(&[("k", json!(1))]);
        session.update_single_value("k", 5);
        session
            .backend()
            .fail_with(BackendError::Transport("connection refused".to_string()));

        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, CommitError::NetworkFailure { .. }));

        session.backend().succeed();
        session.commit().await.unwrap();

        assert!(!session.is_dirty("k"));
        assert_eq!(session.backend().patch_count(), 2);
    }

    #[tokio::test]
    async fn test_edits_during_flight_survive() {
        let session = session_with(&[("k", json!(1)), ("other", json!("x"))]);
        session.update_single_value("k", 2);
        let release = session.backend().hold_next_patch();

        let edit = async {
            session.backend().in_flight.notified().await;
            // Still readable and writable while the save is outstanding
            assert_eq!(session.resolve("k"), Some(json!(2)));
            session.update_single_value("k", 3);
            session.update_single_value("other", "y");
            release.send(()).unwrap();
        };
        let (result, ()) = tokio::join!(session.commit(), edit);

        let report = result.unwrap();
        assert_eq!(report.retained, vec![SettingKey::from("k")]);
        assert_eq!(session.confirmed("k"), Some(json!(2)));
        assert_eq!(session.resolve("k"), Some(json!(3)));
        assert!(session.is_dirty("k"));
        assert!(session.is_dirty("other"));

        // The next commit carries both later edits
        session.commit().await.unwrap();
        let patches = session.backend().patches.lock().unwrap().clone();
        assert_eq!(patches[1].get("k"), Some(&json!(3)));
        assert_eq!(patches[1].get("other"), Some(&json!("y")));
        assert!(!session.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_concurrent_commits_are_serialized() {
        let session = session_with(&[("a", json!(0))]);
        session.update_single_value("a", 1);
        let release = session.backend().hold_next_patch();

        let stage_more = async {
            session.backend().in_flight.notified().await;
            session.update_single_value("b", 2);
            release.send(()).unwrap();
        };
        let (first, second, ()) = tokio::join!(session.commit(), session.commit(), stage_more);

        assert_eq!(first.unwrap().committed, vec![SettingKey::from("a")]);
        assert_eq!(second.unwrap().committed, vec![SettingKey::from("b")]);
        assert_eq!(session.backend().max_active.load(Ordering::SeqCst), 1);

        let patches = session.backend().patches.lock().unwrap().clone();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1].len(), 1);
        assert!(patches[1].contains_key("b"));
    }

    #[tokio::test]
    async fn test_list_draft_retained_mid_flight_reapplies_cleanly() {
        let session = session_with(&[("list", json!([{"name": "a", "v": 1}]))]);
        let list = session.list("list", ItemKey::field("name"));
        list.upsert(json!({"name": "b", "v": 1})).unwrap();
        let release = session.backend().hold_next_patch();

        let edit = async {
            session.backend().in_flight.notified().await;
            list.upsert(json!({"name": "a", "v": 2})).unwrap();
            release.send(()).unwrap();
        };
        let (result, ()) = tokio::join!(session.commit(), edit);
        result.unwrap();

        // Confirmed list now holds b; the retained draft re-applies on top without duplicating it
        assert_eq!(
            list.items(),
            vec![json!({"name": "a", "v": 2}), json!({"name": "b", "v": 1})]
        );
    }

    #[tokio::test]
    async fn test_removing_unconfirmed_item_mid_flight_sticks() {
        let session = session_with(&[("list", json!([{"name": "a"}]))]);
        let list = session.list("list", ItemKey::field("name"));
        list.upsert(json!({"name": "b"})).unwrap();
        let release = session.backend().hold_next_patch();

        let edit = async {
            session.backend().in_flight.notified().await;
            assert!(list.remove("b").unwrap());
            assert_eq!(list.items(), vec![json!({"name": "a"})]);
            assert!(list.is_dirty());
            release.send(()).unwrap();
        };
        let (result, ()) = tokio::join!(session.commit(), edit);

        // The in-flight write confirmed b, the later removal is still pending
        let report = result.unwrap();
        assert_eq!(report.retained, vec![SettingKey::from("list")]);
        assert_eq!(
            session.confirmed("list"),
            Some(json!([{"name": "a"}, {"name": "b"}]))
        );
        assert_eq!(list.items(), vec![json!({"name": "a"})]);
        assert!(list.is_dirty());

        session.commit().await.unwrap();
        assert_eq!(session.confirmed("list"), Some(json!([{"name": "a"}])));
        assert!(!list.is_dirty());
    }

    #[tokio::test]
    async fn test_failed_commit_unpins_drafts() {
        let session = session_with(&[("list", json!([{"name": "a"}]))]);
        let list = session.list("list", ItemKey::field("name"));
        list.upsert(json!({"name": "b"})).unwrap();
        session
            .backend()
            .fail_with(BackendError::Transport("down".to_string()));

        session.commit().await.unwrap_err();

        // Nothing in flight any more, so dropping the unsent upsert cleans the key
        assert!(list.remove("b").unwrap());
        assert!(!list.is_dirty());
        assert_eq!(list.items(), vec![json!({"name": "a"})]);
    }
}
