//! Draft-overlay settings engine
//!
//! Fragments of a settings surface stage edits against a server-owned
//! configuration tree, read their own writes before anything is saved, and
//! send every staged edit in one partial update on commit.

#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod constants;
pub mod ipc;
pub mod overlay;
pub mod persistence;
pub mod session;

pub use backend::{BackendError, SettingsBackend, SettingsSnapshot, StoreBackend};
pub use overlay::{
    CommitReport, DraftError, ItemKey, SettingKey, SettingValue, SettingsPatch, SettingsTree,
};
pub use session::{CommitError, ListField, SettingsEvent, SettingsSession, ValueField};
