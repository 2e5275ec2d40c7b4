//! IPC message types for session ↔ settings server communication

use serde::{Deserialize, Serialize};

use crate::backend::SettingsSnapshot;
use crate::overlay::SettingsPatch;

/// Requests sent from a settings session to the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum SettingsRequest {
    /// Full settings tree
    Fetch,

    /// Batched partial update (one commit)
    Patch(SettingsPatch),

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses sent from the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum SettingsResponse {
    /// Response to Fetch
    Settings(SettingsSnapshot),

    /// Patch accepted and persisted
    Patched { revision: u64 },

    /// Patch refused; nothing was written
    Rejected(String),

    /// Health check response
    Pong,

    /// Acknowledgment that request was processed
    Ready,

    /// Error occurred
    Error(String),
}
