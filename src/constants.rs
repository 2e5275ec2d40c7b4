//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Configuration file locations
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "settings-overlay";

    /// Tool configuration filename
    pub const FILENAME: &str = "config.json";

    /// Default settings store filename (served by `serve`)
    pub const STORE_FILENAME: &str = "settings.json";

    /// Log level used when neither LOG_LEVEL nor the config file set one
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    /// Environment variable overriding the configured log level
    pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
}

/// IPC socket constants
pub mod ipc {
    /// Directory under XDG_RUNTIME_DIR (or the cache dir) holding the socket
    pub const SOCKET_DIR: &str = "settings-overlay";

    /// Socket filename
    pub const SOCKET_FILENAME: &str = "settings.sock";

    /// Maximum message size (10 MB) to prevent DoS via memory exhaustion
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
}

/// Settings session constants
pub mod session {
    /// Buffered change events per subscriber before the slowest one lags
    pub const EVENT_CAPACITY: usize = 64;
}
