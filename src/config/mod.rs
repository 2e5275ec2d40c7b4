//! Configuration for the settings-overlay tool
//!
//! - **tool**: [`ToolConfig`] file with the log level, socket and store locations
//! - **log_level**: level names accepted by `LOG_LEVEL` and the config file

pub mod log_level;
pub mod tool;

pub use log_level::parse_log_level;
pub use tool::ToolConfig;
