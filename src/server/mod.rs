//! Local Server Supervision Module
//!
//! Launches and supervises the external tool's server process on
//! behalf of the host, exposing a small status model for UI use.
//!
//! # Architecture
//!
//! - [`config`]: Environment-driven launch configuration
//! - [`readiness`]: URL-based readiness detection in log output
//! - [`supervisor`]: The process lifecycle state machine

pub mod config;
pub mod readiness;
pub mod supervisor;

pub use config::{ConfigError, LaunchCommand, ServerConfig};
pub use readiness::find_server_url;
pub use supervisor::{ServerStatus, Supervisor};
