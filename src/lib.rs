//! ComfyBridge - Host <-> ComfyUI Bridge
//!
//! Bridges a node-based compositing host with a local ComfyUI
//! installation: launches and supervises the ComfyUI server in the
//! background, and imports workflow JSON exports as host nodes and
//! connections.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`server`]: Process supervision for the local ComfyUI server
//! - [`import`]: Workflow JSON parsing and node-graph translation
//! - [`host`]: The host graph seam and an in-memory implementation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use comfybridge::{ServerConfig, ServerStatus, Supervisor};
//!
//! let supervisor = Supervisor::new(ServerConfig::from_env());
//! supervisor.launch();
//!
//! if supervisor.wait_until_ready(Duration::from_secs(60)) == ServerStatus::Running {
//!     println!("ComfyUI ready at {:?}", supervisor.server_url());
//! }
//!
//! supervisor.stop(Duration::from_secs(10));
//! ```

pub mod host;
pub mod import;
pub mod server;

// Re-export commonly used types
pub use host::{HostGraph, MemoryGraph, NodeKind};
pub use import::{import_file, import_workflow, ImportSummary};
pub use server::{ServerConfig, ServerStatus, Supervisor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ComfyBridge";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "ComfyBridge");
    }

    #[test]
    fn test_module_exports_status() {
        assert!(!ServerStatus::Idle.is_terminal());
        assert!(ServerStatus::Running.is_terminal());
    }

    #[test]
    fn test_module_exports_graph() {
        let graph = MemoryGraph::new();
        assert!(graph.is_empty());
    }
}
