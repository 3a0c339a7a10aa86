//! Workflow Import Module
//!
//! Parses the external tool's node-graph JSON export and recreates it
//! as host nodes and connections.
//!
//! # Structure
//!
//! - [`model`]: Tolerant structural parsing of the export format
//! - [`mapping`]: External type name -> host node kind table
//! - [`importer`]: Node creation, positioning, tagging, and linking

pub mod importer;
pub mod mapping;
pub mod model;

pub use importer::{import_file, import_workflow, ImportSummary};
pub use mapping::kind_for;
pub use model::{ExternalLink, ExternalNode, ImportError, WorkflowDoc};
