//! Host Integration Module
//!
//! Abstracts the host application's node graph behind a small trait so
//! the importer can be exercised without the host present.
//!
//! # Components
//!
//! - [`HostGraph`]: the seam a real host integration implements
//! - [`MemoryGraph`]: in-memory graph for the CLI and tests

pub mod graph;

pub use graph::{GraphError, HostGraph, MemoryGraph, MemoryNode, NodeId, NodeKind};
