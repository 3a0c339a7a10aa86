//! Host Graph Abstraction
//!
//! The bridge never talks to the host's real node classes directly; it
//! goes through [`HostGraph`], a minimal seam covering node creation,
//! knob edits, input wiring, and undo grouping. [`MemoryGraph`] is the
//! in-memory implementation used by the CLI and the test suite; a real
//! host integration implements the same trait over its own DAG.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;
use thiserror::Error;

/// Identifier of a node inside a [`HostGraph`].
pub type NodeId = usize;

/// The closed set of host node kinds the importer can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    /// A source node with no inputs (image reader).
    ReadLike,
    /// A sink node that renders to disk (image writer).
    WriteLike,
    /// A generic pass-through placeholder for unmapped types.
    Placeholder,
}

impl NodeKind {
    /// Host node class backing this kind.
    pub fn host_class(self) -> &'static str {
        match self {
            NodeKind::ReadLike => "Read",
            NodeKind::WriteLike => "Write",
            NodeKind::Placeholder => "NoOp",
        }
    }

    /// Number of input slots nodes of this kind accept.
    pub fn max_inputs(self) -> usize {
        match self {
            NodeKind::ReadLike => 0,
            NodeKind::WriteLike | NodeKind::Placeholder => 1,
        }
    }
}

/// Errors surfaced by host graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("a node named '{0}' already exists")]
    DuplicateName(String),

    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    #[error("node '{node}' has no input slot {slot}")]
    NoSuchSlot { node: String, slot: usize },
}

/// The host's node graph, as far as the importer is concerned.
pub trait HostGraph {
    /// Whether a node with this exact name exists.
    fn node_exists(&self, name: &str) -> bool;

    /// Creates a node of the given kind with a unique name.
    fn create_node(&mut self, kind: NodeKind, name: &str) -> Result<NodeId, GraphError>;

    /// Places a node on the canvas.
    fn set_position(&mut self, id: NodeId, x: i32, y: i32) -> Result<(), GraphError>;

    /// Sets a named knob (label, file, metadata, ...) on a node.
    fn set_knob(&mut self, id: NodeId, knob: &str, value: &str) -> Result<(), GraphError>;

    /// Number of input slots the node accepts.
    fn max_inputs(&self, id: NodeId) -> usize;

    /// Wires `src`'s output into input `slot` of `dst`.
    fn connect(&mut self, dst: NodeId, slot: usize, src: NodeId) -> Result<(), GraphError>;

    /// Opens an undo group; every mutation until [`Self::end_undo`]
    /// is one user-visible operation.
    fn begin_undo(&mut self, label: &str);

    /// Closes the current undo group.
    fn end_undo(&mut self);
}

/// A node held by [`MemoryGraph`].
#[derive(Debug, Clone, Serialize)]
pub struct MemoryNode {
    pub name: String,
    pub kind: NodeKind,
    pub x: i32,
    pub y: i32,
    /// Knob values keyed by knob name.
    pub knobs: BTreeMap<String, String>,
    /// Input connections, one slot per entry.
    pub inputs: Vec<Option<NodeId>>,
}

/// In-memory [`HostGraph`] implementation.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    nodes: Vec<MemoryNode>,
    undo_depth: usize,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes, in creation order.
    pub fn nodes(&self) -> &[MemoryNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&MemoryNode> {
        self.nodes.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl HostGraph for MemoryGraph {
    fn node_exists(&self, name: &str) -> bool {
        self.find_by_name(name).is_some()
    }

    fn create_node(&mut self, kind: NodeKind, name: &str) -> Result<NodeId, GraphError> {
        if self.node_exists(name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        let id = self.nodes.len();
        self.nodes.push(MemoryNode {
            name: name.to_string(),
            kind,
            x: 0,
            y: 0,
            knobs: BTreeMap::new(),
            inputs: vec![None; kind.max_inputs()],
        });
        debug!("Created {} node '{}'", kind.host_class(), name);
        Ok(id)
    }

    fn set_position(&mut self, id: NodeId, x: i32, y: i32) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(id).ok_or(GraphError::UnknownNode(id))?;
        node.x = x;
        node.y = y;
        Ok(())
    }

    fn set_knob(&mut self, id: NodeId, knob: &str, value: &str) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(id).ok_or(GraphError::UnknownNode(id))?;
        node.knobs.insert(knob.to_string(), value.to_string());
        Ok(())
    }

    fn max_inputs(&self, id: NodeId) -> usize {
        self.nodes.get(id).map(|n| n.kind.max_inputs()).unwrap_or(0)
    }

    fn connect(&mut self, dst: NodeId, slot: usize, src: NodeId) -> Result<(), GraphError> {
        if src >= self.nodes.len() {
            return Err(GraphError::UnknownNode(src));
        }
        let node = self.nodes.get_mut(dst).ok_or(GraphError::UnknownNode(dst))?;
        match node.inputs.get_mut(slot) {
            Some(input) => {
                *input = Some(src);
                Ok(())
            }
            None => Err(GraphError::NoSuchSlot {
                node: node.name.clone(),
                slot,
            }),
        }
    }

    fn begin_undo(&mut self, label: &str) {
        self.undo_depth += 1;
        debug!("Undo group opened: {}", label);
    }

    fn end_undo(&mut self) {
        self.undo_depth = self.undo_depth.saturating_sub(1);
        debug!("Undo group closed");
    }
}
