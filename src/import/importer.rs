//! Workflow Import
//!
//! Translates a parsed workflow document into host nodes and
//! connections: one host node per external node (mapped kind or
//! labelled placeholder), positioned from the export's canvas
//! coordinates, then rewired from the export's link list.
//!
//! The whole pass is wrapped in one undo group and is aggressively
//! partial-failure tolerant: a node that cannot be created falls back
//! to a placeholder, a link that cannot be resolved is skipped, and
//! metadata tagging failures are logged and ignored. One bad entry
//! never sinks the batch.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::host::{HostGraph, NodeId, NodeKind};

use super::mapping::kind_for;
use super::model::{ExternalLink, ExternalNode, ImportError, WorkflowDoc};

/// Directory (under the user's home) for default render outputs.
const DEFAULT_OUTPUT_DIR: &str = "ComfyBridge_Output";

/// Default colorspace tag for write-like nodes.
const DEFAULT_COLORSPACE: &str = "sRGB";

/// Name prefix for imported nodes.
const NAME_PREFIX: &str = "CU_";

/// Result of an import pass, reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub nodes_created: usize,
    pub links_connected: usize,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Imported {} nodes, connected {} links.",
            self.nodes_created, self.links_connected
        )
    }
}

/// Imports a workflow JSON file into the graph.
///
/// Read and parse failures abort before any graph mutation.
pub fn import_file<G: HostGraph>(graph: &mut G, path: &Path) -> Result<ImportSummary, ImportError> {
    let text = fs::read_to_string(path).map_err(|source| ImportError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let doc = WorkflowDoc::parse_str(&text)?;
    Ok(import_workflow(graph, &doc))
}

/// Imports an already-parsed document into the graph.
///
/// Creates all nodes first, then resolves links among the nodes
/// created in this same pass. Sequential, single pass, no retries.
pub fn import_workflow<G: HostGraph>(graph: &mut G, doc: &WorkflowDoc) -> ImportSummary {
    graph.begin_undo("Import ComfyUI Workflow");

    let mut created: HashMap<i64, NodeId> = HashMap::new();
    for node in &doc.nodes {
        match create_host_node(graph, node) {
            Some(id) => {
                created.insert(node.id, id);
            }
            None => warn!(
                "Skipping node {} ('{}'): could not create a host node for it",
                node.id, node.type_name
            ),
        }
    }

    let links_connected = connect_links(graph, &doc.links, &created);

    graph.end_undo();

    let summary = ImportSummary {
        nodes_created: created.len(),
        links_connected,
    };
    info!("{}", summary);
    summary
}

/// Creates one host node for an external node, with defaults,
/// position, and metadata applied. Falls back to a placeholder when
/// the mapped kind cannot be created; returns `None` only when even
/// the placeholder fails.
fn create_host_node<G: HostGraph>(graph: &mut G, node: &ExternalNode) -> Option<NodeId> {
    let mapped = kind_for(&node.type_name);
    let name = unique_name(graph, &format!("{}{}", NAME_PREFIX, node.type_name));

    let (id, kind) = match graph.create_node(mapped, &name) {
        Ok(id) => (id, mapped),
        Err(e) => {
            warn!(
                "Could not create {} node for '{}': {}. Falling back to a placeholder.",
                mapped.host_class(),
                node.type_name,
                e
            );
            match graph.create_node(NodeKind::Placeholder, &name) {
                Ok(id) => (id, NodeKind::Placeholder),
                Err(e) => {
                    warn!("Placeholder creation failed for '{}': {}", name, e);
                    return None;
                }
            }
        }
    };

    apply_defaults(graph, id, kind, &name, node);

    let (x, y) = node
        .pos
        .map(|(x, y)| (x as i32, y as i32))
        .unwrap_or((0, 0));
    if let Err(e) = graph.set_position(id, x, y) {
        warn!("Could not position '{}': {}", name, e);
    }

    tag_metadata(graph, id, node);

    Some(id)
}

/// Light per-kind defaults so imported nodes are usable immediately.
fn apply_defaults<G: HostGraph>(
    graph: &mut G,
    id: NodeId,
    kind: NodeKind,
    name: &str,
    node: &ExternalNode,
) {
    // The original type always shows on the node label.
    if let Err(e) = graph.set_knob(id, "label", &node.type_name) {
        warn!("Could not set label on '{}': {}", name, e);
    }

    match kind {
        NodeKind::ReadLike => {
            if let Some(ref file) = node.file_hint {
                // Relative paths are kept as-is; the user adjusts the root.
                if let Err(e) = graph.set_knob(id, "file", file) {
                    warn!("Could not set file on '{}': {}", name, e);
                }
            }
        }
        NodeKind::WriteLike => {
            let out_path = default_output_path(name);
            if let Err(e) = graph.set_knob(id, "file", &out_path) {
                warn!("Could not set output path on '{}': {}", name, e);
            }
            if let Err(e) = graph.set_knob(id, "colorspace", DEFAULT_COLORSPACE) {
                warn!("Could not set colorspace on '{}': {}", name, e);
            }
        }
        NodeKind::Placeholder => {}
    }
}

/// Default render path under the user's home, created best-effort.
fn default_output_path(node_name: &str) -> String {
    let out_dir = dirs::home_dir()
        .unwrap_or_else(env::temp_dir)
        .join(DEFAULT_OUTPUT_DIR);

    if let Err(e) = fs::create_dir_all(&out_dir) {
        debug!("Could not create output directory {}: {}", out_dir.display(), e);
    }

    out_dir
        .join(format!("{}.####.png", node_name))
        .display()
        .to_string()
        .replace('\\', "/")
}

/// Tags a node with its original type and JSON entry so richer
/// mappings can pick them up later. Non-fatal on failure.
fn tag_metadata<G: HostGraph>(graph: &mut G, id: NodeId, node: &ExternalNode) {
    if let Err(e) = graph.set_knob(id, "comfy_type", &node.type_name) {
        warn!("Could not tag comfy_type on node {}: {}", node.id, e);
    }
    match serde_json::to_string(&node.raw) {
        Ok(raw) => {
            if let Err(e) = graph.set_knob(id, "comfy_json", &raw) {
                warn!("Could not tag comfy_json on node {}: {}", node.id, e);
            }
        }
        Err(e) => warn!("Could not serialize node {} for tagging: {}", node.id, e),
    }
}

/// Reconnects nodes created in this pass. Returns how many links were
/// actually connected; everything unresolvable is skipped, never fatal.
fn connect_links<G: HostGraph>(
    graph: &mut G,
    links: &[ExternalLink],
    created: &HashMap<i64, NodeId>,
) -> usize {
    let mut connected = 0;

    for link in links {
        let (Some(&src), Some(&dst)) = (created.get(&link.src_id), created.get(&link.dst_id))
        else {
            debug!(
                "Skipping link {} -> {}: endpoint not part of this import",
                link.src_id, link.dst_id
            );
            continue;
        };

        let max_inputs = graph.max_inputs(dst);
        if max_inputs == 0 {
            debug!(
                "Skipping link {} -> {}: destination accepts no inputs",
                link.src_id, link.dst_id
            );
            continue;
        }

        // Negative and out-of-range slots clamp to 0. Exports disagree
        // on slot numbering, so lenient wiring beats a rejected link.
        let slot = if link.dst_slot < 0 || link.dst_slot as usize >= max_inputs {
            0
        } else {
            link.dst_slot as usize
        };

        match graph.connect(dst, slot, src) {
            Ok(()) => connected += 1,
            Err(e) => debug!("Could not connect {} -> {}: {}", link.src_id, link.dst_id, e),
        }
    }

    connected
}

/// De-duplicates a node name against the host namespace by appending
/// a numeric suffix until unique.
fn unique_name<G: HostGraph>(graph: &G, base: &str) -> String {
    if !graph.node_exists(base) {
        return base.to_string();
    }
    let mut index = 1;
    loop {
        index += 1;
        let candidate = format!("{}_{}", base, index);
        if !graph.node_exists(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{GraphError, MemoryGraph};
    use serde_json::json;

    fn three_node_doc() -> WorkflowDoc {
        WorkflowDoc::from_json(&json!({
            "nodes": [
                {"id": 1, "type": "LoadImage", "pos": [10.7, 20.2], "widgets_values": ["cat.png"]},
                {"id": 2, "type": "Unknown", "pos": [200.0, 20.0]},
                {"id": 3, "type": "SaveImage", "pos": [400.0, 20.0]}
            ],
            "links": [
                [1, 1, 0, 2, 0],
                [2, 2, 0, 3, 0]
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_three_node_import() {
        let mut graph = MemoryGraph::new();
        let summary = import_workflow(&mut graph, &three_node_doc());

        assert_eq!(summary.nodes_created, 3);
        assert_eq!(summary.links_connected, 2);

        let read = graph.find_by_name("CU_LoadImage").unwrap();
        let noop = graph.find_by_name("CU_Unknown").unwrap();
        let write = graph.find_by_name("CU_SaveImage").unwrap();

        assert_eq!(graph.node(read).unwrap().kind, NodeKind::ReadLike);
        assert_eq!(graph.node(noop).unwrap().kind, NodeKind::Placeholder);
        assert_eq!(graph.node(write).unwrap().kind, NodeKind::WriteLike);

        assert_eq!(graph.node(noop).unwrap().inputs[0], Some(read));
        assert_eq!(graph.node(write).unwrap().inputs[0], Some(noop));
    }

    #[test]
    fn test_positions_are_truncated_to_ints() {
        let mut graph = MemoryGraph::new();
        import_workflow(&mut graph, &three_node_doc());

        let read = graph.node(graph.find_by_name("CU_LoadImage").unwrap()).unwrap();
        assert_eq!((read.x, read.y), (10, 20));
    }

    #[test]
    fn test_missing_position_defaults_to_origin() {
        let mut graph = MemoryGraph::new();
        let doc = WorkflowDoc::from_json(&json!({
            "nodes": [{"id": 1, "type": "Anything"}]
        }))
        .unwrap();
        import_workflow(&mut graph, &doc);

        let node = graph.node(0).unwrap();
        assert_eq!((node.x, node.y), (0, 0));
    }

    #[test]
    fn test_defaults_and_metadata() {
        let mut graph = MemoryGraph::new();
        import_workflow(&mut graph, &three_node_doc());

        let read = graph.node(graph.find_by_name("CU_LoadImage").unwrap()).unwrap();
        assert_eq!(read.knobs.get("file").map(String::as_str), Some("cat.png"));
        assert_eq!(read.knobs.get("label").map(String::as_str), Some("LoadImage"));
        assert_eq!(
            read.knobs.get("comfy_type").map(String::as_str),
            Some("LoadImage")
        );
        assert!(read.knobs.get("comfy_json").unwrap().contains("\"id\":1"));

        let write = graph.node(graph.find_by_name("CU_SaveImage").unwrap()).unwrap();
        let out_file = write.knobs.get("file").unwrap();
        assert!(out_file.contains("ComfyBridge_Output"));
        assert!(out_file.ends_with("CU_SaveImage.####.png"));
        assert_eq!(
            write.knobs.get("colorspace").map(String::as_str),
            Some(DEFAULT_COLORSPACE)
        );
    }

    #[test]
    fn test_link_to_missing_node_is_skipped() {
        let mut graph = MemoryGraph::new();
        let doc = WorkflowDoc::from_json(&json!({
            "nodes": [{"id": 1, "type": "A"}, {"id": 2, "type": "B"}],
            "links": [
                [1, 1, 0, 99, 0],  // dangling destination
                [2, 99, 0, 2, 0],  // dangling source
                [3, 1, 0, 2, 0]
            ]
        }))
        .unwrap();

        let summary = import_workflow(&mut graph, &doc);
        assert_eq!(summary.nodes_created, 2);
        assert_eq!(summary.links_connected, 1);
    }

    #[test]
    fn test_link_into_zero_input_destination_is_skipped() {
        let mut graph = MemoryGraph::new();
        let doc = WorkflowDoc::from_json(&json!({
            "nodes": [{"id": 1, "type": "Unknown"}, {"id": 2, "type": "LoadImage"}],
            "links": [[1, 1, 0, 2, 0]]
        }))
        .unwrap();

        let summary = import_workflow(&mut graph, &doc);
        assert_eq!(summary.nodes_created, 2);
        assert_eq!(summary.links_connected, 0);
    }

    #[test]
    fn test_out_of_range_slots_clamp_to_zero() {
        let mut graph = MemoryGraph::new();
        let doc = WorkflowDoc::from_json(&json!({
            "nodes": [{"id": 1, "type": "A"}, {"id": 2, "type": "B"}, {"id": 3, "type": "C"}],
            "links": [
                [1, 1, 0, 2, 7],   // overflowing slot
                [2, 2, 0, 3, -4]   // negative slot
            ]
        }))
        .unwrap();

        let summary = import_workflow(&mut graph, &doc);
        assert_eq!(summary.links_connected, 2);
        assert_eq!(graph.node(1).unwrap().inputs[0], Some(0));
        assert_eq!(graph.node(2).unwrap().inputs[0], Some(1));
    }

    #[test]
    fn test_reimport_suffixes_names() {
        let mut graph = MemoryGraph::new();
        import_workflow(&mut graph, &three_node_doc());
        let summary = import_workflow(&mut graph, &three_node_doc());

        assert_eq!(summary.nodes_created, 3);
        assert_eq!(summary.links_connected, 2);
        assert!(graph.node_exists("CU_LoadImage"));
        assert!(graph.node_exists("CU_LoadImage_2"));
        assert!(graph.node_exists("CU_SaveImage_2"));

        // Second import wires its own copies, not the first batch's.
        let noop2 = graph.find_by_name("CU_Unknown_2").unwrap();
        let read2 = graph.find_by_name("CU_LoadImage_2").unwrap();
        assert_eq!(graph.node(noop2).unwrap().inputs[0], Some(read2));
    }

    #[test]
    fn test_unique_name_counts_upward() {
        let mut graph = MemoryGraph::new();
        graph.create_node(NodeKind::Placeholder, "CU_X").unwrap();
        graph.create_node(NodeKind::Placeholder, "CU_X_2").unwrap();
        assert_eq!(unique_name(&graph, "CU_X"), "CU_X_3");
        assert_eq!(unique_name(&graph, "CU_Y"), "CU_Y");
    }

    #[test]
    fn test_import_file_missing() {
        let mut graph = MemoryGraph::new();
        let result = import_file(&mut graph, Path::new("/nonexistent/workflow.json"));
        assert!(matches!(result, Err(ImportError::Read { .. })));
        assert!(graph.is_empty()); // no partial side effects
    }

    #[test]
    fn test_import_file_round_trip() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"nodes": [{{"id": 1, "type": "LoadImage"}}], "links": []}}"#
        )
        .unwrap();

        let mut graph = MemoryGraph::new();
        let summary = import_file(&mut graph, &path).unwrap();
        assert_eq!(summary.nodes_created, 1);
        assert_eq!(summary.links_connected, 0);
    }

    /// Graph that refuses to create anything but placeholders, to
    /// exercise the per-node fallback path.
    struct PlaceholderOnlyGraph(MemoryGraph);

    impl HostGraph for PlaceholderOnlyGraph {
        fn node_exists(&self, name: &str) -> bool {
            self.0.node_exists(name)
        }
        fn create_node(&mut self, kind: NodeKind, name: &str) -> Result<NodeId, GraphError> {
            if kind != NodeKind::Placeholder {
                return Err(GraphError::DuplicateName(name.to_string()));
            }
            self.0.create_node(kind, name)
        }
        fn set_position(&mut self, id: NodeId, x: i32, y: i32) -> Result<(), GraphError> {
            self.0.set_position(id, x, y)
        }
        fn set_knob(&mut self, id: NodeId, knob: &str, value: &str) -> Result<(), GraphError> {
            self.0.set_knob(id, knob, value)
        }
        fn max_inputs(&self, id: NodeId) -> usize {
            self.0.max_inputs(id)
        }
        fn connect(&mut self, dst: NodeId, slot: usize, src: NodeId) -> Result<(), GraphError> {
            self.0.connect(dst, slot, src)
        }
        fn begin_undo(&mut self, label: &str) {
            self.0.begin_undo(label)
        }
        fn end_undo(&mut self) {
            self.0.end_undo()
        }
    }

    #[test]
    fn test_node_creation_failure_falls_back_to_placeholder() {
        let mut graph = PlaceholderOnlyGraph(MemoryGraph::new());
        let summary = import_workflow(&mut graph, &three_node_doc());

        // All three still come through, as placeholders.
        assert_eq!(summary.nodes_created, 3);
        for node in graph.0.nodes() {
            assert_eq!(node.kind, NodeKind::Placeholder);
        }
    }
}
