//! Workflow Document Model
//!
//! Structural parsing of the external tool's node-graph export
//! (LiteGraph-style JSON). The format varies between exporter
//! versions, so parsing is deliberately lenient: the node and link
//! lists may sit at the top level or one level down under a wrapper
//! key, links come as fixed-position arrays or keyed maps, and
//! malformed individual entries are dropped rather than failing the
//! document.
//!
//! # Expected Shape
//!
//! ```json
//! {
//!   "nodes": [{"id": 1, "type": "LoadImage", "pos": [80, 200], ...}],
//!   "links": [[5, 1, 0, 2, 0, "IMAGE"]]
//! }
//! ```

use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;

/// Wrapper keys some exports nest the graph under.
const WRAPPER_KEYS: &[&str] = &["graph", "workflow"];

/// User-facing import failures.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("could not read workflow file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse workflow JSON: {0}. Check the file format.")]
    Json(#[from] serde_json::Error),

    #[error("workflow document is not a JSON object")]
    NotAnObject,

    #[error("no nodes found in the workflow document")]
    NoNodes,
}

/// A node as exported by the external tool.
#[derive(Debug, Clone)]
pub struct ExternalNode {
    /// Export-local integer id, used to resolve links.
    pub id: i64,
    /// Declared type name (`type` or `class_type`), `"Unknown"` if absent.
    pub type_name: String,
    /// Canvas position, when usable.
    pub pos: Option<(f64, f64)>,
    /// First string widget value; loader nodes keep their file path here.
    pub file_hint: Option<String>,
    /// The original JSON entry, carried through unmodified.
    pub raw: Value,
}

/// A connection between two exported nodes. Slots default to 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    pub src_id: i64,
    pub src_slot: i64,
    pub dst_id: i64,
    pub dst_slot: i64,
}

/// A parsed workflow document: nodes plus the links between them.
#[derive(Debug, Clone)]
pub struct WorkflowDoc {
    pub nodes: Vec<ExternalNode>,
    pub links: Vec<ExternalLink>,
}

impl WorkflowDoc {
    /// Parses a document from JSON text.
    pub fn parse_str(text: &str) -> Result<Self, ImportError> {
        let data: Value = serde_json::from_str(text)?;
        Self::from_json(&data)
    }

    /// Parses an already-deserialized document.
    ///
    /// Tolerates the node/link lists at the top level or nested one
    /// level under `graph`/`workflow`. Fails only when no node list
    /// can be found at all.
    pub fn from_json(data: &Value) -> Result<Self, ImportError> {
        let top = data.as_object().ok_or(ImportError::NotAnObject)?;

        let mut nodes_value = top.get("nodes");
        let mut links_value = top.get("links");

        if !has_entries(nodes_value) {
            for key in WRAPPER_KEYS {
                if let Some(inner) = top.get(*key).and_then(Value::as_object) {
                    if has_entries(inner.get("nodes")) {
                        debug!("Workflow nested under '{}'", key);
                        nodes_value = inner.get("nodes");
                        links_value = inner.get("links");
                        break;
                    }
                }
            }
        }

        let node_entries = nodes_value
            .and_then(Value::as_array)
            .filter(|entries| !entries.is_empty())
            .ok_or(ImportError::NoNodes)?;

        let nodes: Vec<ExternalNode> = node_entries.iter().filter_map(parse_node).collect();
        if nodes.is_empty() {
            return Err(ImportError::NoNodes);
        }

        let links = links_value
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(parse_link).collect())
            .unwrap_or_default();

        Ok(Self { nodes, links })
    }
}

fn has_entries(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false)
}

/// Parses one node entry. Entries without an integer id are dropped.
fn parse_node(entry: &Value) -> Option<ExternalNode> {
    let id = match entry.get("id").and_then(Value::as_i64) {
        Some(id) => id,
        None => {
            warn!("Skipping node without an integer id: {}", entry);
            return None;
        }
    };

    let type_name = entry
        .get("type")
        .or_else(|| entry.get("class_type"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();

    let pos = entry
        .get("pos")
        .or_else(|| entry.get("position"))
        .and_then(Value::as_array)
        .and_then(|coords| {
            let x = coords.first().and_then(Value::as_f64)?;
            let y = coords.get(1).and_then(Value::as_f64)?;
            Some((x, y))
        });

    let file_hint = entry
        .get("widgets_values")
        .and_then(Value::as_array)
        .and_then(|widgets| widgets.first())
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(ExternalNode {
        id,
        type_name,
        pos,
        file_hint,
        raw: entry.clone(),
    })
}

/// Parses one link entry, array or keyed form. Malformed entries are
/// dropped so the rest of the batch survives.
fn parse_link(entry: &Value) -> Option<ExternalLink> {
    match entry {
        // LiteGraph: [link_id, src_id, src_slot, dst_id, dst_slot, ...]
        Value::Array(fields) if fields.len() >= 5 => {
            let src_id = fields[1].as_i64()?;
            let dst_id = fields[3].as_i64()?;
            Some(ExternalLink {
                src_id,
                src_slot: slot_value(Some(&fields[2])),
                dst_id,
                dst_slot: slot_value(Some(&fields[4])),
            })
        }
        Value::Object(map) => {
            let src_id = first_of(map, &["from", "src", "output"])?.as_i64()?;
            let dst_id = first_of(map, &["to", "dst", "input"])?.as_i64()?;
            Some(ExternalLink {
                src_id,
                src_slot: slot_value(first_of(map, &["from_slot", "src_slot"])),
                dst_id,
                dst_slot: slot_value(first_of(map, &["to_slot", "dst_slot"])),
            })
        }
        _ => {
            debug!("Skipping malformed link entry: {}", entry);
            None
        }
    }
}

fn first_of<'a>(map: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| map.get(*key))
}

/// Slot indices default to 0; exporters sometimes emit them as floats.
fn slot_value(value: Option<&Value>) -> i64 {
    match value {
        Some(v) => v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)).unwrap_or(0),
        None => 0,
    }
}
