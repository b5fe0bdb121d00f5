// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph file format.
//!
//! A file holds the id counter and the root graph record. Each graph record
//! lists its boundary fields, its nodes with their field values, the
//! outgoing links of its context as `(local, field, distant, field, slot)`
//! tuples with slot `-1` for a single field, and its subgraphs. Compute
//! orders are not stored; they are recomputed after loading.

use crate::anchor::{AnchorType, AnchorValue, FieldDecl};
use crate::config::EngineConfig;
use crate::graph::{Graph, GraphId, GraphSettings, NodeIdAllocator};
use crate::graphs::boundary;
use crate::link::AnchorRef;
use crate::node::{Node, NodeId, NodeRegistry};
use crate::order;
use crate::session::GraphSession;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current file format version
pub const GRAPH_FORMAT_VERSION: u32 = 1;

/// Error when reading or writing graph files
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Invalid RON
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// RON encoding failed
    #[error("RON encoding error: {0}")]
    RonWrite(#[from] ron::Error),

    /// Invalid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File written by a newer version
    #[error("Graph file version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Newest supported version
        supported: u32,
    },
}

/// A persisted graph tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphFile {
    /// Format version
    pub version: u32,
    /// Next node id to hand out
    pub next_node_id: u32,
    /// Root graph
    pub root: GraphRecord,
}

/// A persisted graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    /// Graph id
    pub id: GraphId,
    /// Owning graph
    #[serde(default)]
    pub parent: Option<GraphId>,
    /// Graph name
    pub name: String,
    /// Generation settings
    #[serde(default)]
    pub settings: GraphSettings,
    /// Input proxy
    pub input: BoundaryRecord,
    /// Output proxy
    pub output: BoundaryRecord,
    /// Nodes, in evaluation order
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    /// Outgoing links of the graph's context
    #[serde(default)]
    pub links: Vec<LinkRecord>,
    /// Child graphs
    #[serde(default)]
    pub subgraphs: Vec<GraphRecord>,
}

/// A persisted boundary proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRecord {
    /// Proxy node id
    pub id: NodeId,
    /// Position in the graph UI
    #[serde(default)]
    pub position: [f32; 2],
    /// Boundary fields
    #[serde(default)]
    pub fields: Vec<BoundaryField>,
}

/// A persisted boundary field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryField {
    /// Field name
    pub name: String,
    /// Field type
    pub anchor_type: AnchorType,
    /// Current value
    #[serde(default)]
    pub value: Option<FieldValue>,
}

/// A persisted node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id
    pub id: NodeId,
    /// Node type id
    pub type_id: String,
    /// Display name
    pub name: String,
    /// Position in the graph UI
    #[serde(default)]
    pub position: [f32; 2],
    /// Field values
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
}

/// A persisted field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    /// Field name
    pub name: String,
    /// Stored value
    pub value: AnchorValue,
    /// Addressable slot count of a multiple field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_value_count: Option<usize>,
}

/// A persisted link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Source node
    pub local_id: NodeId,
    /// Source field
    pub local_field: String,
    /// Target node
    pub distant_id: NodeId,
    /// Target field
    pub distant_field: String,
    /// Target slot, `-1` for a single field
    pub distant_slot: i32,
}

impl GraphFile {
    /// Parse RON text
    pub fn from_ron(content: &str) -> Result<Self, PersistenceError> {
        Self::checked(ron::from_str(content)?)
    }

    /// Encode as pretty RON
    pub fn to_ron(&self) -> Result<String, PersistenceError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Parse JSON text
    pub fn from_json(content: &str) -> Result<Self, PersistenceError> {
        Self::checked(serde_json::from_str(content)?)
    }

    /// Encode as pretty JSON
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn checked(file: GraphFile) -> Result<Self, PersistenceError> {
        if file.version > GRAPH_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: file.version,
                supported: GRAPH_FORMAT_VERSION,
            });
        }
        Ok(file)
    }

    /// Load a file, JSON when the extension is `json`, RON otherwise
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let content = std::fs::read_to_string(path)?;
        if is_json(path) {
            Self::from_json(&content)
        } else {
            Self::from_ron(&content)
        }
    }

    /// Save a file, JSON when the extension is `json`, RON otherwise
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let content = if is_json(path) {
            self.to_json()?
        } else {
            self.to_ron()?
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn boundary_record(node: &Node) -> BoundaryRecord {
    BoundaryRecord {
        id: node.id(),
        position: node.position,
        fields: node
            .anchors()
            .iter()
            .map(|anchor| BoundaryField {
                name: anchor.field_name.clone(),
                anchor_type: anchor.anchor_type.clone(),
                value: anchor.single().cloned(),
            })
            .collect(),
    }
}

fn node_record(node: &Node) -> NodeRecord {
    NodeRecord {
        id: node.id(),
        type_id: node.type_id().to_string(),
        name: node.name.clone(),
        position: node.position,
        fields: node
            .anchors()
            .iter()
            .map(|anchor| FieldRecord {
                name: anchor.field_name.clone(),
                value: anchor.value().clone(),
                multiple_value_count: anchor
                    .is_multiple()
                    .then(|| anchor.multiple_value_count()),
            })
            .collect(),
    }
}

/// Record of a graph and its subgraphs
pub fn graph_record(graph: &Graph) -> GraphRecord {
    GraphRecord {
        id: graph.id(),
        parent: graph.parent(),
        name: graph.name.clone(),
        settings: graph.settings,
        input: boundary_record(graph.input_node()),
        output: boundary_record(graph.output_node()),
        nodes: graph.nodes().map(node_record).collect(),
        links: graph
            .outgoing_links()
            .into_iter()
            .map(|link| LinkRecord {
                local_id: link.local_node,
                local_field: link.local_field.clone(),
                distant_id: link.distant_node,
                distant_field: link.distant_field.clone(),
                distant_slot: link.distant_slot.map_or(-1, |slot| slot as i32),
            })
            .collect(),
        subgraphs: graph.subgraphs().iter().map(graph_record).collect(),
    }
}

fn restore_boundary(mut node: Node, record: &BoundaryRecord) -> Node {
    node.position = record.position;
    for field in &record.fields {
        node.push_field(&FieldDecl::pass_through(&field.name, field.anchor_type.clone()));
        if let Err(err) = node.set_field(&field.name, field.value.clone()) {
            tracing::warn!("Boundary field {} not restored: {err}", field.name);
        }
    }
    node
}

fn restore_node(registry: &NodeRegistry, record: &NodeRecord) -> Option<Node> {
    let Some(descriptor) = registry.get(&record.type_id) else {
        tracing::warn!(
            "Unknown node type {}, skipping node {}",
            record.type_id,
            record.id
        );
        return None;
    };
    let mut node = Node::new(record.id, descriptor);
    node.name = record.name.clone();
    node.position = record.position;
    node.restore_anchors(|anchors, accessors, next_id| {
        for field in &record.fields {
            let Some(anchor) = accessors
                .get(&field.name)
                .and_then(|accessor| anchors.get_mut(accessor.index))
            else {
                tracing::warn!("Node {} has no field {}, value dropped", record.id, field.name);
                continue;
            };
            if let Err(err) = anchor.restore(field.value.clone(), field.multiple_value_count, &mut *next_id) {
                tracing::warn!("Field {}.{} not restored: {err}", record.id, field.name);
            }
        }
    });
    Some(node)
}

/// Rebuild a graph tree from its record
pub fn build_graph(record: &GraphRecord, registry: &NodeRegistry) -> Graph {
    let input = restore_boundary(boundary::input_proxy(record.input.id), &record.input);
    let output = restore_boundary(boundary::output_proxy(record.output.id), &record.output);
    let mut graph = Graph::from_parts(
        record.id,
        record.name.clone(),
        record.settings,
        record.parent,
        input,
        output,
    );

    for subgraph in &record.subgraphs {
        graph.add_subgraph(build_graph(subgraph, registry));
    }
    for node in &record.nodes {
        if let Some(node) = restore_node(registry, node) {
            graph.push_node(node);
        }
    }
    for link in &record.links {
        if link.distant_slot < -1 {
            tracing::warn!(
                graph = %record.name,
                "Skipping link {}.{} -> {}.{} with invalid slot {}",
                link.local_id,
                link.local_field,
                link.distant_id,
                link.distant_field,
                link.distant_slot
            );
            continue;
        }
        let from = AnchorRef::field(link.local_id, link.local_field.clone());
        let to = AnchorRef {
            node: link.distant_id,
            field: link.distant_field.clone(),
            slot: usize::try_from(link.distant_slot).ok(),
        };
        if let Err(err) = graph.links().link(&from, &to) {
            tracing::warn!(
                graph = %record.name,
                "Skipping stale link {}.{} -> {}.{}: {err}",
                link.local_id,
                link.local_field,
                link.distant_id,
                link.distant_field
            );
        }
    }
    graph
}

impl GraphSession {
    /// Persistable state of the whole tree
    pub fn snapshot(&self) -> GraphFile {
        GraphFile {
            version: GRAPH_FORMAT_VERSION,
            next_node_id: self.next_node_id(),
            root: graph_record(self.root()),
        }
    }

    /// Rebuild a session from a file. Nodes of unknown types and links
    /// that no longer resolve are skipped with a warning.
    pub fn from_file(
        file: &GraphFile,
        registry: NodeRegistry,
        config: EngineConfig,
    ) -> Result<Self, PersistenceError> {
        let file = GraphFile::checked(file.clone())?;
        let mut root = build_graph(&file.root, &registry);
        if order::evaluate_tree(&mut root, config.max_dependency_depth).is_err() {
            tracing::warn!(graph = %root.name, "Loaded graph left dirty");
        }
        let mut ids = NodeIdAllocator::starting_at(file.next_node_id);
        ids.observe(root.max_node_id());
        Ok(Self::from_parts(root, registry, config, ids))
    }
}
