// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editing session: the graph tree plus the context gestures apply to.
//!
//! The session owns the root graph, the path of subgraphs the user entered,
//! the node registry, the id counter and the link being dragged. Gestures
//! (create, delete, link) act on the current graph; a tick always
//! evaluates the whole tree from the root.

use crate::anchor::{AssignError, SlotError};
use crate::config::EngineConfig;
use crate::evaluation::{self, PassStats};
use crate::graph::{Graph, GraphId, NodeIdAllocator};
use crate::link::{self, AnchorRef, AttachError, Link};
use crate::node::{Node, NodeId, NodeRegistry};
use crate::order::{self, EvaluationError};
use crate::value::FieldValue;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Error of a session operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// No node type with this id in the registry
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Node not found in the current graph
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Subgraph not found in the current graph
    #[error("Graph not found: {0}")]
    GraphNotFound(GraphId),

    /// Exit requested at the root graph
    #[error("Already at the root graph")]
    NotInSubgraph,

    /// Link completion without a drag in progress
    #[error("No link drag in progress")]
    NoLinkDrag,

    /// Link creation failed
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// Slot creation failed
    #[error(transparent)]
    Slot(#[from] SlotError),

    /// Field write failed
    #[error(transparent)]
    Assign(#[from] AssignError),
}

/// An editing session over one graph tree
#[derive(Debug)]
pub struct GraphSession {
    root: Graph,
    path: Vec<GraphId>,
    registry: NodeRegistry,
    ids: NodeIdAllocator,
    config: EngineConfig,
    link_drag: Option<AnchorRef>,
    pass: u64,
}

impl GraphSession {
    /// Create a session with an empty root graph
    pub fn new(registry: NodeRegistry, config: EngineConfig) -> Self {
        let mut ids = NodeIdAllocator::new();
        let root = Graph::new("Root", config.default_graph_settings, &mut ids);
        Self::from_parts(root, registry, config, ids)
    }

    pub(crate) fn from_parts(
        mut root: Graph,
        registry: NodeRegistry,
        config: EngineConfig,
        ids: NodeIdAllocator,
    ) -> Self {
        root.set_max_depth(config.max_dependency_depth);
        Self {
            root,
            path: Vec::new(),
            registry,
            ids,
            config,
            link_drag: None,
            pass: 0,
        }
    }

    /// Root of the graph tree
    pub fn root(&self) -> &Graph {
        &self.root
    }

    /// Mutable root of the graph tree
    pub fn root_mut(&mut self) -> &mut Graph {
        &mut self.root
    }

    /// Node types available to this session
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subgraphs entered from the root, outermost first
    pub fn path(&self) -> &[GraphId] {
        &self.path
    }

    /// Next node id the session will hand out
    pub fn next_node_id(&self) -> u32 {
        self.ids.peek()
    }

    /// Number of passes run so far
    pub fn pass_count(&self) -> u64 {
        self.pass
    }

    /// Graph gestures apply to
    pub fn current_graph(&self) -> &Graph {
        let mut graph = &self.root;
        for id in &self.path {
            match graph.subgraph(*id) {
                Some(subgraph) => graph = subgraph,
                None => break,
            }
        }
        graph
    }

    /// Mutable graph gestures apply to
    pub fn current_graph_mut(&mut self) -> &mut Graph {
        let mut graph = &mut self.root;
        for id in &self.path {
            let Some(index) = graph.subgraphs.iter().position(|g| g.id() == *id) else {
                break;
            };
            graph = &mut graph.subgraphs[index];
        }
        graph
    }

    /// Instantiate a node type in the current graph
    pub fn create_node(&mut self, type_id: &str) -> Result<NodeId, SessionError> {
        self.create_node_at(type_id, [0.0, 0.0])
    }

    /// Instantiate a node type in the current graph at a position
    pub fn create_node_at(&mut self, type_id: &str, position: [f32; 2]) -> Result<NodeId, SessionError> {
        let descriptor = self
            .registry
            .get(type_id)
            .ok_or_else(|| SessionError::UnknownNodeType(type_id.to_string()))?;
        let mut node = Node::new(self.ids.allocate(), descriptor);
        node.position = position;
        node.create();
        let id = self.current_graph_mut().add_node(node);
        tracing::debug!("Created {type_id} node {id}");
        Ok(id)
    }

    /// Delete a node of the current graph and every link touching it
    pub fn delete_node(&mut self, id: NodeId) -> Result<Node, SessionError> {
        if self.link_drag.as_ref().is_some_and(|drag| drag.node == id) {
            self.link_drag = None;
        }
        self.current_graph_mut()
            .remove_node(id)
            .ok_or(SessionError::NodeNotFound(id))
    }

    /// Write a single field of a node in the current graph
    pub fn set_field(&mut self, id: NodeId, field: &str, value: FieldValue) -> Result<(), SessionError> {
        self.current_graph_mut()
            .resolve_mut(id)
            .ok_or(SessionError::NodeNotFound(id))?
            .set_field(field, Some(value))?;
        Ok(())
    }

    /// Grow a multiple field of a node in the current graph
    pub fn add_anchor_slot(&mut self, id: NodeId, field: &str) -> Result<usize, SessionError> {
        Ok(self
            .current_graph_mut()
            .resolve_mut(id)
            .ok_or(SessionError::NodeNotFound(id))?
            .add_anchor_slot(field)?)
    }

    /// Start dragging a link from an anchor
    pub fn begin_link_drag(&mut self, anchor: AnchorRef) -> Result<(), SessionError> {
        let graph = self.current_graph();
        let node = graph
            .resolve(anchor.node)
            .ok_or(SessionError::NodeNotFound(anchor.node))?;
        if node.anchor(&anchor.field).is_none() {
            return Err(AttachError::FieldNotFound {
                node: anchor.node,
                field: anchor.field,
            }
            .into());
        }
        if !link::is_linkable(graph, &anchor) {
            return Err(AttachError::IncompatibleDirections.into());
        }
        self.link_drag = Some(anchor);
        Ok(())
    }

    /// Drop the dragged link on an anchor, creating the link
    pub fn complete_link_drag(&mut self, anchor: AnchorRef) -> Result<Link, SessionError> {
        let origin = self.link_drag.take().ok_or(SessionError::NoLinkDrag)?;
        Ok(self.current_graph_mut().attach(&origin, &anchor)?)
    }

    /// Abandon the dragged link. Returns false when no drag was in progress.
    pub fn cancel_link_drag(&mut self) -> bool {
        self.link_drag.take().is_some()
    }

    /// Whether a link is being dragged
    pub fn is_dragging_link(&self) -> bool {
        self.link_drag.is_some()
    }

    /// Anchor the drag started from
    pub fn link_drag(&self) -> Option<&AnchorRef> {
        self.link_drag.as_ref()
    }

    /// Every anchor slot of the current graph the dragged link could be
    /// dropped on
    pub fn linkable_anchors(&self) -> Vec<AnchorRef> {
        let Some(origin) = &self.link_drag else {
            return Vec::new();
        };
        let graph = self.current_graph();
        let mut targets = Vec::new();
        for id in graph.resolvable_ids() {
            let Some(node) = graph.resolve(id) else {
                continue;
            };
            for anchor in node.anchors() {
                let slots: Vec<Option<usize>> = if anchor.is_multiple() {
                    (0..anchor.multiple_value_count()).map(Some).collect()
                } else {
                    vec![None]
                };
                for slot in slots {
                    let candidate = AnchorRef {
                        node: id,
                        field: anchor.field_name.clone(),
                        slot,
                    };
                    if link::validate(graph, origin, &candidate).is_ok() {
                        targets.push(candidate);
                    }
                }
            }
        }
        targets
    }

    /// Remove a link of the current graph given either of its records
    pub fn detach_link(&mut self, link: &Link) -> bool {
        self.current_graph_mut().detach(link)
    }

    /// Create an empty subgraph in the current graph
    pub fn create_subgraph(&mut self, name: &str) -> GraphId {
        let graph = Graph::new(name, self.current_graph().settings, &mut self.ids);
        let id = self.current_graph_mut().add_subgraph(graph);
        tracing::debug!("Created subgraph {name} ({id})");
        id
    }

    /// Remove a subgraph of the current graph
    pub fn remove_subgraph(&mut self, id: GraphId) -> Result<Graph, SessionError> {
        self.current_graph_mut()
            .remove_subgraph(id)
            .ok_or(SessionError::GraphNotFound(id))
    }

    /// Make a subgraph of the current graph the current graph
    pub fn enter_subgraph(&mut self, id: GraphId) -> Result<(), SessionError> {
        if self.current_graph().subgraph(id).is_none() {
            return Err(SessionError::GraphNotFound(id));
        }
        self.link_drag = None;
        self.path.push(id);
        Ok(())
    }

    /// Go back to the parent graph, returning the id of the graph left
    pub fn exit_subgraph(&mut self) -> Result<GraphId, SessionError> {
        let id = self.path.pop().ok_or(SessionError::NotInSubgraph)?;
        self.link_drag = None;
        Ok(id)
    }

    /// Run the enable hook of every node and compute the order of every graph
    pub fn enable(&mut self) -> Result<(), EvaluationError> {
        self.root.for_each_node_mut(&mut |node| node.enable());
        order::evaluate_tree(&mut self.root, self.config.max_dependency_depth)
    }

    /// Run one evaluation pass over the whole tree
    pub fn tick(&mut self) -> PassStats {
        self.pass += 1;
        let stats = evaluation::run_pass(&mut self.root, self.pass, self.config.max_dependency_depth);
        if stats.is_clean() {
            tracing::debug!(pass = self.pass, "Pass complete: {stats:?}");
        } else {
            tracing::warn!(pass = self.pass, "Pass complete with problems: {stats:?}");
        }
        stats
    }

    /// Share the session between threads
    pub fn into_shared(self) -> SharedSession {
        SharedSession::new(self)
    }
}

/// A session shared between threads.
///
/// A tick holds the lock for the whole pass, so mutations from other
/// threads only happen between passes.
#[derive(Debug, Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<GraphSession>>,
}

impl SharedSession {
    /// Wrap a session
    pub fn new(session: GraphSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Lock the session for a batch of gestures
    pub fn lock(&self) -> MutexGuard<'_, GraphSession> {
        self.inner.lock()
    }

    /// Run one pass under the lock
    pub fn tick(&self) -> PassStats {
        self.inner.lock().tick()
    }
}
