// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes, subgraphs and boundary proxies.

use crate::anchor::{AnchorType, FieldDecl};
use crate::graphs::boundary;
use crate::link::{AnchorRef, AttachError, Link, LinkTable};
use crate::node::{Node, NodeId};
use crate::order;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Create a new unique graph ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generation settings carried by a graph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Samples per side of generated chunks
    pub chunk_size: usize,
    /// World seed
    pub seed: i32,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            seed: 0,
        }
    }
}

/// Hands out node ids unique across a whole graph tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdAllocator {
    next: u32,
}

impl NodeIdAllocator {
    /// Start at id 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Resume from a persisted counter
    pub fn starting_at(next: u32) -> Self {
        Self { next: next.max(1) }
    }

    /// Next id to be handed out
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Take a fresh id
    pub fn allocate(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// Make sure `id` is never handed out again
    pub fn observe(&mut self, id: NodeId) {
        if id.0 >= self.next {
            self.next = id.0 + 1;
        }
    }
}

impl Default for NodeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a node id resolves within a graph's context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLocation {
    /// One of the graph's own nodes
    Node,
    /// Input proxy of the subgraph at this index
    SubgraphInput(usize),
    /// Output proxy of the subgraph at this index
    SubgraphOutput(usize),
    /// The graph's own input proxy
    Input,
    /// The graph's own output proxy
    Output,
}

/// A node graph
#[derive(Debug)]
pub struct Graph {
    id: GraphId,
    /// Graph name
    pub name: String,
    /// Generation settings
    pub settings: GraphSettings,
    parent: Option<GraphId>,
    pub(crate) nodes: IndexMap<NodeId, Node>,
    pub(crate) subgraphs: Vec<Graph>,
    input_node: Node,
    output_node: Node,
    pub(crate) schedule: Vec<NodeId>,
    order_dirty: bool,
    max_depth: usize,
}

impl Graph {
    /// Create a new empty graph with fresh boundary proxies
    pub fn new(name: impl Into<String>, settings: GraphSettings, ids: &mut NodeIdAllocator) -> Self {
        Self::from_parts(
            GraphId::new(),
            name,
            settings,
            None,
            boundary::input_proxy(ids.allocate()),
            boundary::output_proxy(ids.allocate()),
        )
    }

    pub(crate) fn from_parts(
        id: GraphId,
        name: impl Into<String>,
        settings: GraphSettings,
        parent: Option<GraphId>,
        input_node: Node,
        output_node: Node,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            settings,
            parent,
            nodes: IndexMap::new(),
            subgraphs: Vec::new(),
            input_node,
            output_node,
            schedule: Vec::new(),
            order_dirty: true,
            max_depth: order::DEFAULT_MAX_DEPTH,
        }
    }

    /// Graph id
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Id of the graph owning this one
    pub fn parent(&self) -> Option<GraphId> {
        self.parent
    }

    /// Add a node to the graph and recompute the order. A node with the
    /// same id is replaced.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.push_node(node);
        self.reorder();
        id
    }

    /// Add a node without recomputing the order
    pub(crate) fn push_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        if self.locate(id).is_some() {
            tracing::error!(graph = %self.name, "Duplicate node id {id}, replacing");
        }
        self.nodes.insert(id, node);
        self.order_dirty = true;
        id
    }

    /// Remove a node and every link touching it
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        if !self.nodes.contains_key(&node_id) {
            return None;
        }
        let removed = self.links().unlink_node(node_id);
        tracing::debug!(graph = %self.name, "Removed node {node_id} with {removed} links");
        let node = self.nodes.shift_remove(&node_id);
        self.reorder();
        node
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable node by ID
    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get all nodes, in the order of the last evaluation
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Proxy exposing the graph's inputs to its nodes
    pub fn input_node(&self) -> &Node {
        &self.input_node
    }

    /// Mutable input proxy, the host writes root parameters here
    pub fn input_node_mut(&mut self) -> &mut Node {
        &mut self.input_node
    }

    /// Proxy collecting the graph's outputs
    pub fn output_node(&self) -> &Node {
        &self.output_node
    }

    /// Add a boundary input, returning its anchor index
    pub fn add_input_field(&mut self, name: &str, anchor_type: AnchorType) -> usize {
        self.input_node.push_field(&FieldDecl::pass_through(name, anchor_type))
    }

    /// Add a boundary output, returning its anchor index
    pub fn add_output_field(&mut self, name: &str, anchor_type: AnchorType) -> usize {
        self.output_node.push_field(&FieldDecl::pass_through(name, anchor_type))
    }

    /// Child graphs
    pub fn subgraphs(&self) -> &[Graph] {
        &self.subgraphs
    }

    /// Child graph by id
    pub fn subgraph(&self, id: GraphId) -> Option<&Graph> {
        self.subgraphs.iter().find(|g| g.id == id)
    }

    /// Mutable child graph by id
    pub fn subgraph_mut(&mut self, id: GraphId) -> Option<&mut Graph> {
        self.subgraphs.iter_mut().find(|g| g.id == id)
    }

    /// Create an empty child graph sharing this graph's settings
    pub fn create_subgraph(&mut self, name: impl Into<String>, ids: &mut NodeIdAllocator) -> GraphId {
        let graph = Graph::new(name, self.settings, ids);
        self.add_subgraph(graph)
    }

    pub(crate) fn add_subgraph(&mut self, mut graph: Graph) -> GraphId {
        graph.parent = Some(self.id);
        graph.set_max_depth(self.max_depth);
        let id = graph.id;
        self.subgraphs.push(graph);
        self.reorder();
        id
    }

    /// Remove a child graph and every link between its proxies and this graph
    pub fn remove_subgraph(&mut self, id: GraphId) -> Option<Graph> {
        let index = self.subgraphs.iter().position(|g| g.id == id)?;
        let input = self.subgraphs[index].input_node.id();
        let output = self.subgraphs[index].output_node.id();
        let parent_side: Vec<Link> = self.subgraphs[index]
            .input_node
            .incoming_links()
            .chain(self.subgraphs[index].output_node.outgoing_links())
            .cloned()
            .collect();

        let mut links = self.links();
        for link in &parent_side {
            links.unlink(link);
        }
        links.sweep_records(input);
        links.sweep_records(output);

        let mut graph = self.subgraphs.remove(index);
        graph.parent = None;
        self.reorder();
        Some(graph)
    }

    /// Find where an id resolves: own nodes, subgraph input proxies,
    /// subgraph output proxies, own input proxy, own output proxy
    pub fn locate(&self, id: NodeId) -> Option<NodeLocation> {
        if self.nodes.contains_key(&id) {
            return Some(NodeLocation::Node);
        }
        if let Some(i) = self.subgraphs.iter().position(|g| g.input_node.id() == id) {
            return Some(NodeLocation::SubgraphInput(i));
        }
        if let Some(i) = self.subgraphs.iter().position(|g| g.output_node.id() == id) {
            return Some(NodeLocation::SubgraphOutput(i));
        }
        if self.input_node.id() == id {
            return Some(NodeLocation::Input);
        }
        if self.output_node.id() == id {
            return Some(NodeLocation::Output);
        }
        None
    }

    /// Resolve an id in this graph's context
    pub fn resolve(&self, id: NodeId) -> Option<&Node> {
        match self.locate(id)? {
            NodeLocation::Node => self.nodes.get(&id),
            NodeLocation::SubgraphInput(i) => Some(&self.subgraphs[i].input_node),
            NodeLocation::SubgraphOutput(i) => Some(&self.subgraphs[i].output_node),
            NodeLocation::Input => Some(&self.input_node),
            NodeLocation::Output => Some(&self.output_node),
        }
    }

    /// Resolve an id in this graph's context, mutably
    pub fn resolve_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        match self.locate(id)? {
            NodeLocation::Node => self.nodes.get_mut(&id),
            NodeLocation::SubgraphInput(i) => Some(&mut self.subgraphs[i].input_node),
            NodeLocation::SubgraphOutput(i) => Some(&mut self.subgraphs[i].output_node),
            NodeLocation::Input => Some(&mut self.input_node),
            NodeLocation::Output => Some(&mut self.output_node),
        }
    }

    /// Every id resolvable in this graph's context
    pub fn resolvable_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.extend(self.subgraphs.iter().map(|g| g.input_node.id()));
        ids.extend(self.subgraphs.iter().map(|g| g.output_node.id()));
        ids.push(self.input_node.id());
        ids.push(self.output_node.id());
        ids
    }

    /// Nodes `id` reads from in this graph's context.
    ///
    /// A subgraph's output proxy also depends on the subgraph's input proxy,
    /// so values entering a subgraph are ready before it runs.
    pub fn dependencies_of(&self, id: NodeId) -> Vec<NodeId> {
        match self.locate(id) {
            Some(NodeLocation::SubgraphOutput(i)) => {
                let subgraph = &self.subgraphs[i];
                let mut deps: Vec<NodeId> = subgraph
                    .output_node
                    .dependencies()
                    .into_iter()
                    .filter(|d| self.locate(*d).is_some())
                    .collect();
                let input = subgraph.input_node.id();
                if !deps.contains(&input) {
                    deps.push(input);
                }
                deps
            }
            // the own input proxy reads from the parent context
            Some(NodeLocation::Input) => Vec::new(),
            Some(_) => self.resolve(id).map(Node::dependencies).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Link records of this graph: outgoing links of its nodes, its input
    /// proxy and its subgraphs' output proxies
    pub fn links(&mut self) -> LinkTable<'_> {
        LinkTable::new(self)
    }

    /// Outgoing links owned by this graph's context, in node order
    pub fn outgoing_links(&self) -> Vec<&Link> {
        let mut links: Vec<&Link> = self.nodes.values().flat_map(Node::outgoing_links).collect();
        links.extend(self.input_node.outgoing_links());
        for subgraph in &self.subgraphs {
            links.extend(subgraph.output_node.outgoing_links());
        }
        links
    }

    /// Link two anchors, see [`LinkTable::attach`]
    pub fn attach(&mut self, first: &AnchorRef, second: &AnchorRef) -> Result<Link, AttachError> {
        self.links().attach(first, second)
    }

    /// Remove a link given either of its records
    pub fn detach(&mut self, link: &Link) -> bool {
        self.links().detach(link)
    }

    /// Evaluation sequence of the last compute order run
    pub fn schedule(&self) -> &[NodeId] {
        &self.schedule
    }

    /// Whether compute order must be re-evaluated before the next pass
    pub fn is_order_dirty(&self) -> bool {
        self.order_dirty
    }

    /// Force compute order re-evaluation
    pub fn mark_dirty(&mut self) {
        self.order_dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.order_dirty = false;
    }

    /// Recompute the order after a structural change. On failure the
    /// error is logged and the graph stays dirty.
    pub(crate) fn reorder(&mut self) {
        let max_depth = self.max_depth;
        if let Err(err) = order::evaluate(self, max_depth) {
            tracing::error!(graph = %self.name, "Compute order failed: {err}");
        }
    }

    /// Recursion bound used when the order is recomputed after an edit
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Set the recursion bound of this graph and every subgraph
    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
        for subgraph in &mut self.subgraphs {
            subgraph.set_max_depth(max_depth);
        }
    }

    /// Whether this graph or any subgraph needs re-evaluation
    pub fn is_tree_dirty(&self) -> bool {
        self.order_dirty || self.subgraphs.iter().any(Graph::is_tree_dirty)
    }

    /// Visit every node of the tree, proxies included
    pub fn for_each_node_mut(&mut self, f: &mut dyn FnMut(&mut Node)) {
        f(&mut self.input_node);
        for node in self.nodes.values_mut() {
            f(node);
        }
        f(&mut self.output_node);
        for subgraph in &mut self.subgraphs {
            subgraph.for_each_node_mut(f);
        }
    }

    /// Largest node id in the tree, proxies included
    pub fn max_node_id(&self) -> NodeId {
        let own = self
            .nodes
            .keys()
            .copied()
            .chain([self.input_node.id(), self.output_node.id()])
            .max()
            .unwrap_or(NodeId(0));
        self.subgraphs
            .iter()
            .map(Graph::max_node_id)
            .fold(own, NodeId::max)
    }
}
