// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A node couples its field anchors with a [`NodeBehavior`], the opaque
//! processing routine of its type. The engine never looks inside a
//! behavior; it only decides when `on_process` runs and moves field values
//! along links.

use crate::anchor::{Anchor, AnchorSlotId, AssignError, FieldDecl, SlotError};
use crate::field::{FieldAccessor, FieldAccessors};
use crate::link::Link;
use crate::value::{FieldValue, Sampler2D};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a node, stable for the node's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node palette category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Constants and sliders
    SimpleValues,
    /// Arithmetic
    Operations,
    /// Noise generators
    Noises,
    /// Masks applied to noise
    NoiseMasks,
    /// Biome composition
    Biomes,
    /// Logging and inspection
    Debug,
    /// Graph boundary proxies
    Boundary,
    /// Custom/user-defined
    Custom,
}

/// Settings visible to a node while it processes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    /// Samples per side of generated terrain chunks
    pub chunk_size: usize,
    /// World seed
    pub seed: i32,
    /// Index of the current evaluation pass
    pub pass: u64,
}

/// Error raised by a node's processing routine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    /// A required input was never supplied
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// The node cannot run with the data it was given
    #[error("{0}")]
    Structural(String),

    /// Writing an output failed
    #[error(transparent)]
    Assign(#[from] AssignError),
}

/// Lifecycle hooks implemented by every node type
pub trait NodeBehavior: fmt::Debug + Send {
    /// Called once when the node is instantiated
    fn on_create(&mut self, _io: &mut NodeIo<'_>) {}

    /// Called when a session starts
    fn on_enable(&mut self, _io: &mut NodeIo<'_>) {}

    /// Called once per evaluation pass
    fn on_process(&mut self, io: &mut NodeIo<'_>, ctx: &ProcessContext)
        -> Result<(), ProcessError>;
}

/// Field access handed to a behavior
pub struct NodeIo<'a> {
    node: NodeId,
    anchors: &'a mut [Anchor],
    accessors: &'a FieldAccessors,
}

impl<'a> NodeIo<'a> {
    /// Id of the node being processed
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    fn anchor(&self, name: &str) -> Option<&Anchor> {
        let accessor = self.accessors.get(name)?;
        self.anchors.get(accessor.index)
    }

    /// Value of a single field
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.anchor(name).and_then(Anchor::single)
    }

    /// Value of a single field, or [`ProcessError::MissingInput`]
    pub fn require(&self, name: &str) -> Result<&FieldValue, ProcessError> {
        self.get(name)
            .ok_or_else(|| ProcessError::MissingInput(name.to_string()))
    }

    /// Numeric field
    pub fn float(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(FieldValue::as_float)
    }

    /// Integer field
    pub fn int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(FieldValue::as_int)
    }

    /// String field
    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    /// Sampler field
    pub fn sampler(&self, name: &str) -> Option<&Sampler2D> {
        self.get(name).and_then(FieldValue::as_sampler)
    }

    /// Present values of a multiple field
    pub fn values(&self, name: &str) -> impl Iterator<Item = &FieldValue> + '_ {
        self.anchor(name).into_iter().flat_map(|a| a.present_values())
    }

    /// Write a single field
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), AssignError> {
        let accessor = self
            .accessors
            .get(name)
            .ok_or_else(|| AssignError::UnknownField(name.to_string()))?;
        match self.anchors.get_mut(accessor.index) {
            Some(anchor) => anchor.set(Some(value)),
            None => Err(AssignError::UnknownField(name.to_string())),
        }
    }
}

/// Node type definition
#[derive(Debug, Clone)]
pub struct NodeTypeDescriptor {
    /// Unique type identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Declared fields
    pub fields: Vec<FieldDecl>,
    accessors: Arc<FieldAccessors>,
    create: fn() -> Box<dyn NodeBehavior>,
}

impl NodeTypeDescriptor {
    /// Create a descriptor with no fields
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: NodeCategory,
        create: fn() -> Box<dyn NodeBehavior>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            description: String::new(),
            fields: Vec::new(),
            accessors: Arc::default(),
            create,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a field
    pub fn with_field(mut self, decl: FieldDecl) -> Self {
        self.fields.push(decl);
        self
    }

    /// Accessor table shared by instances of this type
    pub fn accessors(&self) -> &Arc<FieldAccessors> {
        &self.accessors
    }
}

/// Registry of available node types
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    types: IndexMap<String, NodeTypeDescriptor>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type, building its accessor table
    pub fn register(&mut self, mut descriptor: NodeTypeDescriptor) {
        descriptor.accessors = Arc::new(FieldAccessors::from_decls(&descriptor.fields));
        if self.types.contains_key(&descriptor.id) {
            tracing::warn!("Node type {} registered twice, replacing", descriptor.id);
        }
        self.types.insert(descriptor.id.clone(), descriptor);
    }

    /// Get a node type by ID
    pub fn get(&self, id: &str) -> Option<&NodeTypeDescriptor> {
        self.types.get(id)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeTypeDescriptor> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(
        &self,
        category: NodeCategory,
    ) -> impl Iterator<Item = &NodeTypeDescriptor> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Accessor of a field of a node type
    pub fn accessor(&self, type_id: &str, field: &str) -> Option<&FieldAccessor> {
        self.types.get(type_id)?.accessors.get(field)
    }

    /// Create a node from a type ID
    pub fn create_node(&self, type_id: &str, id: NodeId) -> Option<Node> {
        self.get(type_id).map(|t| Node::new(id, t))
    }
}

/// A node instance in the graph
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    type_id: String,
    /// Display name (can be customized)
    pub name: String,
    /// Position in the graph UI
    pub position: [f32; 2],
    anchors: Vec<Anchor>,
    accessors: Arc<FieldAccessors>,
    links: Vec<Link>,
    compute_order: u32,
    next_slot_id: u32,
    behavior: Box<dyn NodeBehavior>,
}

impl Node {
    /// Create a new node from a type definition
    pub fn new(id: NodeId, descriptor: &NodeTypeDescriptor) -> Self {
        let mut next_slot_id = 0;
        let anchors = descriptor
            .fields
            .iter()
            .map(|decl| {
                Anchor::from_decl(decl, || {
                    next_slot_id += 1;
                    AnchorSlotId(next_slot_id)
                })
            })
            .collect();

        Self {
            id,
            type_id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            position: [0.0, 0.0],
            anchors,
            accessors: Arc::clone(&descriptor.accessors),
            links: Vec::new(),
            compute_order: 0,
            next_slot_id,
            behavior: (descriptor.create)(),
        }
    }

    /// Create a node without declared fields (graph proxies)
    pub(crate) fn bare(
        id: NodeId,
        type_id: &str,
        name: impl Into<String>,
        behavior: Box<dyn NodeBehavior>,
    ) -> Self {
        Self {
            id,
            type_id: type_id.to_string(),
            name: name.into(),
            position: [0.0, 0.0],
            anchors: Vec::new(),
            accessors: Arc::default(),
            links: Vec::new(),
            compute_order: 0,
            next_slot_id: 0,
            behavior,
        }
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node type id
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Rank computed by the last compute order evaluation
    pub fn compute_order(&self) -> u32 {
        self.compute_order
    }

    pub(crate) fn set_compute_order(&mut self, order: u32) {
        self.compute_order = order;
    }

    /// All anchors in declaration order
    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Accessor of a field by name
    pub fn accessor(&self, field: &str) -> Option<&FieldAccessor> {
        self.accessors.get(field)
    }

    /// Anchor of a field by name
    pub fn anchor(&self, field: &str) -> Option<&Anchor> {
        let accessor = self.accessors.get(field)?;
        self.anchors.get(accessor.index)
    }

    pub(crate) fn anchor_mut(&mut self, field: &str) -> Option<&mut Anchor> {
        let accessor = self.accessors.get(field)?;
        self.anchors.get_mut(accessor.index)
    }

    /// Value of a single field
    pub fn field(&self, field: &str) -> Option<&FieldValue> {
        self.anchor(field).and_then(Anchor::single)
    }

    /// Direct assignment of a single field
    pub fn set_field(&mut self, field: &str, value: Option<FieldValue>) -> Result<(), AssignError> {
        self.anchor_mut(field)
            .ok_or_else(|| AssignError::UnknownField(field.to_string()))?
            .set(value)
    }

    /// Indexed assignment of a multiple field
    pub fn assign_at(
        &mut self,
        field: &str,
        slot: usize,
        value: Option<FieldValue>,
        name: &str,
    ) -> Result<(), AssignError> {
        self.anchor_mut(field)
            .ok_or_else(|| AssignError::UnknownField(field.to_string()))?
            .assign_at(slot, value, name)
    }

    /// Grow a multiple field by one slot, returning the new slot index
    pub fn add_anchor_slot(&mut self, field: &str) -> Result<usize, SlotError> {
        let id = AnchorSlotId(self.next_slot_id + 1);
        let anchor = self
            .anchor_mut(field)
            .ok_or_else(|| SlotError::NotMultiple(field.to_string()))?;
        let index = anchor.add_slot(id)?;
        self.next_slot_id += 1;
        Ok(index)
    }

    /// Find the field and slot index owning a slot id
    pub fn find_slot(&self, id: AnchorSlotId) -> Option<(&str, usize)> {
        self.anchors.iter().find_map(|anchor| {
            anchor
                .slot_index(id)
                .map(|index| (anchor.field_name.as_str(), index))
        })
    }

    pub(crate) fn push_field(&mut self, decl: &FieldDecl) -> usize {
        let mut next_slot_id = self.next_slot_id;
        let anchor = Anchor::from_decl(decl, || {
            next_slot_id += 1;
            AnchorSlotId(next_slot_id)
        });
        self.next_slot_id = next_slot_id;
        self.anchors.push(anchor);
        Arc::make_mut(&mut self.accessors).push(decl)
    }

    pub(crate) fn restore_anchors(
        &mut self,
        restore: impl FnOnce(&mut [Anchor], &FieldAccessors, &mut dyn FnMut() -> AnchorSlotId),
    ) {
        let mut next_slot_id = self.next_slot_id;
        let mut next = || {
            next_slot_id += 1;
            AnchorSlotId(next_slot_id)
        };
        restore(&mut self.anchors, &self.accessors, &mut next);
        self.next_slot_id = next_slot_id;
    }

    /// Link records held by this node, both directions, in insertion order
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub(crate) fn links_mut(&mut self) -> &mut Vec<Link> {
        &mut self.links
    }

    pub(crate) fn clear_link_counts(&mut self) {
        for anchor in &mut self.anchors {
            anchor.clear_links();
        }
    }

    /// Links leaving this node
    pub fn outgoing_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|l| l.is_outgoing())
    }

    /// Links entering this node
    pub fn incoming_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|l| !l.is_outgoing())
    }

    /// Ids of the nodes this node reads from, without duplicates
    pub fn dependencies(&self) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = Vec::new();
        for link in self.incoming_links() {
            if !deps.contains(&link.distant_node) {
                deps.push(link.distant_node);
            }
        }
        deps
    }

    fn io(&mut self) -> (NodeIo<'_>, &mut Box<dyn NodeBehavior>) {
        (
            NodeIo {
                node: self.id,
                anchors: &mut self.anchors,
                accessors: &*self.accessors,
            },
            &mut self.behavior,
        )
    }

    /// Run the creation hook
    pub fn create(&mut self) {
        let (mut io, behavior) = self.io();
        behavior.on_create(&mut io);
    }

    /// Run the session start hook
    pub fn enable(&mut self) {
        let (mut io, behavior) = self.io();
        behavior.on_enable(&mut io);
    }

    /// Run the processing routine once
    pub fn process(&mut self, ctx: &ProcessContext) -> Result<(), ProcessError> {
        let (mut io, behavior) = self.io();
        behavior.on_process(&mut io, ctx)
    }
}
