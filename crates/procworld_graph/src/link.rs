// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link (edge) records and the table that keeps both endpoints in sync.
//!
//! A link is stored twice: the source node keeps an outgoing record and
//! the target node keeps the mirrored incoming record. Links address their
//! endpoints by node id and field name, never by reference. All mutation
//! goes through [`LinkTable`], which always updates both records together.

use crate::anchor::{Anchor, AnchorType};
use crate::graph::{Graph, NodeLocation};
use crate::node::NodeId;
use crate::order;
use serde::{Deserialize, Serialize};

/// Which side of the link a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkDirection {
    /// The local node is the source
    Outgoing,
    /// The local node is the target
    Incoming,
}

/// One endpoint's record of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Node holding this record
    pub local_node: NodeId,
    /// Field on the local node
    pub local_field: String,
    /// Slot on the local field, `None` for a single field
    pub local_slot: Option<usize>,
    /// Node at the other end
    pub distant_node: NodeId,
    /// Field on the distant node
    pub distant_field: String,
    /// Slot on the distant field, `None` for a single field
    pub distant_slot: Option<usize>,
    /// Side described by this record
    pub direction: LinkDirection,
}

impl Link {
    /// Whether the local node is the source
    pub fn is_outgoing(&self) -> bool {
        self.direction == LinkDirection::Outgoing
    }

    /// The record held by the other endpoint
    pub fn mirror(&self) -> Link {
        Link {
            local_node: self.distant_node,
            local_field: self.distant_field.clone(),
            local_slot: self.distant_slot,
            distant_node: self.local_node,
            distant_field: self.local_field.clone(),
            distant_slot: self.local_slot,
            direction: match self.direction {
                LinkDirection::Outgoing => LinkDirection::Incoming,
                LinkDirection::Incoming => LinkDirection::Outgoing,
            },
        }
    }

    /// Check if this link involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.local_node == node_id || self.distant_node == node_id
    }

    /// Outgoing record of the link, whichever side this is
    pub fn as_outgoing(&self) -> Link {
        if self.is_outgoing() {
            self.clone()
        } else {
            self.mirror()
        }
    }
}

/// Address of an anchor slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorRef {
    /// Owning node
    pub node: NodeId,
    /// Field name
    pub field: String,
    /// Slot index for multiple fields
    pub slot: Option<usize>,
}

impl AnchorRef {
    /// Address a single field
    pub fn field(node: NodeId, field: impl Into<String>) -> Self {
        Self {
            node,
            field: field.into(),
            slot: None,
        }
    }

    /// Address one slot of a multiple field
    pub fn slot(node: NodeId, field: impl Into<String>, slot: usize) -> Self {
        Self {
            node,
            field: field.into(),
            slot: Some(slot),
        }
    }
}

/// Error when creating a link
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttachError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Field not found
    #[error("Field not found: {node}.{field}")]
    FieldNotFound {
        /// Node id
        node: NodeId,
        /// Field name
        field: String,
    },

    /// Neither anchor can feed the other
    #[error("Anchors cannot be linked in either direction")]
    IncompatibleDirections,

    /// Incompatible anchor types
    #[error("Incompatible anchor types: {from:?} -> {to:?}")]
    IncompatibleTypes {
        /// Source type
        from: AnchorType,
        /// Target type
        to: AnchorType,
    },

    /// Slot missing, out of range or disabled
    #[error("Invalid slot {slot:?} on field {field}")]
    InvalidSlot {
        /// Field name
        field: String,
        /// Requested slot
        slot: Option<usize>,
    },

    /// Self-loop not allowed
    #[error("Self-loop not allowed")]
    SelfLoop,

    /// The link would make a node depend on itself
    #[error("Linking {from} to {to} would create a cycle")]
    WouldCreateCycle {
        /// Source node
        from: NodeId,
        /// Target node
        to: NodeId,
    },
}

fn anchor<'g>(graph: &'g Graph, at: &AnchorRef) -> Result<(&'g Anchor, NodeLocation), AttachError> {
    let location = graph
        .locate(at.node)
        .ok_or(AttachError::NodeNotFound(at.node))?;
    let anchor = graph
        .resolve(at.node)
        .and_then(|n| n.anchor(&at.field))
        .ok_or_else(|| AttachError::FieldNotFound {
            node: at.node,
            field: at.field.clone(),
        })?;
    Ok((anchor, location))
}

/// (can be a source, can be a target) in the graph's context.
/// Multiple anchors only ever receive values.
fn roles(anchor: &Anchor, location: NodeLocation) -> (bool, bool) {
    match location {
        NodeLocation::Node => (
            anchor.acts_as_output() && !anchor.is_multiple(),
            anchor.acts_as_input(),
        ),
        NodeLocation::Input | NodeLocation::SubgraphOutput(_) => (anchor.pass_through, false),
        NodeLocation::Output | NodeLocation::SubgraphInput(_) => (false, anchor.pass_through),
    }
}

/// Whether an anchor can take part in a link at all in the graph's context
pub fn is_linkable(graph: &Graph, at: &AnchorRef) -> bool {
    anchor(graph, at).is_ok_and(|(anchor, location)| {
        let (source, target) = roles(anchor, location);
        source || target
    })
}

fn checked_slot(anchor: &Anchor, slot: Option<usize>) -> Result<Option<usize>, AttachError> {
    let invalid = || AttachError::InvalidSlot {
        field: anchor.field_name.clone(),
        slot,
    };
    if anchor.is_multiple() {
        let index = slot.ok_or_else(invalid)?;
        let usable = index < anchor.multiple_value_count()
            && anchor.slots().get(index).is_some_and(|s| s.enabled);
        if usable {
            Ok(Some(index))
        } else {
            Err(invalid())
        }
    } else {
        match slot {
            None | Some(0) => Ok(None),
            Some(_) => Err(invalid()),
        }
    }
}

/// Check that two anchors can be linked, oriented from whichever one can
/// act as the source. Returns the outgoing record the link would have.
pub fn validate(graph: &Graph, first: &AnchorRef, second: &AnchorRef) -> Result<Link, AttachError> {
    let (a, a_location) = anchor(graph, first)?;
    let (b, b_location) = anchor(graph, second)?;
    let (a_out, a_in) = roles(a, a_location);
    let (b_out, b_in) = roles(b, b_location);

    let (from, to, from_anchor, to_anchor) = if a_out && b_in {
        (first, second, a, b)
    } else if b_out && a_in {
        (second, first, b, a)
    } else {
        return Err(AttachError::IncompatibleDirections);
    };

    if from.node == to.node {
        return Err(AttachError::SelfLoop);
    }
    if !to_anchor.accepts(&from_anchor.anchor_type) {
        return Err(AttachError::IncompatibleTypes {
            from: from_anchor.anchor_type.clone(),
            to: to_anchor.anchor_type.clone(),
        });
    }
    let from_slot = checked_slot(from_anchor, from.slot)?;
    let to_slot = checked_slot(to_anchor, to.slot)?;

    if order::depends_on(graph, from.node, to.node) {
        return Err(AttachError::WouldCreateCycle {
            from: from.node,
            to: to.node,
        });
    }

    Ok(Link {
        local_node: from.node,
        local_field: from.field.clone(),
        local_slot: from_slot,
        distant_node: to.node,
        distant_field: to.field.clone(),
        distant_slot: to_slot,
        direction: LinkDirection::Outgoing,
    })
}

/// The only writer of link records, borrowed from the graph whose context
/// resolves both endpoints
pub struct LinkTable<'g> {
    graph: &'g mut Graph,
}

impl<'g> LinkTable<'g> {
    pub(crate) fn new(graph: &'g mut Graph) -> Self {
        Self { graph }
    }

    /// Link two anchors, see [`validate`], then recompute the order.
    ///
    /// An existing link on the target slot is replaced. Returns the
    /// outgoing record.
    pub fn attach(&mut self, first: &AnchorRef, second: &AnchorRef) -> Result<Link, AttachError> {
        let outgoing = self.link(first, second)?;
        self.graph.reorder();
        Ok(outgoing)
    }

    /// [`LinkTable::attach`] without recomputing the order
    pub(crate) fn link(&mut self, first: &AnchorRef, second: &AnchorRef) -> Result<Link, AttachError> {
        let outgoing = validate(self.graph, first, second)?;

        let replaced: Vec<Link> = self
            .graph
            .resolve(outgoing.distant_node)
            .map(|target| {
                target
                    .incoming_links()
                    .filter(|l| {
                        l.local_field == outgoing.distant_field && l.local_slot == outgoing.distant_slot
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for link in &replaced {
            tracing::debug!(
                "Replacing link {}.{} -> {}.{}",
                link.distant_node,
                link.distant_field,
                link.local_node,
                link.local_field
            );
            self.unlink(link);
        }

        self.insert_record(outgoing.mirror());
        self.insert_record(outgoing.clone());
        tracing::debug!(
            "Attached {}.{} -> {}.{}{}",
            outgoing.local_node,
            outgoing.local_field,
            outgoing.distant_node,
            outgoing.distant_field,
            outgoing
                .distant_slot
                .map(|s| format!("[{s}]"))
                .unwrap_or_default()
        );
        Ok(outgoing)
    }

    fn insert_record(&mut self, record: Link) {
        if let Some(node) = self.graph.resolve_mut(record.local_node) {
            if let Some(anchor) = node.anchor_mut(&record.local_field) {
                anchor.increment_links(record.local_slot);
            }
            node.links_mut().push(record);
            self.graph.mark_dirty();
        }
    }

    fn remove_record(&mut self, record: &Link) -> bool {
        let Some(node) = self.graph.resolve_mut(record.local_node) else {
            return false;
        };
        let Some(position) = node.links().iter().position(|l| l == record) else {
            return false;
        };
        node.links_mut().remove(position);
        if let Some(anchor) = node.anchor_mut(&record.local_field) {
            anchor.decrement_links(record.local_slot);
        }
        self.graph.mark_dirty();
        true
    }

    /// Remove a link given either of its records and recompute the order.
    /// Returns false when neither side held it.
    pub fn detach(&mut self, link: &Link) -> bool {
        let removed = self.unlink(link);
        if removed {
            self.graph.reorder();
        }
        removed
    }

    pub(crate) fn unlink(&mut self, link: &Link) -> bool {
        let local = self.remove_record(link);
        let distant = self.remove_record(&link.mirror());
        if local != distant {
            tracing::warn!(
                "Removed a half link between {} and {}",
                link.local_node,
                link.distant_node
            );
        }
        if local || distant {
            tracing::debug!(
                "Detached {}.{} <-> {}.{}",
                link.local_node,
                link.local_field,
                link.distant_node,
                link.distant_field
            );
        }
        local || distant
    }

    /// Remove every link attached to one anchor slot
    pub fn detach_anchor(&mut self, at: &AnchorRef) -> usize {
        let links: Vec<Link> = self
            .graph
            .resolve(at.node)
            .map(|n| {
                n.links()
                    .iter()
                    .filter(|l| l.local_field == at.field && l.local_slot == at.slot)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let removed = links.iter().filter(|l| self.unlink(l)).count();
        if removed > 0 {
            self.graph.reorder();
        }
        removed
    }

    /// Remove every link of a node from both endpoints, then sweep any
    /// remaining record pointing at it. Returns the number of links removed.
    pub fn detach_node(&mut self, id: NodeId) -> usize {
        let removed = self.unlink_node(id);
        self.graph.reorder();
        removed
    }

    pub(crate) fn unlink_node(&mut self, id: NodeId) -> usize {
        let links = self
            .graph
            .resolve(id)
            .map(|n| n.links().to_vec())
            .unwrap_or_default();

        let mut removed = 0;
        for link in &links {
            if !self.remove_record(&link.mirror()) {
                tracing::warn!(
                    "Link target {} not found while removing node {}",
                    link.distant_node,
                    id
                );
            }
            removed += 1;
        }
        if let Some(node) = self.graph.resolve_mut(id) {
            node.links_mut().clear();
            node.clear_link_counts();
        }

        removed + self.sweep_records(id)
    }

    /// Drop records anywhere in this graph's context that point at `id`
    pub fn sweep(&mut self, id: NodeId) -> usize {
        let swept = self.sweep_records(id);
        if swept > 0 {
            self.graph.reorder();
        }
        swept
    }

    pub(crate) fn sweep_records(&mut self, id: NodeId) -> usize {
        let mut swept = 0;
        for other in self.graph.resolvable_ids() {
            if other == id {
                continue;
            }
            let orphans: Vec<Link> = self
                .graph
                .resolve(other)
                .map(|n| n.links().iter().filter(|l| l.distant_node == id).cloned().collect())
                .unwrap_or_default();
            for orphan in &orphans {
                tracing::warn!("Dropping orphan link record {} -> {}", other, id);
                if self.remove_record(orphan) {
                    swept += 1;
                }
            }
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphSettings;
    use crate::testing;

    fn outgoing() -> Link {
        Link {
            local_node: NodeId(1),
            local_field: "x".into(),
            local_slot: None,
            distant_node: NodeId(2),
            distant_field: "values".into(),
            distant_slot: Some(1),
            direction: LinkDirection::Outgoing,
        }
    }

    #[test]
    fn test_mirror_swaps_sides() {
        let link = outgoing();
        let mirror = link.mirror();
        assert_eq!(mirror.local_node, NodeId(2));
        assert_eq!(mirror.local_slot, Some(1));
        assert_eq!(mirror.distant_field, "x");
        assert!(!mirror.is_outgoing());
        assert_eq!(mirror.mirror(), link);
        assert_eq!(mirror.as_outgoing(), link);
    }

    #[test]
    fn test_multiple_output_cannot_be_a_source() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let fan = graph.add_node(testing::node(&registry, &mut ids, "fanout"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));

        let err = graph
            .attach(&AnchorRef::slot(fan, "outs", 0), &AnchorRef::field(b, "y"))
            .unwrap_err();
        assert!(matches!(err, AttachError::IncompatibleDirections));
        let err = graph
            .attach(&AnchorRef::field(b, "y"), &AnchorRef::slot(fan, "outs", 0))
            .unwrap_err();
        assert!(matches!(err, AttachError::IncompatibleDirections));
        assert_eq!(graph.node(fan).unwrap().links().len(), 0);
    }

    #[test]
    fn test_involves_node() {
        let link = outgoing();
        assert!(link.involves_node(NodeId(1)));
        assert!(link.involves_node(NodeId(2)));
        assert!(!link.involves_node(NodeId(3)));
    }
}
