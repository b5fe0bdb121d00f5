// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph evaluation: one pass of processing and value propagation.
//!
//! Nodes run in schedule order. After a node processes, the current value
//! of each linked output is copied into the linked input, either by direct
//! assignment or into one slot of a multiple field. A subgraph runs as a
//! whole when its output proxy comes up in the parent's schedule.

use crate::graph::{Graph, NodeLocation};
use crate::link::Link;
use crate::node::{NodeId, ProcessContext};
use crate::order;
use crate::value::FieldValue;

/// Outcome counters of an evaluation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Processing routines invoked
    pub processed: usize,
    /// Routines that returned an error
    pub failed_nodes: usize,
    /// Links skipped because an endpoint could not be resolved
    pub skipped_links: usize,
    /// Rejected assignments
    pub failed_assignments: usize,
    /// Graphs skipped because their order could not be computed
    pub skipped_graphs: usize,
}

impl PassStats {
    /// Add the counters of another pass
    pub fn merge(&mut self, other: PassStats) {
        self.processed += other.processed;
        self.failed_nodes += other.failed_nodes;
        self.skipped_links += other.skipped_links;
        self.failed_assignments += other.failed_assignments;
        self.skipped_graphs += other.skipped_graphs;
    }

    /// Whether nothing went wrong
    pub fn is_clean(&self) -> bool {
        self.failed_nodes == 0
            && self.skipped_links == 0
            && self.failed_assignments == 0
            && self.skipped_graphs == 0
    }
}

/// Run one pass over `graph`, recomputing its order first when stale
pub fn run_pass(graph: &mut Graph, pass: u64, max_depth: usize) -> PassStats {
    let mut stats = PassStats::default();
    if graph.is_order_dirty() {
        if let Err(err) = order::evaluate(graph, max_depth) {
            tracing::error!(graph = %graph.name, "Skipping pass: {err}");
            stats.skipped_graphs += 1;
            return stats;
        }
    }

    let ctx = ProcessContext {
        chunk_size: graph.settings.chunk_size,
        seed: graph.settings.seed,
        pass,
    };

    let input = graph.input_node().id();
    process(graph, input, &ctx, &mut stats);
    propagate(graph, input, &mut stats);

    for node_id in graph.schedule().to_vec() {
        match graph.locate(node_id) {
            Some(NodeLocation::Node) => {}
            Some(NodeLocation::SubgraphOutput(index)) => {
                let sub_stats = run_pass(&mut graph.subgraphs[index], pass, max_depth);
                stats.merge(sub_stats);
            }
            _ => {
                tracing::warn!(graph = %graph.name, "Stale schedule entry {node_id}");
                stats.skipped_links += 1;
                continue;
            }
        }
        process(graph, node_id, &ctx, &mut stats);
        propagate(graph, node_id, &mut stats);
    }
    stats
}

fn process(graph: &mut Graph, node_id: NodeId, ctx: &ProcessContext, stats: &mut PassStats) {
    let Some(node) = graph.resolve_mut(node_id) else {
        tracing::warn!("Node {node_id} vanished before processing");
        return;
    };
    stats.processed += 1;
    if let Err(err) = node.process(ctx) {
        tracing::error!(node = %node_id, node_type = node.type_id(), "Processing failed: {err}");
        stats.failed_nodes += 1;
    }
}

/// Copy the values of a node's outgoing links into their targets
fn propagate(graph: &mut Graph, node_id: NodeId, stats: &mut PassStats) {
    // `None` when the source field holds no single value to hand over
    let outgoing: Vec<(Link, Option<Option<FieldValue>>)> = match graph.resolve(node_id) {
        Some(source) => source
            .outgoing_links()
            .map(|link| {
                let value = source
                    .anchor(&link.local_field)
                    .filter(|anchor| !anchor.is_multiple())
                    .map(|anchor| anchor.single().cloned());
                (link.clone(), value)
            })
            .collect(),
        None => return,
    };

    for (link, value) in outgoing {
        let Some(value) = value else {
            tracing::warn!(
                "Source {}.{} has no single value, skipping link to {}.{}",
                node_id,
                link.local_field,
                link.distant_node,
                link.distant_field
            );
            stats.failed_assignments += 1;
            continue;
        };
        let Some(target) = graph.resolve_mut(link.distant_node) else {
            tracing::warn!(
                "Link target {} vanished, skipping {}.{}",
                link.distant_node,
                node_id,
                link.local_field
            );
            stats.skipped_links += 1;
            continue;
        };
        let result = match link.distant_slot {
            None => target.set_field(&link.distant_field, value),
            Some(slot) => target.assign_at(&link.distant_field, slot, value, &link.local_field),
        };
        if let Err(err) = result {
            tracing::warn!(
                "Assignment {}.{} -> {}.{} failed: {err}",
                node_id,
                link.local_field,
                link.distant_node,
                link.distant_field
            );
            stats.failed_assignments += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorType;
    use crate::graph::GraphSettings;
    use crate::link::{AnchorRef, LinkDirection};
    use crate::testing;

    #[test]
    fn test_single_link_propagation() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let a = graph.add_node(testing::node(&registry, &mut ids, "constant"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::field(b, "y")).unwrap();

        let stats = run_pass(&mut graph, 0, 64);
        let node_b = graph.node(b).unwrap();
        assert_eq!(node_b.field("y"), Some(&FieldValue::Float(5.0)));
        assert_eq!(node_b.field("z"), Some(&FieldValue::Float(10.0)));
        assert_eq!(graph.node(a).unwrap().compute_order(), 1);
        assert_eq!(node_b.compute_order(), 2);
        assert!(stats.is_clean());
    }

    #[test]
    fn test_multi_slot_propagation() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let a = graph.add_node(testing::node(&registry, &mut ids, "constant"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        let c = graph.add_node(testing::node(&registry, &mut ids, "sum"));
        assert_eq!(graph.node(c).unwrap().anchor("values").unwrap().multiple_value_count(), 1);
        graph.node_mut(c).unwrap().add_anchor_slot("values").unwrap();
        assert_eq!(graph.node(c).unwrap().anchor("values").unwrap().multiple_value_count(), 2);

        graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::field(b, "y")).unwrap();
        graph.attach(&AnchorRef::field(b, "z"), &AnchorRef::slot(c, "values", 1)).unwrap();
        run_pass(&mut graph, 0, 64);

        let values = graph.node(c).unwrap().anchor("values").unwrap().values().unwrap();
        assert_eq!(values.get(0), None);
        assert_eq!(values.get(1), Some(&FieldValue::Float(10.0)));
        assert_eq!(values.name(1), Some("z"));

        graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::slot(c, "values", 0)).unwrap();
        run_pass(&mut graph, 1, 64);
        let node_c = graph.node(c).unwrap();
        assert_eq!(node_c.anchor("values").unwrap().values().unwrap().get(1), Some(&FieldValue::Float(10.0)));
        assert_eq!(node_c.field("total"), Some(&FieldValue::Float(15.0)));
    }

    #[test]
    fn test_failed_node_does_not_stop_pass() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let lonely = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        let a = graph.add_node(testing::node(&registry, &mut ids, "constant"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::field(b, "y")).unwrap();

        let stats = run_pass(&mut graph, 0, 64);
        assert_eq!(stats.failed_nodes, 1);
        // the input proxy runs too
        assert_eq!(stats.processed, 4);
        assert!(graph.node(lonely).unwrap().field("z").is_none());
        assert_eq!(graph.node(b).unwrap().field("z"), Some(&FieldValue::Float(10.0)));
    }

    #[test]
    fn test_rejected_slot_assignment_is_counted() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let a = graph.add_node(testing::node(&registry, &mut ids, "constant"));
        let c = graph.add_node(testing::node(&registry, &mut ids, "sum"));
        graph.node_mut(c).unwrap().add_anchor_slot("values").unwrap();
        let link = graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::slot(c, "values", 1)).unwrap();

        // a link record pointing past the slots, as stale data would
        let mut stale = link.clone();
        stale.distant_slot = Some(3);
        graph.node_mut(a).unwrap().links_mut().push(stale);

        let stats = run_pass(&mut graph, 0, 64);
        assert_eq!(stats.failed_assignments, 1);
        assert_eq!(
            graph.node(c).unwrap().anchor("values").unwrap().values().unwrap().get(1),
            Some(&FieldValue::Float(5.0))
        );
    }

    #[test]
    fn test_multiple_source_value_is_not_handed_over() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let fan = graph.add_node(testing::node(&registry, &mut ids, "fanout"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        graph
            .node_mut(fan)
            .unwrap()
            .assign_at("outs", 0, Some(FieldValue::Float(7.0)), "outs")
            .unwrap();
        graph.node_mut(b).unwrap().set_field("y", Some(FieldValue::Float(3.0))).unwrap();

        // a record no attach would create, as foreign data could carry
        let link = Link {
            local_node: fan,
            local_field: "outs".into(),
            local_slot: Some(0),
            distant_node: b,
            distant_field: "y".into(),
            distant_slot: None,
            direction: LinkDirection::Outgoing,
        };
        graph.node_mut(fan).unwrap().links_mut().push(link);

        let stats = run_pass(&mut graph, 0, 64);
        assert_eq!(stats.failed_assignments, 1);
        let node_b = graph.node(b).unwrap();
        assert_eq!(node_b.field("y"), Some(&FieldValue::Float(3.0)));
        assert_eq!(node_b.field("z"), Some(&FieldValue::Float(6.0)));
    }

    #[test]
    fn test_subgraph_flow() {
        let (registry, mut ids) = testing::registry();
        let mut root = Graph::new("Root", GraphSettings::default(), &mut ids);
        let a = root.add_node(testing::node(&registry, &mut ids, "constant"));
        let after = root.add_node(testing::node(&registry, &mut ids, "doubler"));

        let sub = root.create_subgraph("Machine", &mut ids);
        let (sub_input, sub_output) = {
            let machine = root.subgraph_mut(sub).unwrap();
            machine.add_input_field("in", AnchorType::Float);
            machine.add_output_field("out", AnchorType::Float);
            let inner = machine.add_node(testing::node(&registry, &mut ids, "doubler"));
            let input = machine.input_node().id();
            let output = machine.output_node().id();
            machine.attach(&AnchorRef::field(input, "in"), &AnchorRef::field(inner, "y")).unwrap();
            machine.attach(&AnchorRef::field(inner, "z"), &AnchorRef::field(output, "out")).unwrap();
            (input, output)
        };

        root.attach(&AnchorRef::field(a, "x"), &AnchorRef::field(sub_input, "in")).unwrap();
        root.attach(&AnchorRef::field(sub_output, "out"), &AnchorRef::field(after, "y")).unwrap();

        let stats = run_pass(&mut root, 0, 64);
        assert!(stats.is_clean(), "{stats:?}");
        assert_eq!(root.node(after).unwrap().field("y"), Some(&FieldValue::Float(10.0)));
        assert_eq!(root.node(after).unwrap().field("z"), Some(&FieldValue::Float(20.0)));

        // the subgraph output feeding back into its input is a cycle
        let err = root
            .attach(&AnchorRef::field(after, "z"), &AnchorRef::field(sub_input, "in"))
            .unwrap_err();
        assert!(matches!(err, crate::link::AttachError::WouldCreateCycle { .. }));
    }
}
