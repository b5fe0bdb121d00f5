// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compute order evaluation.
//!
//! The weight of a node is one plus the weights of every node it reads
//! from; an id that cannot be resolved weighs nothing. Nodes are then
//! stably sorted by weight, so a node always runs after its dependencies
//! and ties keep their previous relative order.

use crate::graph::Graph;
use crate::node::NodeId;
use std::collections::{HashMap, HashSet};

/// Recursion bound used when no configuration says otherwise
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Error while computing the order of a graph
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// A node depends on itself through its links
    #[error("Cycle detected at node {0}")]
    CycleDetected(NodeId),

    /// Dependency chain deeper than the configured bound
    #[error("Dependency chain of node {node} exceeds depth {limit}")]
    DepthExceeded {
        /// Node where the bound was hit
        node: NodeId,
        /// Configured bound
        limit: usize,
    },
}

/// Memoized weights of one evaluation run
struct Weights<'g> {
    graph: &'g Graph,
    memo: HashMap<NodeId, u32>,
    visiting: HashSet<NodeId>,
    max_depth: usize,
}

impl<'g> Weights<'g> {
    fn new(graph: &'g Graph, max_depth: usize) -> Self {
        Self {
            graph,
            memo: HashMap::new(),
            visiting: HashSet::new(),
            max_depth,
        }
    }

    fn weight(&mut self, node_id: NodeId, depth: usize) -> Result<u32, EvaluationError> {
        if let Some(weight) = self.memo.get(&node_id) {
            return Ok(*weight);
        }
        if self.graph.resolve(node_id).is_none() {
            tracing::warn!(graph = %self.graph.name, "Dependency {node_id} not found, weighing it 0");
            return Ok(0);
        }
        if depth > self.max_depth {
            return Err(EvaluationError::DepthExceeded {
                node: node_id,
                limit: self.max_depth,
            });
        }
        if !self.visiting.insert(node_id) {
            return Err(EvaluationError::CycleDetected(node_id));
        }

        let mut weight = 1u32;
        for dep in self.graph.dependencies_of(node_id) {
            weight = weight.saturating_add(self.weight(dep, depth + 1)?);
        }

        self.visiting.remove(&node_id);
        self.memo.insert(node_id, weight);
        Ok(weight)
    }
}

/// Compute the order of one graph (not its subgraphs).
///
/// Sets the compute order of the graph's nodes, its input proxy and its
/// subgraphs' output proxies, sorts the node collection and rebuilds the
/// schedule. On error the orders are left untouched and the graph is
/// marked dirty.
pub fn evaluate(graph: &mut Graph, max_depth: usize) -> Result<(), EvaluationError> {
    let mut targets: Vec<NodeId> = graph.node_ids().collect();
    targets.push(graph.input_node().id());
    targets.extend(graph.subgraphs().iter().map(|g| g.output_node().id()));

    let weights: Result<Vec<(NodeId, u32)>, EvaluationError> = {
        let mut run = Weights::new(graph, max_depth);
        targets
            .iter()
            .map(|id| run.weight(*id, 0).map(|w| (*id, w)))
            .collect()
    };
    let weights = match weights {
        Ok(weights) => weights,
        Err(err) => {
            graph.mark_dirty();
            return Err(err);
        }
    };

    for (id, weight) in &weights {
        if let Some(node) = graph.resolve_mut(*id) {
            node.set_compute_order(*weight);
        }
    }
    graph
        .nodes
        .sort_by(|_, a, _, b| a.compute_order().cmp(&b.compute_order()));

    let input = graph.input_node().id();
    let mut schedule: Vec<(NodeId, u32)> = weights.into_iter().filter(|(id, _)| *id != input).collect();
    schedule.sort_by_key(|(_, weight)| *weight);
    graph.schedule = schedule.into_iter().map(|(id, _)| id).collect();
    graph.mark_clean();

    tracing::debug!(
        graph = %graph.name,
        "Compute order: {}",
        graph
            .schedule
            .iter()
            .filter_map(|id| graph.resolve(*id))
            .map(|n| format!("{}={}", n.id(), n.compute_order()))
            .collect::<Vec<_>>()
            .join(" ")
    );
    Ok(())
}

/// Compute the order of a graph and every subgraph below it.
///
/// Every graph is attempted; the first error is returned.
pub fn evaluate_tree(graph: &mut Graph, max_depth: usize) -> Result<(), EvaluationError> {
    let mut first_error = None;
    for subgraph in &mut graph.subgraphs {
        if let Err(err) = evaluate_tree(subgraph, max_depth) {
            first_error.get_or_insert(err);
        }
    }
    if let Err(err) = evaluate(graph, max_depth) {
        tracing::error!(graph = %graph.name, "Compute order failed: {err}");
        first_error.get_or_insert(err);
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Whether `node_id` reads, directly or transitively, from `target`
pub fn depends_on(graph: &Graph, node_id: NodeId, target: NodeId) -> bool {
    if node_id == target {
        return true;
    }
    let mut visited = HashSet::new();
    let mut stack = vec![node_id];
    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        for dep in graph.dependencies_of(current) {
            if dep == target {
                return true;
            }
            stack.push(dep);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphSettings;
    use crate::link::{AnchorRef, Link, LinkDirection};
    use crate::node::Node;
    use crate::testing;

    fn order(graph: &Graph, id: NodeId) -> u32 {
        graph.resolve(id).unwrap().compute_order()
    }

    #[test]
    fn test_chain_order() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        let a = graph.add_node(testing::node(&registry, &mut ids, "constant"));
        graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::field(b, "y")).unwrap();

        evaluate(&mut graph, 64).unwrap();
        assert_eq!(order(&graph, a), 1);
        assert_eq!(order(&graph, b), 2);
        assert_eq!(graph.node_ids().collect::<Vec<_>>(), vec![a, b]);
        assert!(!graph.is_order_dirty());
    }

    #[test]
    fn test_diamond_order() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let d = graph.add_node(testing::node(&registry, &mut ids, "sum"));
        let a = graph.add_node(testing::node(&registry, &mut ids, "constant"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        let c = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        graph.node_mut(d).unwrap().add_anchor_slot("values").unwrap();

        graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::field(b, "y")).unwrap();
        graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::field(c, "y")).unwrap();
        graph.attach(&AnchorRef::field(b, "z"), &AnchorRef::slot(d, "values", 0)).unwrap();
        graph.attach(&AnchorRef::field(c, "z"), &AnchorRef::slot(d, "values", 1)).unwrap();

        evaluate(&mut graph, 64).unwrap();
        assert!(order(&graph, a) < order(&graph, b));
        assert!(order(&graph, a) < order(&graph, c));
        assert!(order(&graph, b) < order(&graph, d));
        assert!(order(&graph, c) < order(&graph, d));
        assert_eq!(graph.schedule().last(), Some(&d));

        // every link goes from a lower to a higher order
        for link in graph.outgoing_links() {
            assert!(order(&graph, link.local_node) < order(&graph, link.distant_node));
        }
    }

    #[test]
    fn test_order_follows_links_in_larger_dags() {
        let dags: [(usize, &[(usize, usize)]); 3] = [
            (6, &[(0, 2), (1, 2), (2, 3), (0, 4), (3, 5), (4, 5), (1, 5)]),
            (
                8,
                &[(0, 1), (1, 2), (2, 3), (3, 4), (0, 5), (5, 6), (6, 7), (4, 7), (2, 6), (1, 7)],
            ),
            (7, &[(6, 5), (6, 4), (5, 3), (4, 3), (3, 2), (3, 1), (2, 0), (1, 0), (6, 0)]),
        ];

        for (size, edges) in dags {
            let (registry, mut ids) = testing::registry();
            let mut graph = Graph::new("Dag", GraphSettings::default(), &mut ids);
            let pending: Vec<Node> = (0..size)
                .map(|_| testing::node(&registry, &mut ids, "sum"))
                .collect();
            let nodes: Vec<NodeId> = pending.iter().map(Node::id).collect();
            // insert in reverse so the initial order disagrees with the links
            for node in pending.into_iter().rev() {
                graph.add_node(node);
            }

            let mut next_slot: HashMap<usize, usize> = HashMap::new();
            for &(from, to) in edges {
                let slot = next_slot.entry(to).or_insert(0);
                if *slot > 0 {
                    graph.node_mut(nodes[to]).unwrap().add_anchor_slot("values").unwrap();
                }
                graph
                    .attach(
                        &AnchorRef::field(nodes[from], "total"),
                        &AnchorRef::slot(nodes[to], "values", *slot),
                    )
                    .unwrap();
                *slot += 1;
            }

            assert!(!graph.is_order_dirty());
            assert_eq!(graph.outgoing_links().len(), edges.len());
            for link in graph.outgoing_links() {
                assert!(
                    order(&graph, link.local_node) < order(&graph, link.distant_node),
                    "{} -> {}",
                    link.local_node,
                    link.distant_node
                );
            }
            let position = |id: NodeId| graph.schedule().iter().position(|s| *s == id).unwrap();
            for &(from, to) in edges {
                assert!(position(nodes[from]) < position(nodes[to]));
            }
        }
    }

    #[test]
    fn test_order_is_current_after_each_edit() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        let a = graph.add_node(testing::node(&registry, &mut ids, "constant"));

        let link = graph.attach(&AnchorRef::field(a, "x"), &AnchorRef::field(b, "y")).unwrap();
        assert!(!graph.is_order_dirty());
        assert_eq!(order(&graph, a), 1);
        assert_eq!(order(&graph, b), 2);
        assert_eq!(graph.node_ids().collect::<Vec<_>>(), vec![a, b]);

        assert!(graph.detach(&link));
        assert!(!graph.is_order_dirty());
        assert_eq!(order(&graph, b), 1);

        let c = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        graph.attach(&AnchorRef::field(b, "z"), &AnchorRef::field(c, "y")).unwrap();
        assert_eq!(order(&graph, c), 2);
        graph.remove_node(b);
        assert!(!graph.is_order_dirty());
        assert_eq!(order(&graph, c), 1);
        assert!(!graph.schedule().contains(&b));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let a = graph.add_node(testing::node(&registry, &mut ids, "constant"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "constant"));
        let c = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        graph.attach(&AnchorRef::field(b, "x"), &AnchorRef::field(c, "y")).unwrap();

        evaluate(&mut graph, 64).unwrap();
        let first: Vec<_> = graph.nodes().map(|n| (n.id(), n.compute_order())).collect();
        let schedule = graph.schedule().to_vec();
        evaluate(&mut graph, 64).unwrap();
        let second: Vec<_> = graph.nodes().map(|n| (n.id(), n.compute_order())).collect();
        assert_eq!(first, second);
        assert_eq!(schedule, graph.schedule());
        // tie between a and b keeps insertion order
        assert_eq!(first[0].0, a);
    }

    #[test]
    fn test_attach_rejects_cycle() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let a = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        graph.attach(&AnchorRef::field(a, "z"), &AnchorRef::field(b, "y")).unwrap();
        assert!(depends_on(&graph, b, a));
        assert!(!depends_on(&graph, a, b));

        let err = graph
            .attach(&AnchorRef::field(b, "z"), &AnchorRef::field(a, "y"))
            .unwrap_err();
        assert!(matches!(err, crate::link::AttachError::WouldCreateCycle { .. }));
    }

    #[test]
    fn test_cycle_in_foreign_data_is_reported() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let a = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        let b = graph.add_node(testing::node(&registry, &mut ids, "doubler"));
        graph.attach(&AnchorRef::field(a, "z"), &AnchorRef::field(b, "y")).unwrap();

        // inject the back edge directly, as a corrupt file would
        let back = Link {
            local_node: a,
            local_field: "y".into(),
            local_slot: None,
            distant_node: b,
            distant_field: "z".into(),
            distant_slot: None,
            direction: LinkDirection::Incoming,
        };
        graph.node_mut(a).unwrap().links_mut().push(back);

        let err = evaluate(&mut graph, 64).unwrap_err();
        assert!(matches!(err, EvaluationError::CycleDetected(_)));
        assert!(graph.is_order_dirty());
    }

    #[test]
    fn test_depth_bound() {
        let (registry, mut ids) = testing::registry();
        let mut graph = Graph::new("Test", GraphSettings::default(), &mut ids);
        let chain: Vec<NodeId> = (0..6)
            .map(|i| {
                let node = testing::node(&registry, &mut ids, if i == 0 { "constant" } else { "doubler" });
                graph.add_node(node)
            })
            .collect();
        for pair in chain.windows(2) {
            let field = if pair[0] == chain[0] { "x" } else { "z" };
            graph
                .attach(&AnchorRef::field(pair[0], field), &AnchorRef::field(pair[1], "y"))
                .unwrap();
        }
        assert!(!graph.is_order_dirty());
        // deepest node first so the walk starts at the far end of the chain
        graph.nodes.reverse();

        let err = evaluate(&mut graph, 3).unwrap_err();
        assert!(matches!(err, EvaluationError::DepthExceeded { limit: 3, .. }));
        assert!(graph.is_order_dirty());
        assert!(evaluate(&mut graph, 64).is_ok());
        assert_eq!(order(&graph, chain[5]), 6);
    }
}
