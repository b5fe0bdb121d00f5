// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph boundary proxies.
//!
//! Every graph owns an input proxy and an output proxy. Their fields are
//! added with [`Graph::add_input_field`](crate::Graph::add_input_field) and
//! [`Graph::add_output_field`](crate::Graph::add_output_field); values cross
//! the boundary through ordinary links, so the proxies do no work of their own.

use crate::node::{Node, NodeBehavior, NodeId, NodeIo, ProcessContext, ProcessError};

/// Type id of input proxies
pub const GRAPH_INPUT_TYPE: &str = "graph_input";
/// Type id of output proxies
pub const GRAPH_OUTPUT_TYPE: &str = "graph_output";

/// Pass-through exposing a graph's inputs to its nodes
#[derive(Debug, Default)]
pub struct GraphInputNode;

impl NodeBehavior for GraphInputNode {
    fn on_process(&mut self, _io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// Pass-through collecting a graph's outputs
#[derive(Debug, Default)]
pub struct GraphOutputNode;

impl NodeBehavior for GraphOutputNode {
    fn on_process(&mut self, _io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// Create an input proxy with no fields
pub fn input_proxy(id: NodeId) -> Node {
    Node::bare(id, GRAPH_INPUT_TYPE, "Input", Box::new(GraphInputNode))
}

/// Create an output proxy with no fields
pub fn output_proxy(id: NodeId) -> Node {
    Node::bare(id, GRAPH_OUTPUT_TYPE, "Output", Box::new(GraphOutputNode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxies_start_empty() {
        let input = input_proxy(NodeId(1));
        let output = output_proxy(NodeId(2));
        assert_eq!(input.type_id(), GRAPH_INPUT_TYPE);
        assert_eq!(output.type_id(), GRAPH_OUTPUT_TYPE);
        assert!(input.anchors().is_empty());
        assert!(output.links().is_empty());
    }
}
