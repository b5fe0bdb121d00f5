// SPDX-License-Identifier: MIT OR Apache-2.0
//! Small node types shared by unit tests.

use crate::anchor::{AnchorType, FieldDecl};
use crate::graph::NodeIdAllocator;
use crate::node::{
    Node, NodeBehavior, NodeCategory, NodeIo, NodeRegistry, NodeTypeDescriptor, ProcessContext,
    ProcessError,
};
use crate::value::FieldValue;

/// Keeps its output fields as they are
#[derive(Debug)]
struct Constant;

impl NodeBehavior for Constant {
    fn on_process(&mut self, _io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// `z = y * 2`
#[derive(Debug)]
struct Doubler;

impl NodeBehavior for Doubler {
    fn on_process(&mut self, io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let y = io.require("y")?.as_float().unwrap_or_default();
        io.set("z", FieldValue::Float(y * 2.0))?;
        Ok(())
    }
}

/// `total = bias + sum(values)`
#[derive(Debug)]
struct Sum;

impl NodeBehavior for Sum {
    fn on_process(&mut self, io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let total = io.float("bias").unwrap_or_default()
            + io.values("values").filter_map(FieldValue::as_float).sum::<f32>();
        io.set("total", FieldValue::Float(total))?;
        Ok(())
    }
}

pub(crate) fn registry() -> (NodeRegistry, NodeIdAllocator) {
    let mut registry = NodeRegistry::new();
    registry.register(
        NodeTypeDescriptor::new("constant", "Constant", NodeCategory::SimpleValues, || {
            Box::new(Constant)
        })
        .with_field(FieldDecl::output("x", AnchorType::Float).with_default(FieldValue::Float(5.0))),
    );
    registry.register(
        NodeTypeDescriptor::new("doubler", "Doubler", NodeCategory::Operations, || {
            Box::new(Doubler)
        })
        .with_field(FieldDecl::input("y", AnchorType::Float))
        .with_field(FieldDecl::output("z", AnchorType::Float)),
    );
    registry.register(
        NodeTypeDescriptor::new("sum", "Sum", NodeCategory::Operations, || Box::new(Sum))
            .with_field(FieldDecl::input("values", AnchorType::Float).multiple(1, 4))
            .with_field(FieldDecl::input("bias", AnchorType::Float))
            .with_field(FieldDecl::output("total", AnchorType::Float)),
    );
    registry.register(
        NodeTypeDescriptor::new("fanout", "Fanout", NodeCategory::Operations, || {
            Box::new(Constant)
        })
        .with_field(FieldDecl::output("outs", AnchorType::Float).multiple(1, 2)),
    );
    (registry, NodeIdAllocator::new())
}

pub(crate) fn node(registry: &NodeRegistry, ids: &mut NodeIdAllocator, type_id: &str) -> Node {
    let mut node = registry
        .create_node(type_id, ids.allocate())
        .expect("test node type is registered");
    node.create();
    node
}
