// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph engine for procedural world generation.
//!
//! Graphs hold nodes with typed fields (anchors). Links connect an output
//! field to an input field or to one slot of a multiple input. The engine:
//! - Computes a dependency-respecting evaluation order
//! - Runs passes that process nodes and propagate values along links
//! - Nests subgraphs behind input and output proxy nodes
//! - Persists graph trees as RON or JSON
//!
//! ## Architecture
//!
//! [`GraphSession`] owns the root graph, the node type registry and the
//! node id counter, and exposes the editing gestures. [`Graph`] stores
//! nodes, links and subgraphs; [`link::LinkTable`] is its only link
//! mutator. [`order`] assigns compute orders, [`evaluation`] runs passes.

pub mod anchor;
pub mod config;
pub mod evaluation;
pub mod field;
pub mod graph;
pub mod graphs;
pub mod link;
pub mod node;
pub mod order;
pub mod persistence;
pub mod session;
pub mod value;

#[cfg(test)]
mod testing;

pub use anchor::{Anchor, AnchorDirection, AnchorType, AnchorValue, FieldDecl};
pub use config::EngineConfig;
pub use evaluation::PassStats;
pub use graph::{Graph, GraphId, GraphSettings};
pub use link::{AnchorRef, AttachError, Link};
pub use node::{Node, NodeId, NodeRegistry};
pub use order::EvaluationError;
pub use persistence::GraphFile;
pub use session::{GraphSession, SessionError, SharedSession};
pub use value::FieldValue;
