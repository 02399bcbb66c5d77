//! Nodal Graph
//!
//! This crate provides the graph representation evaluated by the nodal
//! scheduler: node instances with their parameters, input bindings and
//! outputs, the edges between them, and the dependency analysis used to
//! order evaluation.
//!
//! The graph itself is owned by whoever edits it. The scheduler only ever
//! writes a node's `outputs`, `dirty` flag and diagnostic `state`.

mod error;
mod graph;
mod node;
mod workflow;

pub use error::GraphError;
pub use graph::DependencyGraph;
pub use node::{
  InputBinding, InputValues, NodeFailure, NodeInstance, NodeState, Outputs, Params, SocketRef,
};
pub use workflow::{Edge, GraphInstance, GraphSettings};
