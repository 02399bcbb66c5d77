use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::DependencyGraph;
use crate::node::NodeInstance;

/// A directed connection from one node's output socket to another node's
/// input socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
  pub id: String,
  pub source: String,
  pub source_socket: String,
  pub target: String,
  pub target_socket: String,
}

impl Edge {
  pub fn new(
    id: impl Into<String>,
    source: impl Into<String>,
    source_socket: impl Into<String>,
    target: impl Into<String>,
    target_socket: impl Into<String>,
  ) -> Self {
    Self {
      id: id.into(),
      source: source.into(),
      source_socket: source_socket.into(),
      target: target.into(),
      target_socket: target_socket.into(),
    }
  }
}

/// Global settings shared by every node of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSettings {
  pub units: String,
  pub tolerance: f64,
}

impl Default for GraphSettings {
  fn default() -> Self {
    Self {
      units: "mm".to_string(),
      tolerance: 1e-6,
    }
  }
}

/// A graph snapshot handed to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphInstance {
  pub nodes: Vec<NodeInstance>,
  #[serde(default)]
  pub edges: Vec<Edge>,
  #[serde(default)]
  pub settings: GraphSettings,
}

impl GraphInstance {
  pub fn new(nodes: Vec<NodeInstance>, edges: Vec<Edge>) -> Self {
    Self {
      nodes,
      edges,
      settings: GraphSettings::default(),
    }
  }

  /// Build the dependency structure for ordering.
  pub fn dependency_graph(&self) -> DependencyGraph {
    DependencyGraph::build(self)
  }

  /// Get a node by ID.
  pub fn node(&self, node_id: &str) -> Option<&NodeInstance> {
    self.nodes.iter().find(|node| node.id == node_id)
  }

  /// Get a mutable node by ID.
  pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeInstance> {
    self.nodes.iter_mut().find(|node| node.id == node_id)
  }

  /// Get a node by ID, failing with [`GraphError::NodeNotFound`].
  pub fn require(&self, node_id: &str) -> Result<&NodeInstance, GraphError> {
    self
      .node(node_id)
      .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))
  }

  /// Map of node id to its position in [`GraphInstance::nodes`].
  pub fn index(&self) -> HashMap<String, usize> {
    self
      .nodes
      .iter()
      .enumerate()
      .map(|(position, node)| (node.id.clone(), position))
      .collect()
  }
}
