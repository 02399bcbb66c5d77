use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use crate::error::GraphError;
use crate::workflow::GraphInstance;

/// Dependency structure of a graph, derived from its edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
  /// Node ids in graph order.
  nodes: Vec<String>,
  /// Reverse adjacency: node_id -> ids of the nodes feeding it.
  dependencies: HashMap<String, HashSet<String>>,
  /// Adjacency: node_id -> ids of the nodes it feeds.
  dependents: HashMap<String, HashSet<String>>,
  /// node_id -> position in graph order.
  positions: HashMap<String, usize>,
}

impl DependencyGraph {
  /// Build the dependency structure from a graph's nodes and edges.
  ///
  /// Edges that reference a node missing from the graph are skipped.
  pub fn build(graph: &GraphInstance) -> Self {
    let nodes: Vec<String> = graph.nodes.iter().map(|node| node.id.clone()).collect();
    let mut dependencies: HashMap<String, HashSet<String>> = HashMap::new();
    let mut dependents: HashMap<String, HashSet<String>> = HashMap::new();

    for node_id in &nodes {
      dependencies.entry(node_id.clone()).or_default();
      dependents.entry(node_id.clone()).or_default();
    }

    for edge in &graph.edges {
      if !dependencies.contains_key(&edge.source) || !dependencies.contains_key(&edge.target) {
        warn!(
          edge_id = %edge.id,
          source = %edge.source,
          target = %edge.target,
          "edge references unknown node, ignoring"
        );
        continue;
      }

      dependencies
        .entry(edge.target.clone())
        .or_default()
        .insert(edge.source.clone());
      dependents
        .entry(edge.source.clone())
        .or_default()
        .insert(edge.target.clone());
    }

    Self {
      nodes,
      dependencies,
      dependents,
      positions: graph.index(),
    }
  }

  /// Node ids in graph order.
  pub fn node_ids(&self) -> &[String] {
    &self.nodes
  }

  /// Nodes feeding the given node.
  pub fn dependencies(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self
      .dependencies
      .get(node_id)
      .into_iter()
      .flatten()
      .map(String::as_str)
  }

  /// Nodes fed by the given node.
  pub fn dependents(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self
      .dependents
      .get(node_id)
      .into_iter()
      .flatten()
      .map(String::as_str)
  }

  /// Order all nodes so every node follows the nodes it depends on.
  ///
  /// Kahn's algorithm, seeded in graph order so the result is deterministic.
  /// If any node is left unresolved the graph has a cycle and no partial
  /// order is returned.
  pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
    let mut in_degree: HashMap<&str, usize> = self
      .nodes
      .iter()
      .map(|id| {
        let degree = self.dependencies.get(id).map_or(0, HashSet::len);
        (id.as_str(), degree)
      })
      .collect();

    let mut queue: VecDeque<&str> = self
      .nodes
      .iter()
      .map(String::as_str)
      .filter(|id| in_degree.get(id) == Some(&0))
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());

    while let Some(node_id) = queue.pop_front() {
      order.push(node_id.to_string());

      // Visit dependents in graph order rather than hash order
      let mut dependents: Vec<&str> = self.dependents(node_id).collect();
      dependents.sort_by_key(|id| self.position(id));

      for dependent in dependents {
        if let Some(degree) = in_degree.get_mut(dependent) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(dependent);
          }
        }
      }
    }

    if order.len() < self.nodes.len() {
      let remaining = self
        .nodes
        .iter()
        .filter(|id| in_degree.get(id.as_str()).is_some_and(|degree| *degree > 0))
        .cloned()
        .collect();
      return Err(GraphError::CycleDetected { remaining });
    }

    Ok(order)
  }

  fn position(&self, node_id: &str) -> usize {
    self.positions.get(node_id).copied().unwrap_or(usize::MAX)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Edge, NodeInstance};

  fn graph(ids: &[&str], edges: &[(&str, &str)]) -> GraphInstance {
    let nodes = ids.iter().map(|id| NodeInstance::new(*id, "Test::Node")).collect();
    let edges = edges
      .iter()
      .enumerate()
      .map(|(i, (from, to))| Edge::new(format!("e{i}"), *from, "out", *to, "in"))
      .collect();
    GraphInstance::new(nodes, edges)
  }

  fn assert_respects_edges(order: &[String], edges: &[(&str, &str)]) {
    for (from, to) in edges {
      let from_pos = order.iter().position(|id| id == from).unwrap();
      let to_pos = order.iter().position(|id| id == to).unwrap();
      assert!(from_pos < to_pos, "{from} must precede {to} in {order:?}");
    }
  }

  #[test]
  fn test_linear_order() {
    let edges = [("a", "b"), ("b", "c")];
    let order = graph(&["c", "b", "a"], &edges)
      .dependency_graph()
      .topological_sort()
      .unwrap();
    assert_eq!(order, vec!["a", "b", "c"]);
  }

  #[test]
  fn test_diamond_respects_every_edge() {
    let edges = [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("e", "d")];
    let order = graph(&["d", "c", "b", "a", "e"], &edges)
      .dependency_graph()
      .topological_sort()
      .unwrap();
    assert_eq!(order.len(), 5);
    assert_respects_edges(&order, &edges);
  }

  #[test]
  fn test_independent_nodes_keep_graph_order() {
    let order = graph(&["x", "y", "z"], &[])
      .dependency_graph()
      .topological_sort()
      .unwrap();
    assert_eq!(order, vec!["x", "y", "z"]);
  }

  #[test]
  fn test_two_node_cycle() {
    let err = graph(&["a", "b"], &[("a", "b"), ("b", "a")])
      .dependency_graph()
      .topological_sort()
      .unwrap_err();
    assert!(err.to_string().contains("Cycle detected in graph"));
    assert_eq!(
      err,
      GraphError::CycleDetected {
        remaining: vec!["a".to_string(), "b".to_string()]
      }
    );
  }

  #[test]
  fn test_cycle_downstream_of_acyclic_prefix() {
    let err = graph(&["root", "a", "b", "c"], &[("root", "a"), ("a", "b"), ("b", "c"), ("c", "a")])
      .dependency_graph()
      .topological_sort()
      .unwrap_err();
    match err {
      GraphError::CycleDetected { remaining } => {
        assert_eq!(remaining, vec!["a", "b", "c"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn test_self_loop_is_a_cycle() {
    let result = graph(&["a"], &[("a", "a")])
      .dependency_graph()
      .topological_sort();
    assert!(matches!(result, Err(GraphError::CycleDetected { .. })));
  }

  #[test]
  fn test_edges_to_unknown_nodes_are_ignored() {
    let deps = graph(&["a", "b"], &[("a", "b"), ("ghost", "b")]).dependency_graph();
    assert_eq!(deps.dependencies("b").collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(deps.topological_sort().unwrap(), vec!["a", "b"]);
  }

  #[test]
  fn test_long_chain_sorts_in_linear_time() {
    let ids: Vec<String> = (0..50_000).map(|i| format!("n{i}")).collect();
    let nodes = ids.iter().rev().map(|id| NodeInstance::new(id, "Test::Node")).collect();
    let edges = ids
      .windows(2)
      .map(|pair| Edge::new(format!("{}-{}", pair[0], pair[1]), &pair[0], "out", &pair[1], "in"))
      .collect();

    let started = std::time::Instant::now();
    let order = GraphInstance::new(nodes, edges)
      .dependency_graph()
      .topological_sort()
      .unwrap();

    assert_eq!(order, ids);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
  }

  #[test]
  fn test_dependents_visited_in_graph_order() {
    let order = graph(&["root", "z", "y", "x"], &[("root", "x"), ("root", "y"), ("root", "z")])
      .dependency_graph()
      .topological_sort()
      .unwrap();
    assert_eq!(order, vec!["root", "z", "y", "x"]);
  }

  #[test]
  fn test_duplicate_edges_count_once() {
    let deps = graph(&["a", "b"], &[("a", "b"), ("a", "b")]).dependency_graph();
    assert_eq!(deps.dependents("a").count(), 1);
    assert_eq!(deps.topological_sort().unwrap(), vec!["a", "b"]);
  }
}
