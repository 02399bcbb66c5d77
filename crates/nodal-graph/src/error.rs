use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("Cycle detected in graph: unresolved nodes [{}]", .remaining.join(", "))]
  CycleDetected { remaining: Vec<String> },

  #[error("node not found: {0}")]
  NodeNotFound(String),
}
