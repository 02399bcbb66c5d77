//! Incremental evaluation of node graphs.
//!
//! Re-exports the graph model, the compute cache and the scheduler so a host
//! application can depend on a single crate.

pub use nodal_cache as cache;
pub use nodal_graph as graph;
pub use nodal_runtime as runtime;

pub use nodal_cache::{CacheStats, ComputeCache, hash, hash_geometry, hash_node, normalize};
pub use nodal_graph::{
  DependencyGraph, Edge, GraphError, GraphInstance, GraphSettings, InputBinding, InputValues,
  NodeFailure, NodeInstance, NodeState, Outputs, Params, SocketRef,
};
pub use nodal_runtime::{
  BoxError, CancelHandle, CodedError, ErrorCode, EvaluationContext, EvaluationError,
  EvaluationProfiler, EvaluationSummary, FailurePolicy, NodeDefinition, NodeEvaluator,
  NodeRegistry, Scheduler, SchedulerConfig, SchedulerError,
};
