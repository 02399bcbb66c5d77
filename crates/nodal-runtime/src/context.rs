//! Evaluation context handed to node evaluators.

use std::any::Any;
use std::sync::Arc;

use nodal_cache::ComputeCache;
use nodal_graph::{GraphInstance, GraphSettings, Outputs};
use tokio_util::sync::CancellationToken;

/// Opaque compute backend (geometry kernel, worker pool, ...) passed through
/// to evaluators untouched.
pub type Worker = Arc<dyn Any + Send + Sync>;

/// Everything an evaluator may look at while computing one node.
pub struct EvaluationContext<'a> {
  graph: &'a GraphInstance,
  node_id: &'a str,
  run_id: &'a str,
  cache: &'a ComputeCache<Outputs>,
  worker: Option<&'a Worker>,
  cancel: CancellationToken,
}

impl<'a> EvaluationContext<'a> {
  pub(crate) fn new(
    graph: &'a GraphInstance,
    node_id: &'a str,
    run_id: &'a str,
    cache: &'a ComputeCache<Outputs>,
    worker: Option<&'a Worker>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      graph,
      node_id,
      run_id,
      cache,
      worker,
      cancel,
    }
  }

  /// The graph being evaluated.
  pub fn graph(&self) -> &GraphInstance {
    self.graph
  }

  /// ID of the node being evaluated.
  pub fn node_id(&self) -> &str {
    self.node_id
  }

  /// ID of the evaluation run this call belongs to.
  pub fn run_id(&self) -> &str {
    self.run_id
  }

  pub fn settings(&self) -> &GraphSettings {
    &self.graph.settings
  }

  /// Read-only view of the scheduler's compute cache.
  pub fn cache(&self) -> &ComputeCache<Outputs> {
    self.cache
  }

  /// The worker, if one was configured and it is a `T`.
  pub fn worker<T: Any + Send + Sync>(&self) -> Option<&T> {
    self.worker.and_then(|worker| worker.as_ref().downcast_ref::<T>())
  }

  /// Token cancelled when this node's evaluation is aborted.
  ///
  /// Cancellation is advisory: evaluators should check it at their own
  /// suspension points and return early.
  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}
