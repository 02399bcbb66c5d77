//! Incremental graph evaluation.
//!
//! The [`Scheduler`] owns the node registry, compute cache and profiler, and
//! provides `evaluate(graph, dirty)` to bring every node affected by a change
//! up to date.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use nodal_cache::{ComputeCache, hash_node};
use nodal_graph::{
  DependencyGraph, GraphInstance, InputBinding, InputValues, NodeState, Outputs, SocketRef,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Span, debug, error, info, instrument, warn};

use crate::cancel::CancelHandle;
use crate::context::{EvaluationContext, Worker};
use crate::error::{
  BoxError, CodedError, ErrorCode, ErrorContext, EvaluationError, SchedulerError,
};
use crate::profiler::{EvaluationProfiler, EvaluationSample, EvaluationSummary, ProfilerConfig};
use crate::registry::{NodeDefinition, NodeRegistry};

const OPERATION_EVALUATE: &str = "evaluate";
const OPERATION_CACHE_LOOKUP: &str = "cache_lookup";
const OPERATION_RESOLVE_INPUTS: &str = "resolve_inputs";

/// What to do with nodes downstream of a failure in the same run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Evaluate them anyway, against whatever outputs their sources still hold.
  #[default]
  Continue,
  /// Fail them with `UPSTREAM_FAILED` without running their evaluator.
  SkipDependents,
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// Compute cache budget in megabytes.
  pub cache_max_mb: f64,
  /// Number of samples the profiler keeps per run.
  pub profiler_capacity: usize,
  /// Evaluations slower than this are logged as slow.
  pub slow_threshold_ms: f64,
  pub slow_node_limit: usize,
  pub failure_policy: FailurePolicy,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      cache_max_mb: nodal_cache::DEFAULT_MAX_SIZE_MB,
      profiler_capacity: 512,
      slow_threshold_ms: 1500.0,
      slow_node_limit: 5,
      failure_policy: FailurePolicy::Continue,
    }
  }
}

impl SchedulerConfig {
  fn profiler_config(&self) -> ProfilerConfig {
    ProfilerConfig {
      capacity: self.profiler_capacity,
      slow_threshold_ms: self.slow_threshold_ms,
      slow_node_limit: self.slow_node_limit,
    }
  }
}

/// Bookkeeping for one evaluation run, threaded through recursive calls.
struct RunState {
  run_id: String,
  /// Nodes currently being evaluated, outermost first.
  in_progress: Vec<String>,
  failed: HashSet<String>,
  /// Static dependencies, present for full-graph runs.
  dependencies: Option<DependencyGraph>,
}

impl RunState {
  fn new(dependencies: Option<DependencyGraph>) -> Self {
    Self {
      run_id: uuid::Uuid::new_v4().to_string(),
      in_progress: Vec::new(),
      failed: HashSet::new(),
      dependencies,
    }
  }

  fn is_in_progress(&self, node_id: &str) -> bool {
    self.in_progress.iter().any(|id| id == node_id)
  }

  /// A static dependency of the node that already failed in this run.
  fn failed_dependency(&self, node_id: &str) -> Option<String> {
    self
      .dependencies
      .as_ref()?
      .dependencies(node_id)
      .find(|id| self.failed.contains(*id))
      .map(ToString::to_string)
  }
}

/// Outputs of a successful node evaluation.
struct Computed {
  outputs: Outputs,
  cache_hit: bool,
}

/// Incremental evaluator for node graphs.
///
/// A scheduler is single-writer: concurrent `evaluate` calls against one
/// instance must be serialized by the caller.
pub struct Scheduler {
  registry: NodeRegistry,
  cache: ComputeCache<Outputs>,
  profiler: EvaluationProfiler,
  cancel: CancelHandle,
  worker: Option<Worker>,
  config: SchedulerConfig,
  last_summary: Option<EvaluationSummary>,
}

impl Scheduler {
  /// Create a scheduler over an already populated registry.
  pub fn new(registry: NodeRegistry, config: SchedulerConfig) -> Self {
    Self {
      registry,
      cache: ComputeCache::new(config.cache_max_mb),
      profiler: EvaluationProfiler::new(config.profiler_config()),
      cancel: CancelHandle::default(),
      worker: None,
      config,
      last_summary: None,
    }
  }

  /// Attach the compute backend handed to evaluators through their context.
  pub fn with_worker<W: Any + Send + Sync>(mut self, worker: W) -> Self {
    self.worker = Some(Arc::new(worker));
    self
  }

  pub fn registry(&self) -> &NodeRegistry {
    &self.registry
  }

  pub fn registry_mut(&mut self) -> &mut NodeRegistry {
    &mut self.registry
  }

  pub fn cache(&self) -> &ComputeCache<Outputs> {
    &self.cache
  }

  pub fn cache_mut(&mut self) -> &mut ComputeCache<Outputs> {
    &mut self.cache
  }

  /// Samples of the current or most recent run.
  pub fn profiler(&self) -> &EvaluationProfiler {
    &self.profiler
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  /// Summary of the most recent completed `evaluate` call.
  pub fn last_summary(&self) -> Option<&EvaluationSummary> {
    self.last_summary.as_ref()
  }

  /// A handle that can cancel evaluations from another task.
  pub fn cancel_handle(&self) -> CancelHandle {
    self.cancel.clone()
  }

  /// Abort a node's in-flight evaluation, if any.
  pub fn cancel_node(&self, node_id: &str) -> bool {
    self.cancel.cancel_node(node_id)
  }

  /// Abort every in-flight evaluation.
  pub fn cancel_all(&self) -> usize {
    self.cancel.cancel_all()
  }

  /// Re-evaluate every node affected by the given dirty nodes.
  ///
  /// Nodes are evaluated one at a time in topological order. A cycle aborts
  /// the run before any node executes. A failing node is recorded on its
  /// state and the run moves on to the next node.
  #[instrument(
    name = "graph_evaluate",
    skip_all,
    fields(nodes = graph.nodes.len(), run_id = tracing::field::Empty)
  )]
  pub async fn evaluate<I, S>(
    &mut self,
    graph: &mut GraphInstance,
    dirty_node_ids: I,
  ) -> Result<EvaluationSummary, SchedulerError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.profiler.reset();

    let dirty: HashSet<String> = dirty_node_ids.into_iter().map(Into::into).collect();
    let dependencies = DependencyGraph::build(graph);

    let order = match dependencies.topological_sort() {
      Ok(order) => order,
      Err(e) => {
        error!(error = %e, "evaluation_aborted");
        return Err(e.into());
      }
    };

    let affected = affected_nodes(&order, &dependencies, &dirty);
    let mut run = RunState::new(Some(dependencies));
    Span::current().record("run_id", run.run_id.as_str());

    info!(
      run_id = %run.run_id,
      dirty = dirty.len(),
      affected = affected.len(),
      "evaluation_started"
    );

    for node_id in order.iter().filter(|id| affected.contains(id.as_str())) {
      if let Err(e) = self.evaluate_in_run(graph, node_id, &mut run).await {
        debug!(
          run_id = %run.run_id,
          node_id = %node_id,
          code = %e.code,
          "node_failure_isolated"
        );
      }
    }

    let summary = self.profiler.summary();
    info!(
      run_id = %run.run_id,
      total = summary.total_count,
      succeeded = summary.success_count,
      failed = summary.failure_count,
      cache_hits = summary.cache_hit_count,
      average_ms = summary.average_ms,
      p50_ms = summary.p50_ms,
      p95_ms = summary.p95_ms,
      max_ms = summary.max_ms,
      "evaluation_completed"
    );

    self.last_summary = Some(summary.clone());
    Ok(summary)
  }

  /// Evaluate a single node, first evaluating any dirty sources it reads.
  ///
  /// Unlike [`Scheduler::evaluate`] this does not reset the profiler.
  pub async fn evaluate_node(
    &mut self,
    graph: &mut GraphInstance,
    node_id: &str,
  ) -> Result<(), EvaluationError> {
    let mut run = RunState::new(None);
    self.evaluate_in_run(graph, node_id, &mut run).await
  }

  /// Reentrancy-guarded evaluation of one node within a run.
  ///
  /// Boxed because input resolution recurses back into it for dirty sources.
  fn evaluate_in_run<'a>(
    &'a mut self,
    graph: &'a mut GraphInstance,
    node_id: &'a str,
    run: &'a mut RunState,
  ) -> BoxFuture<'a, Result<(), EvaluationError>> {
    Box::pin(async move {
      if run.is_in_progress(node_id) {
        return Err(circular_dependency(graph, node_id, run));
      }

      run.in_progress.push(node_id.to_string());
      let result = self.run_node(graph, node_id, run).await;
      run.in_progress.retain(|id| id != node_id);
      self.cancel.release(node_id);

      result
    })
  }

  async fn run_node(
    &mut self,
    graph: &mut GraphInstance,
    node_id: &str,
    run: &mut RunState,
  ) -> Result<(), EvaluationError> {
    let started = Instant::now();

    let (node_type, params, input_keys) = match graph.require(node_id) {
      Ok(node) => (
        node.node_type.clone(),
        node.params.clone(),
        node.inputs.keys().cloned().collect::<Vec<_>>(),
      ),
      Err(e) => {
        let context = ErrorContext {
          node_id: node_id.to_string(),
          operation: OPERATION_EVALUATE.to_string(),
          ..ErrorContext::default()
        };
        return Err(EvaluationError::new(ErrorCode::NodeNotFound, e.to_string(), context));
      }
    };

    let outcome = self.compute(graph, node_id, &node_type, run).await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
      Ok(computed) => {
        if let Some(node) = graph.node_mut(node_id) {
          node.outputs = computed.outputs;
          node.dirty = false;
          node.state = NodeState {
            error: None,
            last_error: None,
            compute_time_ms: Some(duration_ms),
            cache_hit: computed.cache_hit,
          };
        }

        let operation = if computed.cache_hit {
          OPERATION_CACHE_LOOKUP
        } else {
          OPERATION_EVALUATE
        };
        self.profiler.record(EvaluationSample::success(
          node_id,
          &node_type,
          duration_ms,
          operation,
          computed.cache_hit,
        ));

        if duration_ms > self.config.slow_threshold_ms {
          warn!(
            run_id = %run.run_id,
            node_id = %node_id,
            node_type = %node_type,
            duration_ms,
            threshold_ms = self.config.slow_threshold_ms,
            "node_slow"
          );
        }

        debug!(
          run_id = %run.run_id,
          node_id = %node_id,
          node_type = %node_type,
          duration_ms,
          cache_hit = computed.cache_hit,
          "node_evaluated"
        );

        Ok(())
      }
      Err(e) => {
        let context = ErrorContext {
          node_id: node_id.to_string(),
          node_type: node_type.clone(),
          duration_ms,
          operation: OPERATION_EVALUATE.to_string(),
          inputs: input_keys,
          params,
        };
        let error = EvaluationError::from_unknown(e, context);

        // Outputs from the last successful evaluation are kept
        if let Some(node) = graph.node_mut(node_id) {
          node.state.error = Some(error.message.clone());
          node.state.last_error = Some(error.failure());
          node.state.compute_time_ms = Some(duration_ms);
          node.state.cache_hit = false;
        }

        self.profiler.record(EvaluationSample::failure(
          node_id,
          &node_type,
          duration_ms,
          error.operation.as_str(),
          error.code.as_str(),
          error.message.as_str(),
        ));

        error!(
          run_id = %run.run_id,
          node_id = %node_id,
          node_type = %node_type,
          code = %error.code,
          duration_ms,
          error = %error,
          "node_failed"
        );

        run.failed.insert(node_id.to_string());
        Err(error)
      }
    }
  }

  /// Resolve inputs, then serve the node from cache or run its evaluator.
  async fn compute(
    &mut self,
    graph: &mut GraphInstance,
    node_id: &str,
    node_type: &str,
    run: &mut RunState,
  ) -> Result<Computed, BoxError> {
    let definition = self.registry.get_node(node_type).ok_or_else(|| {
      CodedError::new(
        ErrorCode::UnknownNodeType,
        format!("Unknown node type: {node_type}"),
      )
    })?;

    if self.config.failure_policy == FailurePolicy::SkipDependents
      && let Some(failed) = run.failed_dependency(node_id)
    {
      return Err(upstream_failed(&failed).into());
    }

    let inputs = self.collect_inputs(graph, node_id, &definition, run).await?;

    let node = graph.require(node_id)?;
    let cache_key = hash_node(node, &inputs);

    if let Some(outputs) = self.cache.get(&cache_key) {
      debug!(
        run_id = %run.run_id,
        node_id = %node_id,
        cache_key = %cache_key,
        "node_cache_hit"
      );
      return Ok(Computed {
        outputs: outputs.clone(),
        cache_hit: true,
      });
    }

    let token = self.cancel.register(node_id);
    let result = {
      let context = EvaluationContext::new(
        graph,
        node_id,
        &run.run_id,
        &self.cache,
        self.worker.as_ref(),
        token.clone(),
      );
      definition.evaluate(&context, &inputs, &node.params).await
    };

    // An evaluator that returns after being aborted may hold partial results
    if token.is_cancelled() {
      return Err(
        CodedError::new(
          ErrorCode::Cancelled,
          format!("Evaluation of node '{node_id}' was cancelled"),
        )
        .into(),
      );
    }

    let outputs = result?;

    for name in definition.outputs.iter().filter(|name| !outputs.contains_key(*name)) {
      warn!(
        node_id = %node_id,
        node_type = %node_type,
        output = %name,
        "declared output missing from result"
      );
    }

    self.cache.set(cache_key, outputs.clone());

    Ok(Computed {
      outputs,
      cache_hit: false,
    })
  }

  /// Resolve every declared input of a node to a value.
  ///
  /// Unbound inputs resolve to null; inputs bound to several sockets resolve
  /// to an array in binding order.
  async fn collect_inputs(
    &mut self,
    graph: &mut GraphInstance,
    node_id: &str,
    definition: &NodeDefinition,
    run: &mut RunState,
  ) -> Result<InputValues, BoxError> {
    let bindings = graph.require(node_id)?.inputs.clone();
    let mut inputs = InputValues::new();

    for name in &definition.inputs {
      let value = match bindings.get(name) {
        None => Value::Null,
        Some(InputBinding::Single(socket)) => self.resolve_socket(graph, socket, run).await?,
        Some(InputBinding::Multiple(sockets)) => {
          let mut values = Vec::with_capacity(sockets.len());
          for socket in sockets {
            values.push(self.resolve_socket(graph, socket, run).await?);
          }
          Value::Array(values)
        }
      };
      inputs.insert(name.clone(), value);
    }

    Ok(inputs)
  }

  /// Read a source socket, evaluating the source first if it is dirty.
  async fn resolve_socket(
    &mut self,
    graph: &mut GraphInstance,
    socket: &SocketRef,
    run: &mut RunState,
  ) -> Result<Value, BoxError> {
    let source_dirty = match graph.node(&socket.node_id) {
      Some(source) => source.dirty,
      None => {
        return Err(
          CodedError::new(
            ErrorCode::MissingSource,
            format!("Source node '{}' not found", socket.node_id),
          )
          .into(),
        );
      }
    };

    if self.config.failure_policy == FailurePolicy::SkipDependents
      && run.failed.contains(&socket.node_id)
    {
      return Err(upstream_failed(&socket.node_id).into());
    }

    if source_dirty {
      debug!(
        run_id = %run.run_id,
        source = %socket.node_id,
        "evaluating dirty source on demand"
      );
      self.evaluate_in_run(graph, &socket.node_id, run).await?;
    }

    Ok(
      graph
        .node(&socket.node_id)
        .and_then(|source| source.outputs.get(&socket.socket_id))
        .cloned()
        .unwrap_or(Value::Null),
    )
  }
}

/// Nodes that must be re-evaluated: the dirty nodes plus everything
/// downstream of them.
///
/// `order` must be topological, so one forward pass sees every dependency
/// before its dependents. Dirty ids missing from `order` are ignored.
pub fn affected_nodes(
  order: &[String],
  dependencies: &DependencyGraph,
  dirty: &HashSet<String>,
) -> HashSet<String> {
  let mut affected = HashSet::new();

  for node_id in order {
    if dirty.contains(node_id)
      || dependencies
        .dependencies(node_id)
        .any(|dependency| affected.contains(dependency))
    {
      affected.insert(node_id.clone());
    }
  }

  affected
}

fn circular_dependency(graph: &GraphInstance, node_id: &str, run: &RunState) -> EvaluationError {
  let chain = run
    .in_progress
    .iter()
    .map(String::as_str)
    .chain(std::iter::once(node_id))
    .collect::<Vec<_>>()
    .join(" -> ");

  let context = ErrorContext {
    node_id: node_id.to_string(),
    node_type: graph
      .node(node_id)
      .map(|node| node.node_type.clone())
      .unwrap_or_default(),
    operation: OPERATION_RESOLVE_INPUTS.to_string(),
    ..ErrorContext::default()
  };

  EvaluationError::new(
    ErrorCode::CircularDependency,
    format!("Circular dependency detected at node '{node_id}': {chain}"),
    context,
  )
}

fn upstream_failed(failed: &str) -> CodedError {
  CodedError::new(
    ErrorCode::UpstreamFailed,
    format!("Skipped: upstream node '{failed}' failed in this run"),
  )
}
