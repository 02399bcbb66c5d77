//! Nodal Runtime
//!
//! This crate incrementally evaluates node graphs.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//! ├── evaluate(graph, dirty) -> EvaluationSummary
//! │   ├── DependencyGraph::topological_sort   (cycle = whole run fails)
//! │   ├── affected_nodes                      (dirty + everything downstream)
//! │   └── per affected node, in order:
//! │       ├── resolve inputs (dirty sources evaluated on demand)
//! │       ├── ComputeCache lookup by hash_node(node, inputs)
//! │       └── NodeDefinition::evaluate on a miss
//! ├── evaluate_node(graph, id)
//! └── cancel_node(id) / cancel_all()
//! ```
//!
//! Node failures are isolated: the failing node gets the error on its state,
//! and the run continues with the next node.
//!
//! # Usage
//!
//! ```ignore
//! use nodal_runtime::{NodeDefinition, NodeRegistry, Scheduler, SchedulerConfig};
//!
//! let mut registry = NodeRegistry::new();
//! registry.register_node(
//!   NodeDefinition::from_fn("Math::Constant", "Math", |_, params| {
//!     Ok(Outputs::from([("value".to_string(), params["value"].clone())]))
//!   })
//!   .with_outputs(["value"]),
//! );
//!
//! let mut scheduler = Scheduler::new(registry, SchedulerConfig::default());
//! let summary = scheduler.evaluate(&mut graph, ["constant-1"]).await?;
//! ```

mod cancel;
mod context;
mod error;
mod profiler;
mod registry;
mod scheduler;

pub use cancel::CancelHandle;
pub use context::{EvaluationContext, Worker};
pub use error::{BoxError, CodedError, ErrorCode, ErrorContext, EvaluationError, SchedulerError};
pub use profiler::{
  EvaluationProfiler, EvaluationSample, EvaluationSummary, ProfilerConfig, UNKNOWN_CATEGORY,
};
pub use registry::{NodeDefinition, NodeEvaluator, NodeRegistry};
pub use scheduler::{FailurePolicy, Scheduler, SchedulerConfig, affected_nodes};
