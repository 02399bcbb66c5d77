//! Runtime error types.

use std::fmt;
use std::sync::Arc;

use nodal_graph::{GraphError, NodeFailure, Params};
use serde::{Deserialize, Serialize};

/// Any failure raised by a node evaluator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Machine-readable classification of an evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  UnknownNodeType,
  NodeNotFound,
  MissingSource,
  CircularDependency,
  UpstreamFailed,
  Cancelled,
  EvaluationFailed,
  #[serde(untagged)]
  Custom(String),
}

impl ErrorCode {
  pub fn as_str(&self) -> &str {
    match self {
      ErrorCode::UnknownNodeType => "UNKNOWN_NODE_TYPE",
      ErrorCode::NodeNotFound => "NODE_NOT_FOUND",
      ErrorCode::MissingSource => "MISSING_SOURCE",
      ErrorCode::CircularDependency => "CIRCULAR_DEPENDENCY",
      ErrorCode::UpstreamFailed => "UPSTREAM_FAILED",
      ErrorCode::Cancelled => "CANCELLED",
      ErrorCode::EvaluationFailed => "EVALUATION_FAILED",
      ErrorCode::Custom(code) => code,
    }
  }
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A failure carrying an explicit code.
///
/// Evaluators return this when they want a specific code to survive
/// normalization; anything else is classified as `EVALUATION_FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CodedError {
  pub code: ErrorCode,
  pub message: String,
}

impl CodedError {
  pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }
}

/// Where an evaluation failure happened.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
  pub node_id: String,
  pub node_type: String,
  pub duration_ms: f64,
  pub operation: String,
  /// Names of the node's bound inputs.
  pub inputs: Vec<String>,
  pub params: Params,
}

/// A node evaluation failure with the context it happened in.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EvaluationError {
  pub node_id: String,
  pub node_type: String,
  pub duration_ms: f64,
  pub operation: String,
  pub inputs: Vec<String>,
  pub params: Params,
  pub message: String,
  pub code: ErrorCode,
  #[source]
  pub cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl EvaluationError {
  pub fn new(code: ErrorCode, message: impl Into<String>, context: ErrorContext) -> Self {
    Self {
      node_id: context.node_id,
      node_type: context.node_type,
      duration_ms: context.duration_ms,
      operation: context.operation,
      inputs: context.inputs,
      params: context.params,
      message: message.into(),
      code,
      cause: None,
    }
  }

  /// Normalize any evaluator failure.
  ///
  /// An `EvaluationError` is returned as is. A [`CodedError`] keeps its code.
  /// Anything else becomes `EVALUATION_FAILED` with the original kept as the
  /// error source.
  pub fn from_unknown(error: BoxError, context: ErrorContext) -> Self {
    let error = match error.downcast::<EvaluationError>() {
      Ok(structured) => return *structured,
      Err(other) => other,
    };

    match error.downcast::<CodedError>() {
      Ok(coded) => Self::new(coded.code, coded.message, context),
      Err(other) => {
        let message = other.to_string();
        Self {
          cause: Some(Arc::from(other)),
          ..Self::new(ErrorCode::EvaluationFailed, message, context)
        }
      }
    }
  }

  /// Serializable snapshot stored on the node's state.
  pub fn failure(&self) -> NodeFailure {
    NodeFailure {
      code: self.code.to_string(),
      message: self.message.clone(),
      operation: self.operation.clone(),
      duration_ms: self.duration_ms,
      inputs: self.inputs.clone(),
    }
  }
}

/// Errors that abort a whole evaluation run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
  /// The graph could not be ordered; no node was evaluated.
  #[error(transparent)]
  Graph(#[from] GraphError),
}
