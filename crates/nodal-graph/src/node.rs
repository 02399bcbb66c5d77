use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node parameters, keyed by parameter name.
pub type Params = BTreeMap<String, Value>;

/// Resolved input values handed to a node's evaluator, keyed by input name.
pub type InputValues = BTreeMap<String, Value>;

/// Values produced by a node, keyed by output socket name.
pub type Outputs = BTreeMap<String, Value>;

/// A reference to a named output socket on another node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketRef {
  pub node_id: String,
  pub socket_id: String,
}

impl SocketRef {
  pub fn new(node_id: impl Into<String>, socket_id: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      socket_id: socket_id.into(),
    }
  }
}

/// What an input socket is wired to.
///
/// An unbound input simply has no entry in [`NodeInstance::inputs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputBinding {
  Single(SocketRef),
  Multiple(Vec<SocketRef>),
}

impl InputBinding {
  /// All socket references behind this binding, in order.
  pub fn refs(&self) -> &[SocketRef] {
    match self {
      InputBinding::Single(socket) => std::slice::from_ref(socket),
      InputBinding::Multiple(sockets) => sockets,
    }
  }
}

impl From<SocketRef> for InputBinding {
  fn from(socket: SocketRef) -> Self {
    InputBinding::Single(socket)
  }
}

impl From<Vec<SocketRef>> for InputBinding {
  fn from(sockets: Vec<SocketRef>) -> Self {
    InputBinding::Multiple(sockets)
  }
}

/// Serializable snapshot of the last evaluation failure of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
  pub code: String,
  pub message: String,
  pub operation: String,
  pub duration_ms: f64,
  pub inputs: Vec<String>,
}

/// Diagnostic state written by the scheduler after each evaluation attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
  /// Message of the most recent failure, cleared on success.
  pub error: Option<String>,
  /// Structured form of the most recent failure, cleared on success.
  pub last_error: Option<NodeFailure>,
  pub compute_time_ms: Option<f64>,
  pub cache_hit: bool,
}

/// A node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
  pub id: String,
  /// Registry key of the node definition.
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default)]
  pub params: Params,
  #[serde(default)]
  pub inputs: BTreeMap<String, InputBinding>,
  #[serde(default)]
  pub outputs: Outputs,
  #[serde(default)]
  pub dirty: bool,
  #[serde(default)]
  pub state: NodeState,
}

impl NodeInstance {
  /// Create a dirty node with no params or bindings.
  pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      node_type: node_type.into(),
      params: Params::new(),
      inputs: BTreeMap::new(),
      outputs: Outputs::new(),
      dirty: true,
      state: NodeState::default(),
    }
  }

  pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.params.insert(name.into(), value.into());
    self
  }

  pub fn with_input(mut self, name: impl Into<String>, binding: impl Into<InputBinding>) -> Self {
    self.inputs.insert(name.into(), binding.into());
    self
  }

  pub fn with_dirty(mut self, dirty: bool) -> Self {
    self.dirty = dirty;
    self
  }

  /// Ids of every node referenced by this node's input bindings.
  pub fn source_ids(&self) -> impl Iterator<Item = &str> {
    self
      .inputs
      .values()
      .flat_map(|binding| binding.refs())
      .map(|socket| socket.node_id.as_str())
  }
}
