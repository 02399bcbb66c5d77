//! Node type registry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use nodal_graph::{InputValues, Outputs, Params};

use crate::context::EvaluationContext;
use crate::error::BoxError;

/// Behavior of a node type.
#[async_trait]
pub trait NodeEvaluator: Send + Sync {
  /// Compute the node's outputs from its resolved inputs and params.
  async fn evaluate(
    &self,
    ctx: &EvaluationContext<'_>,
    inputs: &InputValues,
    params: &Params,
  ) -> Result<Outputs, BoxError>;
}

/// Adapts a synchronous closure to [`NodeEvaluator`].
struct FnEvaluator<F>(F);

#[async_trait]
impl<F> NodeEvaluator for FnEvaluator<F>
where
  F: Fn(&InputValues, &Params) -> Result<Outputs, BoxError> + Send + Sync,
{
  async fn evaluate(
    &self,
    _ctx: &EvaluationContext<'_>,
    inputs: &InputValues,
    params: &Params,
  ) -> Result<Outputs, BoxError> {
    (self.0)(inputs, params)
  }
}

/// A registered node type: its schema and evaluator.
#[derive(Clone)]
pub struct NodeDefinition {
  /// Registry key, e.g. `Solid::Box`.
  pub node_type: String,
  pub category: String,
  /// Declared input socket names. Only these are resolved before evaluation.
  pub inputs: Vec<String>,
  /// Declared output socket names.
  pub outputs: Vec<String>,
  evaluator: Arc<dyn NodeEvaluator>,
}

impl NodeDefinition {
  pub fn new(
    node_type: impl Into<String>,
    category: impl Into<String>,
    evaluator: impl NodeEvaluator + 'static,
  ) -> Self {
    Self {
      node_type: node_type.into(),
      category: category.into(),
      inputs: Vec::new(),
      outputs: Vec::new(),
      evaluator: Arc::new(evaluator),
    }
  }

  /// Define a node type backed by a synchronous function.
  pub fn from_fn<F>(node_type: impl Into<String>, category: impl Into<String>, f: F) -> Self
  where
    F: Fn(&InputValues, &Params) -> Result<Outputs, BoxError> + Send + Sync + 'static,
  {
    Self::new(node_type, category, FnEvaluator(f))
  }

  pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.inputs = inputs.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.outputs = outputs.into_iter().map(Into::into).collect();
    self
  }

  pub async fn evaluate(
    &self,
    ctx: &EvaluationContext<'_>,
    inputs: &InputValues,
    params: &Params,
  ) -> Result<Outputs, BoxError> {
    self.evaluator.evaluate(ctx, inputs, params).await
  }
}

impl fmt::Debug for NodeDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NodeDefinition")
      .field("node_type", &self.node_type)
      .field("category", &self.category)
      .field("inputs", &self.inputs)
      .field("outputs", &self.outputs)
      .finish_non_exhaustive()
  }
}

/// Lookup table from node type to definition, indexed by category.
///
/// Built by whoever loads the node library and handed to the scheduler.
#[derive(Debug, Default)]
pub struct NodeRegistry {
  definitions: HashMap<String, Arc<NodeDefinition>>,
  categories: BTreeMap<String, BTreeSet<String>>,
}

impl NodeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a definition, replacing any previous one with the same type.
  ///
  /// A type re-registered under a different category is moved out of its old
  /// category. Returns the replaced definition.
  pub fn register_node(&mut self, definition: NodeDefinition) -> Option<Arc<NodeDefinition>> {
    let node_type = definition.node_type.clone();
    let category = definition.category.clone();

    let previous = self
      .definitions
      .insert(node_type.clone(), Arc::new(definition));

    if let Some(old) = &previous
      && old.category != category
    {
      self.remove_from_category(&old.category, &node_type);
    }

    self.categories.entry(category).or_default().insert(node_type);
    previous
  }

  pub fn get_node(&self, node_type: &str) -> Option<Arc<NodeDefinition>> {
    self.definitions.get(node_type).cloned()
  }

  pub fn has_node(&self, node_type: &str) -> bool {
    self.definitions.contains_key(node_type)
  }

  /// All registered node types, sorted.
  pub fn all_node_types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.definitions.keys().cloned().collect();
    types.sort();
    types
  }

  /// Node types registered under a category, sorted.
  pub fn nodes_by_category(&self, category: &str) -> Vec<String> {
    self
      .categories
      .get(category)
      .map(|types| types.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// All definitions, sorted by node type.
  pub fn all_definitions(&self) -> Vec<Arc<NodeDefinition>> {
    let mut definitions: Vec<Arc<NodeDefinition>> = self.definitions.values().cloned().collect();
    definitions.sort_by(|a, b| a.node_type.cmp(&b.node_type));
    definitions
  }

  pub fn categories(&self) -> Vec<String> {
    self.categories.keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.definitions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.definitions.is_empty()
  }

  pub fn clear(&mut self) {
    self.definitions.clear();
    self.categories.clear();
  }

  fn remove_from_category(&mut self, category: &str, node_type: &str) {
    if let Some(types) = self.categories.get_mut(category) {
      types.remove(node_type);
      if types.is_empty() {
        self.categories.remove(category);
      }
    }
  }
}
