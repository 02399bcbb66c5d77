//! Cancelling in-flight node evaluations.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nodal_graph::{GraphInstance, InputValues, NodeInstance, Outputs, Params};
use nodal_runtime::{
  BoxError, CancelHandle, EvaluationContext, NodeDefinition, NodeEvaluator, NodeRegistry,
  Scheduler, SchedulerConfig,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Blocks until cancelled, then fails.
struct WaitForCancel;

#[async_trait]
impl NodeEvaluator for WaitForCancel {
  async fn evaluate(
    &self,
    ctx: &EvaluationContext<'_>,
    _inputs: &InputValues,
    _params: &Params,
  ) -> Result<Outputs, BoxError> {
    tokio::select! {
      _ = ctx.cancellation().cancelled() => Err("aborted by caller".into()),
      _ = tokio::time::sleep(Duration::from_secs(30)) => {
        Ok(Outputs::from([("value".to_string(), json!("finished"))]))
      }
    }
  }
}

/// Waits for cancellation but still reports a result.
struct IgnoresCancel;

#[async_trait]
impl NodeEvaluator for IgnoresCancel {
  async fn evaluate(
    &self,
    ctx: &EvaluationContext<'_>,
    _inputs: &InputValues,
    _params: &Params,
  ) -> Result<Outputs, BoxError> {
    ctx.cancellation().cancelled().await;
    Ok(Outputs::from([("value".to_string(), json!("partial"))]))
  }
}

/// Keeps a clone of the token it was handed.
struct KeepToken {
  token: Arc<Mutex<Option<CancellationToken>>>,
}

#[async_trait]
impl NodeEvaluator for KeepToken {
  async fn evaluate(
    &self,
    ctx: &EvaluationContext<'_>,
    _inputs: &InputValues,
    _params: &Params,
  ) -> Result<Outputs, BoxError> {
    *self.token.lock().unwrap() = Some(ctx.cancellation().clone());
    Ok(Outputs::from([("value".to_string(), json!(ctx.is_cancelled()))]))
  }
}

fn scheduler(token: Arc<Mutex<Option<CancellationToken>>>) -> Scheduler {
  let mut registry = NodeRegistry::new();
  registry.register_node(NodeDefinition::new("Test::Wait", "Test", WaitForCancel));
  registry.register_node(NodeDefinition::new("Test::Ignore", "Test", IgnoresCancel));
  registry.register_node(NodeDefinition::new("Test::Keep", "Test", KeepToken { token }));
  registry.register_node(NodeDefinition::from_fn("Test::Quick", "Test", |_, _| {
    Ok(Outputs::from([("value".to_string(), json!(7))]))
  }));
  Scheduler::new(registry, SchedulerConfig::default())
}

/// Cancel `node_id` from another task as soon as it starts evaluating.
fn cancel_when_active(handle: CancelHandle, node_id: &'static str) -> tokio::task::JoinHandle<bool> {
  tokio::spawn(async move {
    loop {
      if handle.active().iter().any(|id| id == node_id) {
        return handle.cancel_node(node_id);
      }
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
  })
}

fn code_of(graph: &GraphInstance, node_id: &str) -> String {
  graph
    .node(node_id)
    .unwrap()
    .state
    .last_error
    .as_ref()
    .map(|failure| failure.code.clone())
    .unwrap_or_default()
}

#[tokio::test]
async fn test_cancel_node_aborts_evaluation() {
  let mut scheduler = scheduler(Arc::default());
  let mut graph = GraphInstance::new(
    vec![
      NodeInstance::new("slow", "Test::Wait"),
      NodeInstance::new("quick", "Test::Quick"),
    ],
    vec![],
  );

  let canceller = cancel_when_active(scheduler.cancel_handle(), "slow");
  let summary = scheduler
    .evaluate(&mut graph, ["slow", "quick"])
    .await
    .unwrap();

  assert!(canceller.await.unwrap());

  let slow = graph.node("slow").unwrap();
  assert!(slow.dirty);
  assert!(slow.outputs.is_empty());
  assert!(slow.state.error.as_deref().unwrap().contains("cancelled"));
  assert_eq!(code_of(&graph, "slow"), "CANCELLED");

  let quick = graph.node("quick").unwrap();
  assert!(!quick.dirty);
  assert_eq!(quick.outputs["value"], json!(7));

  assert_eq!(summary.failure_count, 1);
  assert_eq!(summary.success_count, 1);
  assert!(scheduler.cancel_handle().active().is_empty());
}

#[tokio::test]
async fn test_cancel_all_aborts_evaluation() {
  let mut scheduler = scheduler(Arc::default());
  let mut graph = GraphInstance::new(vec![NodeInstance::new("slow", "Test::Wait")], vec![]);

  let handle = scheduler.cancel_handle();
  let canceller = tokio::spawn(async move {
    loop {
      let cancelled = handle.cancel_all();
      if cancelled > 0 {
        return cancelled;
      }
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
  });

  scheduler.evaluate(&mut graph, ["slow"]).await.unwrap();

  assert_eq!(canceller.await.unwrap(), 1);
  assert_eq!(code_of(&graph, "slow"), "CANCELLED");
}

#[tokio::test]
async fn test_result_after_cancel_is_discarded() {
  let mut scheduler = scheduler(Arc::default());
  let mut graph = GraphInstance::new(vec![NodeInstance::new("stubborn", "Test::Ignore")], vec![]);

  let canceller = cancel_when_active(scheduler.cancel_handle(), "stubborn");
  scheduler.evaluate(&mut graph, ["stubborn"]).await.unwrap();
  assert!(canceller.await.unwrap());

  let node = graph.node("stubborn").unwrap();
  assert!(node.outputs.is_empty());
  assert!(node.dirty);
  assert_eq!(code_of(&graph, "stubborn"), "CANCELLED");
  assert!(scheduler.cache().is_empty());
}

#[tokio::test]
async fn test_token_is_released_after_evaluation() {
  let token = Arc::new(Mutex::new(None));
  let mut scheduler = scheduler(token.clone());
  let mut graph = GraphInstance::new(vec![NodeInstance::new("keep", "Test::Keep")], vec![]);

  scheduler.evaluate(&mut graph, ["keep"]).await.unwrap();

  assert_eq!(graph.node("keep").unwrap().outputs["value"], json!(false));
  let token = token.lock().unwrap().clone().unwrap();
  assert!(token.is_cancelled());
  assert!(scheduler.cancel_handle().active().is_empty());
  assert!(!scheduler.cancel_node("keep"));
}

#[tokio::test]
async fn test_cancel_without_running_node_is_noop() {
  let scheduler = scheduler(Arc::default());
  assert!(!scheduler.cancel_node("nothing"));
  assert_eq!(scheduler.cancel_all(), 0);
}
