//! End-to-end evaluation of a graph loaded from JSON.

use nodal_graph::{GraphInstance, Outputs};
use nodal_runtime::{ErrorCode, NodeDefinition, NodeRegistry, Scheduler, SchedulerConfig};
use serde_json::{Value, json};

fn math_registry() -> NodeRegistry {
  let mut registry = NodeRegistry::new();
  registry.register_node(
    NodeDefinition::from_fn("Math::Constant", "Math", |_, params| {
      let value = params.get("value").cloned().unwrap_or(Value::Null);
      Ok(Outputs::from([("value".to_string(), value)]))
    })
    .with_outputs(["value"]),
  );
  registry.register_node(
    NodeDefinition::from_fn("Math::Multiply", "Math", |inputs, _| {
      let a = inputs["a"].as_f64().ok_or("input 'a' is not a number")?;
      let b = inputs["b"].as_f64().ok_or("input 'b' is not a number")?;
      Ok(Outputs::from([("value".to_string(), json!(a * b))]))
    })
    .with_inputs(["a", "b"])
    .with_outputs(["value"]),
  );
  registry
}

fn load(graph: Value) -> GraphInstance {
  serde_json::from_value(graph).unwrap()
}

#[tokio::test]
async fn test_evaluate_graph_from_json() {
  let mut graph = load(json!({
    "nodes": [
      { "id": "width", "type": "Math::Constant", "params": { "value": 4.0 }, "dirty": true },
      { "id": "height", "type": "Math::Constant", "params": { "value": 2.5 }, "dirty": true },
      {
        "id": "area",
        "type": "Math::Multiply",
        "inputs": {
          "a": { "node_id": "width", "socket_id": "value" },
          "b": { "node_id": "height", "socket_id": "value" }
        }
      }
    ],
    "edges": [
      { "id": "e1", "source": "width", "source_socket": "value", "target": "area", "target_socket": "a" },
      { "id": "e2", "source": "height", "source_socket": "value", "target": "area", "target_socket": "b" }
    ],
    "settings": { "units": "mm", "tolerance": 0.001 }
  }));

  let mut scheduler = Scheduler::new(math_registry(), SchedulerConfig::default());
  let summary = scheduler
    .evaluate(&mut graph, ["width", "height"])
    .await
    .unwrap();

  assert_eq!(summary.success_count, 3);
  assert_eq!(graph.node("area").unwrap().outputs["value"], json!(10.0));
  assert!(summary.category_breakdown.contains_key("Math"));

  let saved = serde_json::to_value(&graph).unwrap();
  assert_eq!(saved["nodes"][2]["type"], json!("Math::Multiply"));
  assert_eq!(saved["nodes"][2]["dirty"], json!(false));
}

#[tokio::test]
async fn test_failure_surfaces_in_node_state() {
  let mut graph = load(json!({
    "nodes": [
      { "id": "label", "type": "Math::Constant", "params": { "value": "wide" }, "dirty": true },
      {
        "id": "area",
        "type": "Math::Multiply",
        "inputs": {
          "a": { "node_id": "label", "socket_id": "value" },
          "b": { "node_id": "label", "socket_id": "value" }
        }
      }
    ],
    "edges": [
      { "id": "e1", "source": "label", "source_socket": "value", "target": "area", "target_socket": "a" }
    ]
  }));

  let mut scheduler = Scheduler::new(math_registry(), SchedulerConfig::default());
  scheduler.evaluate(&mut graph, ["label"]).await.unwrap();

  let area = graph.node("area").unwrap();
  assert_eq!(area.state.error.as_deref(), Some("input 'a' is not a number"));
  let failure = area.state.last_error.as_ref().unwrap();
  assert_eq!(failure.code, ErrorCode::EvaluationFailed.as_str());
  assert_eq!(failure.inputs, vec!["a", "b"]);
}
