//! Deterministic content digests for cache keys.

use nodal_graph::{InputValues, NodeInstance};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a digest of a string as 8 lowercase hex chars.
///
/// Not cryptographic; only used to key the compute cache.
pub fn hash(s: &str) -> String {
  let digest = s.bytes().fold(FNV_OFFSET_BASIS, |acc, byte| {
    (acc ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
  });
  format!("{digest:08x}")
}

/// Canonical form of a value for hashing.
///
/// Object keys are sorted, array order is kept, and any object carrying both
/// an `id` and a `type` field is a shape handle reduced to exactly
/// `{id, type}` so incidental metadata never changes the digest.
pub fn normalize(value: &Value) -> Value {
  match value {
    Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
    Value::Object(object) => {
      if let (Some(id), Some(kind)) = (object.get("id"), object.get("type")) {
        return json!({ "id": normalize(id), "type": normalize(kind) });
      }

      let mut keys: Vec<&String> = object.keys().collect();
      keys.sort();

      let mut sorted = Map::with_capacity(object.len());
      for key in keys {
        sorted.insert(key.clone(), normalize(&object[key.as_str()]));
      }
      Value::Object(sorted)
    }
    other => other.clone(),
  }
}

/// Cache key of a node evaluated against the given resolved inputs.
///
/// Depends only on the node's type, its params as given and its normalized
/// inputs. Params are never normalized: a param object carrying `id` and
/// `type` is not a shape handle and every field of it counts.
pub fn hash_node(node: &NodeInstance, inputs: &InputValues) -> String {
  let params: Map<String, Value> = node
    .params
    .iter()
    .map(|(name, value)| (name.clone(), value.clone()))
    .collect();
  let inputs: Map<String, Value> = inputs
    .iter()
    .map(|(name, value)| (name.clone(), value.clone()))
    .collect();

  let payload = json!({
    "type": node.node_type,
    "params": Value::Object(params),
    "inputs": normalize(&Value::Object(inputs)),
  });

  hash(&payload.to_string())
}

/// SHA-256 digest of raw geometry bytes as 64 lowercase hex chars.
pub fn hash_geometry(bytes: &[u8]) -> String {
  format!("{:x}", Sha256::digest(bytes))
}
