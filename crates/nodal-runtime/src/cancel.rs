//! Per-node abort controllers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation tokens of the nodes currently being evaluated.
///
/// Cloning yields another handle to the same set, so a caller can keep one
/// and cancel nodes while the scheduler is suspended inside an evaluator.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
  controllers: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl CancelHandle {
  /// Abort a node's in-flight evaluation. Returns false if it had none.
  pub fn cancel_node(&self, node_id: &str) -> bool {
    match self.lock().remove(node_id) {
      Some(token) => {
        debug!(node_id = %node_id, "node evaluation cancelled");
        token.cancel();
        true
      }
      None => false,
    }
  }

  /// Abort every in-flight evaluation. Returns how many were aborted.
  pub fn cancel_all(&self) -> usize {
    let tokens: Vec<CancellationToken> = self.lock().drain().map(|(_, token)| token).collect();
    for token in &tokens {
      token.cancel();
    }
    tokens.len()
  }

  /// IDs of nodes with a registered controller, sorted.
  pub fn active(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.lock().keys().cloned().collect();
    ids.sort();
    ids
  }

  /// Register a fresh token for a node about to run its evaluator.
  pub(crate) fn register(&self, node_id: &str) -> CancellationToken {
    let token = CancellationToken::new();
    if let Some(stale) = self.lock().insert(node_id.to_string(), token.clone()) {
      stale.cancel();
    }
    token
  }

  /// Abort and drop a node's token if it is still registered.
  pub(crate) fn release(&self, node_id: &str) {
    if let Some(token) = self.lock().remove(node_id) {
      token.cancel();
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    self.controllers.lock().unwrap_or_else(|e| e.into_inner())
  }
}
