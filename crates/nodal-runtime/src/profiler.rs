//! Per-node evaluation timing.
//!
//! The profiler keeps the most recent samples in a bounded ring buffer and
//! derives aggregate statistics from them on demand.

use std::collections::{BTreeMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Category used for node types without a `Category::` prefix.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// One timed evaluation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSample {
  pub node_id: String,
  pub node_type: String,
  pub duration_ms: f64,
  pub success: bool,
  pub error_code: Option<String>,
  pub error_message: Option<String>,
  pub operation: String,
  pub cache_hit: bool,
  /// Milliseconds since the Unix epoch.
  pub timestamp: u64,
}

impl EvaluationSample {
  pub fn success(
    node_id: impl Into<String>,
    node_type: impl Into<String>,
    duration_ms: f64,
    operation: impl Into<String>,
    cache_hit: bool,
  ) -> Self {
    Self {
      node_id: node_id.into(),
      node_type: node_type.into(),
      duration_ms,
      success: true,
      error_code: None,
      error_message: None,
      operation: operation.into(),
      cache_hit,
      timestamp: now_ms(),
    }
  }

  pub fn failure(
    node_id: impl Into<String>,
    node_type: impl Into<String>,
    duration_ms: f64,
    operation: impl Into<String>,
    error_code: impl Into<String>,
    error_message: impl Into<String>,
  ) -> Self {
    Self {
      node_id: node_id.into(),
      node_type: node_type.into(),
      duration_ms,
      success: false,
      error_code: Some(error_code.into()),
      error_message: Some(error_message.into()),
      operation: operation.into(),
      cache_hit: false,
      timestamp: now_ms(),
    }
  }

  /// Prefix of the node type before its first `::`.
  pub fn category(&self) -> &str {
    match self.node_type.split_once("::") {
      Some((category, _)) if !category.is_empty() => category,
      _ => UNKNOWN_CATEGORY,
    }
  }
}

/// Aggregate statistics over the samples of a run.
///
/// Averages and percentiles only consider successful samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
  pub total_count: usize,
  pub success_count: usize,
  pub failure_count: usize,
  pub cache_hit_count: usize,
  pub average_ms: f64,
  pub p50_ms: f64,
  pub p95_ms: f64,
  pub max_ms: f64,
  /// Slowest successful samples at or above the slow threshold, slowest first.
  pub slow_nodes: Vec<EvaluationSample>,
  /// Average successful duration per node category.
  pub category_breakdown: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilerConfig {
  /// Maximum number of samples kept; the oldest are dropped first.
  pub capacity: usize,
  pub slow_threshold_ms: f64,
  /// Maximum number of entries in [`EvaluationSummary::slow_nodes`].
  pub slow_node_limit: usize,
}

impl Default for ProfilerConfig {
  fn default() -> Self {
    Self {
      capacity: 512,
      slow_threshold_ms: 1500.0,
      slow_node_limit: 5,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationProfiler {
  config: ProfilerConfig,
  samples: VecDeque<EvaluationSample>,
}

impl EvaluationProfiler {
  pub fn new(config: ProfilerConfig) -> Self {
    Self {
      config,
      samples: VecDeque::with_capacity(config.capacity),
    }
  }

  pub fn config(&self) -> &ProfilerConfig {
    &self.config
  }

  pub fn record(&mut self, sample: EvaluationSample) {
    if self.config.capacity == 0 {
      return;
    }
    while self.samples.len() >= self.config.capacity {
      self.samples.pop_front();
    }
    self.samples.push_back(sample);
  }

  pub fn reset(&mut self) {
    self.samples.clear();
  }

  /// Held samples, oldest first.
  pub fn samples(&self) -> impl Iterator<Item = &EvaluationSample> {
    self.samples.iter()
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn summary(&self) -> EvaluationSummary {
    let successes: Vec<&EvaluationSample> = self.samples.iter().filter(|s| s.success).collect();

    let mut durations: Vec<f64> = successes.iter().map(|s| s.duration_ms).collect();
    durations.sort_by(f64::total_cmp);

    let average_ms = if durations.is_empty() {
      0.0
    } else {
      durations.iter().sum::<f64>() / durations.len() as f64
    };

    let mut slow_nodes: Vec<EvaluationSample> = successes
      .iter()
      .filter(|s| s.duration_ms >= self.config.slow_threshold_ms)
      .map(|s| (*s).clone())
      .collect();
    slow_nodes.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
    slow_nodes.truncate(self.config.slow_node_limit);

    let mut totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for sample in &successes {
      let entry = totals.entry(sample.category().to_string()).or_default();
      entry.0 += sample.duration_ms;
      entry.1 += 1;
    }
    let category_breakdown = totals
      .into_iter()
      .map(|(category, (sum, count))| (category, sum / count as f64))
      .collect();

    EvaluationSummary {
      total_count: self.samples.len(),
      success_count: successes.len(),
      failure_count: self.samples.len() - successes.len(),
      cache_hit_count: self.samples.iter().filter(|s| s.cache_hit).count(),
      average_ms,
      p50_ms: percentile(&durations, 0.50),
      p95_ms: percentile(&durations, 0.95),
      max_ms: durations.last().copied().unwrap_or(0.0),
      slow_nodes,
      category_breakdown,
    }
  }

  /// The most recent `limit` failed samples, oldest first.
  pub fn recent_failures(&self, limit: usize) -> Vec<EvaluationSample> {
    let mut failures: Vec<EvaluationSample> = self
      .samples
      .iter()
      .rev()
      .filter(|s| !s.success)
      .take(limit)
      .cloned()
      .collect();
    failures.reverse();
    failures
  }
}

/// Linearly interpolated percentile of ascending values; `p` is in `[0, 1]`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
  match sorted.len() {
    0 => 0.0,
    1 => sorted[0],
    len => {
      let rank = p.clamp(0.0, 1.0) * (len - 1) as f64;
      let lower = rank.floor() as usize;
      let upper = rank.ceil() as usize;
      let weight = rank - lower as f64;
      sorted[lower] + (sorted[upper] - sorted[lower]) * weight
    }
  }
}

fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_millis() as u64)
    .unwrap_or(0)
}
