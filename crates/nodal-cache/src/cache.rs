//! Bounded content-addressable store for evaluated node outputs.
//!
//! Entries are evicted strictly least recently used first, one at a time,
//! until a new entry fits the byte budget.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default cache budget in megabytes.
pub const DEFAULT_MAX_SIZE_MB: f64 = 100.0;

/// Size assumed for values that cannot be serialized.
pub const DEFAULT_ENTRY_SIZE: usize = 1024;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
  value: V,
  size: usize,
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
  pub entries: usize,
  pub size_bytes: usize,
  pub size_mb: f64,
  pub max_size_mb: f64,
  /// Fraction of the budget in use. May exceed 1.0 after an oversized insert.
  pub usage: f64,
}

/// Size-bounded LRU cache keyed by content hash.
///
/// The underlying [`LruCache`] is unbounded by entry count; the budget is in
/// bytes and enforced on insert.
#[derive(Debug)]
pub struct ComputeCache<V> {
  entries: LruCache<String, CacheEntry<V>>,
  current_size: usize,
  max_size: usize,
}

impl<V> ComputeCache<V> {
  /// Create a cache with the given budget in megabytes.
  pub fn new(max_size_mb: f64) -> Self {
    Self::with_max_bytes((max_size_mb.max(0.0) * BYTES_PER_MB) as usize)
  }

  /// Create a cache with the given budget in bytes.
  pub fn with_max_bytes(max_size: usize) -> Self {
    Self {
      entries: LruCache::unbounded(),
      current_size: 0,
      max_size,
    }
  }

  /// Get a value and mark it as most recently used.
  pub fn get(&mut self, key: &str) -> Option<&V> {
    self.entries.get(key).map(|entry| &entry.value)
  }

  /// Get a value without touching its recency.
  pub fn peek(&self, key: &str) -> Option<&V> {
    self.entries.peek(key).map(|entry| &entry.value)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains(key)
  }

  /// Insert a value with an explicit size estimate in bytes.
  ///
  /// Least recently used entries are evicted one at a time until the new
  /// entry fits. An entry larger than the whole budget is still stored once
  /// everything else has been evicted.
  pub fn set_with_size(&mut self, key: impl Into<String>, value: V, size: usize) {
    let key = key.into();

    // Replacing an entry releases its old size first
    self.delete(&key);

    while self.current_size.saturating_add(size) > self.max_size && !self.entries.is_empty() {
      self.evict_oldest();
    }

    self.entries.put(key, CacheEntry { value, size });
    self.current_size = self.current_size.saturating_add(size);
  }

  /// Remove an entry. Returns whether it was present.
  pub fn delete(&mut self, key: &str) -> bool {
    match self.entries.pop(key) {
      Some(entry) => {
        self.current_size -= entry.size;
        true
      }
      None => false,
    }
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.current_size = 0;
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Sum of the sizes of all held entries.
  pub fn size_bytes(&self) -> usize {
    self.current_size
  }

  pub fn max_size_bytes(&self) -> usize {
    self.max_size
  }

  pub fn stats(&self) -> CacheStats {
    let usage = if self.max_size == 0 {
      0.0
    } else {
      self.current_size as f64 / self.max_size as f64
    };

    CacheStats {
      entries: self.entries.len(),
      size_bytes: self.current_size,
      size_mb: self.current_size as f64 / BYTES_PER_MB,
      max_size_mb: self.max_size as f64 / BYTES_PER_MB,
      usage,
    }
  }

  fn evict_oldest(&mut self) {
    if let Some((key, entry)) = self.entries.pop_lru() {
      self.current_size -= entry.size;
      debug!(key = %key, size = entry.size, "cache entry evicted");
    }
  }
}

impl<V: Serialize> ComputeCache<V> {
  /// Insert a value, estimating its size from its serialized length.
  pub fn set(&mut self, key: impl Into<String>, value: V) {
    let size = estimate_size(&value);
    self.set_with_size(key, value, size);
  }
}

impl<V> Default for ComputeCache<V> {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_SIZE_MB)
  }
}

fn estimate_size<V: Serialize>(value: &V) -> usize {
  serde_json::to_vec(value)
    .map(|bytes| bytes.len())
    .unwrap_or(DEFAULT_ENTRY_SIZE)
}
