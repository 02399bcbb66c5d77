//! Nodal Cache
//!
//! Content hashing and memoization for node evaluation.
//!
//! A node's cache key is a digest of its type, parameters and resolved
//! inputs (see [`hash_node`]). Evaluated outputs are stored under that key in
//! a [`ComputeCache`], a size-bounded store evicting the least recently used
//! entries first. Because the key never includes the node's `dirty` flag, a
//! node forced dirty with unchanged inputs still hits the cache.

mod cache;
mod hasher;

pub use cache::{CacheStats, ComputeCache, DEFAULT_ENTRY_SIZE, DEFAULT_MAX_SIZE_MB};
pub use hasher::{hash, hash_geometry, hash_node, normalize};
