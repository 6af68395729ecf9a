//! Namespaced in-memory caches for DepGrid.
//!
//! Every namespace is a [`Cache`] with its own size bound, TTL and eviction
//! policy. Entries can declare the keys they were derived from; invalidating
//! any of those keys removes the dependents transitively.

pub mod cache;
pub mod error;
pub mod memo;
pub mod persistence;
pub mod registry;

pub use cache::*;
pub use error::*;
pub use memo::{file_dependency_key, file_fingerprint, Memoizer};
pub use persistence::{PersistedEntry, PersistedNamespace};
pub use registry::{
    path_segment_pattern, tracker_cache_key, CacheRegistry, CacheValue, NamespaceCache,
};
