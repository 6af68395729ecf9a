use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use depgrid_core::keys::path::normalize_fs_path;

use crate::{Cache, CacheableResult, Ttl};

/// Wraps a computation over `A` with a namespace cache.
///
/// The cache key comes from the injected key function; folding a source
/// fingerprint (see [`file_fingerprint`]) into it makes edits self-invalidate.
pub struct Memoizer<A: ?Sized, V> {
    cache: Arc<Cache<String, V>>,
    key_fn: Box<dyn Fn(&A) -> String + Send + Sync>,
    ttl: Ttl,
}

impl<A: ?Sized, V: Clone> Memoizer<A, V> {
    pub fn new(
        cache: Arc<Cache<String, V>>,
        key_fn: impl Fn(&A) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            cache,
            key_fn: Box::new(key_fn),
            ttl: Ttl::Default,
        }
    }

    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn cache(&self) -> &Arc<Cache<String, V>> {
        &self.cache
    }

    pub fn key_for(&self, arg: &A) -> String {
        (self.key_fn)(arg)
    }

    /// Return the memoized value for `arg`, running `compute` on a miss.
    pub fn call<E>(
        &self,
        arg: &A,
        compute: impl FnOnce(&A) -> Result<V, E>,
    ) -> Result<V, E> {
        let key = self.key_for(arg);
        let ttl = self.ttl;
        self.cache.get_or_compute_with_deps(key, ttl, || {
            compute(arg).map(CacheableResult::new)
        })
    }

    /// Like [`Memoizer::call`] for computations that report the keys their
    /// result was derived from.
    pub fn call_with_deps<E>(
        &self,
        arg: &A,
        compute: impl FnOnce(&A) -> Result<CacheableResult<String, V>, E>,
    ) -> Result<V, E> {
        let key = self.key_for(arg);
        self.cache
            .get_or_compute_with_deps(key, self.ttl, || compute(arg))
    }
}

/// `normalized_path@mtime_nanos`, or `normalized_path@missing` when the file
/// cannot be stat'ed.
pub fn file_fingerprint(path: &Path) -> String {
    let norm = normalize_fs_path(path);
    let mtime = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok());
    match mtime {
        Some(since) => format!("{}@{}", norm, since.as_nanos()),
        None => format!("{}@missing", norm),
    }
}

/// Dependency key used for values derived from a file's contents.
pub fn file_dependency_key(norm_path: &str) -> String {
    format!("file:{}", norm_path)
}
