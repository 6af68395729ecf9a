use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use depgrid_core::{EvictionPolicy, NamespaceConfig};
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CacheError, Result};

/// Expiry requested for a single insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the namespace TTL.
    #[default]
    Default,
    /// Never expires; only eviction or invalidation removes the entry.
    Never,
    /// Expires this long after insertion. A zero duration means `Never`.
    After(Duration),
}

/// A computed value together with the keys it was derived from.
///
/// Registering the dependencies means invalidating any of them later also
/// removes the value.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheableResult<K, V> {
    pub value: V,
    pub dependencies: Vec<K>,
}

impl<K, V> CacheableResult<K, V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(value: V, dependencies: Vec<K>) -> Self {
        Self {
            value,
            dependencies,
        }
    }
}

/// Cache entry metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    pub value: V,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub expires_at: Option<Instant>,
    pub access_count: u64,
    pub dependencies: Vec<K>,
}

impl<K, V> CacheEntry<K, V> {
    fn new(value: V, expires_at: Option<Instant>, dependencies: Vec<K>) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_accessed: now,
            expires_at,
            access_count: 0,
            dependencies,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Time left before expiry; `None` for entries that never expire.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub entries: usize,
    pub max_size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }
}

struct CacheInner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<K, V>>,
    /// dependency key -> keys of entries that declared it
    dependents: HashMap<K, HashSet<K>>,
    config: NamespaceConfig,
    stats: CacheStats,
}

impl<K, V> CacheInner<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Drop an entry and its outgoing edges. Edges pointing at `key` stay so
    /// that invalidating it later still reaches its dependents.
    fn detach(&mut self, key: &K) -> Option<CacheEntry<K, V>> {
        let entry = self.entries.pop(key)?;
        for dep in &entry.dependencies {
            if let Some(set) = self.dependents.get_mut(dep) {
                set.remove(key);
                if set.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
        Some(entry)
    }

    fn evict_one(&mut self) -> Option<K> {
        let victim = match self.config.eviction {
            // FIFO reads never promote, so recency order is insertion order.
            EvictionPolicy::Lru | EvictionPolicy::Fifo => {
                self.entries.peek_lru().map(|(k, _)| k.clone())
            }
            EvictionPolicy::Lfu => self
                .entries
                .iter()
                .rev()
                .min_by_key(|(_, entry)| entry.access_count)
                .map(|(k, _)| k.clone()),
        }?;
        self.detach(&victim);
        self.stats.evictions += 1;
        Some(victim)
    }

    fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.detach(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    fn make_room(&mut self, incoming: usize) {
        let max = self.config.max_size.max(1);
        if self.entries.len() + incoming <= max {
            return;
        }
        self.purge_expired();
        while self.entries.len() + incoming > max {
            if self.evict_one().is_none() {
                break;
            }
        }
    }

    /// Remove `roots` and, breadth first, every entry that transitively
    /// depends on them. Returns the number of entries removed.
    fn cascade(&mut self, roots: Vec<K>) -> usize {
        let mut visited: HashSet<K> = HashSet::new();
        let mut queue: VecDeque<K> = roots.into();
        let mut removed = 0;
        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if self.detach(&key).is_some() {
                removed += 1;
            }
            if let Some(dependents) = self.dependents.remove(&key) {
                queue.extend(dependents.into_iter().filter(|k| !visited.contains(k)));
            }
        }
        self.stats.invalidations += removed as u64;
        removed
    }
}

fn key_str<K: AsRef<str>>(key: &K) -> &str {
    key.as_ref()
}

/// Thread-safe cache with TTL expiry, bounded size and dependency tracking.
///
/// All state sits behind one lock, so eviction bookkeeping and cascading
/// invalidation always observe a consistent view.
pub struct Cache<K: Hash + Eq, V> {
    name: String,
    inner: Mutex<CacheInner<K, V>>,
}

impl<K: Hash + Eq, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("name", &self.name).finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + AsRef<str>,
    V: Clone,
{
    pub fn new(name: impl Into<String>, config: NamespaceConfig) -> Self {
        let name = name.into();
        debug!(
            "Cache '{}' initialized: policy={:?}, max_size={}, ttl={:?}",
            name, config.eviction, config.max_size, config.ttl
        );
        Self {
            name,
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                dependents: HashMap::new(),
                config,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> NamespaceConfig {
        self.inner.lock().config
    }

    /// Look up `key`, counting a hit or a miss. An expired entry is removed
    /// and counts as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.entries.peek(key).map(|entry| entry.is_expired()) {
            None => {
                inner.stats.misses += 1;
                debug!("Cache '{}': miss for '{}'", self.name, key_str(key));
                return None;
            }
            Some(true) => {
                inner.detach(key);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                debug!("Cache '{}': miss (expired) for '{}'", self.name, key_str(key));
                return None;
            }
            Some(false) => {}
        }

        let promote = inner.config.eviction != EvictionPolicy::Fifo;
        let entry = if promote {
            inner.entries.get_mut(key)
        } else {
            inner.entries.peek_mut(key)
        };
        let value = entry.map(|entry| {
            entry.touch();
            entry.value.clone()
        });
        inner.stats.hits += 1;
        debug!("Cache '{}': hit for '{}'", self.name, key_str(key));
        value
    }

    /// True when a live entry exists; does not touch statistics or order.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner
            .lock()
            .entries
            .peek(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with(key, value, Vec::new(), Ttl::Default);
    }

    /// Store `value`, evicting first when the namespace is full, and record
    /// that it depends on `dependencies`.
    pub fn insert_with(&self, key: K, value: V, dependencies: Vec<K>, ttl: Ttl) {
        let mut inner = self.inner.lock();
        let replacing = inner.detach(&key).is_some();
        if !replacing {
            inner.make_room(1);
        }

        let lifetime = match ttl {
            Ttl::Default => inner.config.ttl,
            Ttl::Never => None,
            Ttl::After(d) if d.is_zero() => None,
            Ttl::After(d) => Some(d),
        };
        let expires_at = lifetime.and_then(|d| Instant::now().checked_add(d));

        let mut deps: Vec<K> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if dep != key && !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        for dep in &deps {
            inner
                .dependents
                .entry(dep.clone())
                .or_default()
                .insert(key.clone());
        }
        inner
            .entries
            .put(key, CacheEntry::new(value, expires_at, deps));
    }

    /// Remove every key matching `pattern` (a regex anchored at the start of
    /// the key) and cascade to their dependents. Keys that only appear as
    /// dependencies are matched too. Returns the number of entries removed.
    pub fn invalidate(&self, pattern: &str) -> Result<usize> {
        let re = Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
            CacheError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        let mut inner = self.inner.lock();
        let mut roots: Vec<K> = inner
            .entries
            .iter()
            .map(|(k, _)| k)
            .filter(|k| re.is_match(key_str(*k)))
            .cloned()
            .collect();
        roots.extend(
            inner
                .dependents
                .keys()
                .filter(|k| re.is_match(key_str(*k)))
                .cloned(),
        );
        let removed = inner.cascade(roots);
        if removed > 0 {
            debug!(
                "Cache '{}': invalidated {} entries matching pattern '{}'",
                self.name, removed, pattern
            );
        }
        Ok(removed)
    }

    /// Invalidate exactly `key` and everything depending on it.
    pub fn invalidate_key(&self, key: &K) -> usize {
        let removed = self.inner.lock().cascade(vec![key.clone()]);
        if removed > 0 {
            debug!(
                "Cache '{}': invalidated {} entries from '{}'",
                self.name,
                removed,
                key_str(key)
            );
        }
        removed
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let removed = self.inner.lock().purge_expired();
        if removed > 0 {
            debug!("Cache '{}': cleaned up {} expired entries", self.name, removed);
        }
        removed
    }

    /// Apply new limits. Shrinking evicts immediately; TTLs of entries already
    /// stored are left alone.
    pub fn reconfigure(&self, config: NamespaceConfig) {
        let mut inner = self.inner.lock();
        inner.config = config;
        inner.make_room(0);
        debug!(
            "Cache '{}' reconfigured: policy={:?}, max_size={}, ttl={:?}",
            self.name, config.eviction, config.max_size, config.ttl
        );
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            max_size: inner.config.max_size,
            ..inner.stats.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries and dependency edges. Statistics are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.dependents.clear();
    }

    pub fn reset_stats(&self) {
        self.inner.lock().stats = CacheStats::default();
    }

    /// Return the cached value or compute and store it.
    ///
    /// The lock is released while `compute` runs, so it may use this cache.
    /// Errors are returned unchanged and nothing is stored for them.
    pub fn get_or_compute<E>(
        &self,
        key: K,
        compute: impl FnOnce() -> std::result::Result<V, E>,
    ) -> std::result::Result<V, E> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = compute()?;
        self.insert_with(key, value.clone(), Vec::new(), Ttl::Default);
        Ok(value)
    }

    /// Like [`Cache::get_or_compute`], registering the dependencies the
    /// computation reports.
    pub fn get_or_compute_with_deps<E>(
        &self,
        key: K,
        ttl: Ttl,
        compute: impl FnOnce() -> std::result::Result<CacheableResult<K, V>, E>,
    ) -> std::result::Result<V, E> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let CacheableResult {
            value,
            dependencies,
        } = compute()?;
        self.insert_with(key, value.clone(), dependencies, ttl);
        Ok(value)
    }

    /// Live entries with their remaining TTL and dependencies, least recently
    /// used first.
    pub fn snapshot(&self) -> Vec<(K, V, Option<Duration>, Vec<K>)> {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner
            .entries
            .iter()
            .rev()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(k, entry)| {
                (
                    k.clone(),
                    entry.value.clone(),
                    entry.remaining_ttl(),
                    entry.dependencies.clone(),
                )
            })
            .collect()
    }

    /// Keys whose entries declared a dependency on `key`.
    pub fn dependents_of(&self, key: &K) -> Vec<K> {
        self.inner
            .lock()
            .dependents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
