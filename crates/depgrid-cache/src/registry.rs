use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use dashmap::DashMap;
use depgrid_core::keys::path::normalize_fs_path;
use depgrid_core::{normalize_path, CacheSettings, NamespaceConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::persistence::{self, PersistedEntry, PersistedNamespace};
use crate::{Cache, CacheError, CacheStats, Result, Ttl};

/// Values that can live in a registry namespace.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Type-erased view of a namespace, for registry-wide operations.
pub trait NamespaceCache: Send + Sync {
    fn name(&self) -> &str;
    fn stats(&self) -> CacheStats;
    fn clear(&self);
    fn invalidate(&self, pattern: &str) -> Result<usize>;
    fn cleanup_expired(&self) -> usize;
    fn reconfigure(&self, config: NamespaceConfig);
    fn persist(&self) -> Result<PersistedNamespace>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<V: CacheValue> NamespaceCache for Cache<String, V> {
    fn name(&self) -> &str {
        Cache::name(self)
    }

    fn stats(&self) -> CacheStats {
        Cache::stats(self)
    }

    fn clear(&self) {
        Cache::clear(self)
    }

    fn invalidate(&self, pattern: &str) -> Result<usize> {
        Cache::invalidate(self, pattern)
    }

    fn cleanup_expired(&self) -> usize {
        Cache::cleanup_expired(self)
    }

    fn reconfigure(&self, config: NamespaceConfig) {
        Cache::reconfigure(self, config)
    }

    fn persist(&self) -> Result<PersistedNamespace> {
        let mut out = PersistedNamespace::default();
        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value, remaining, deps) in self.snapshot() {
            for dep in &deps {
                edges.entry(dep.clone()).or_default().push(key.clone());
            }
            out.entries.push((
                key,
                PersistedEntry {
                    value: serde_json::to_value(value)?,
                    ttl_remaining_ms: remaining.map(remaining_ms),
                    dependencies: deps,
                },
            ));
        }
        out.dependencies = edges;
        Ok(out)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// `tracker:<normalized path>:<kind>`
pub fn tracker_cache_key(tracker_path: &str, kind: &str) -> String {
    format!("tracker:{}:{}", normalize_path(tracker_path), kind)
}

/// Pattern matching keys that contain `norm_path` as a `:` or `|` delimited
/// segment.
pub fn path_segment_pattern(norm_path: &str) -> String {
    format!(r".*(?::|\||^){}(?::|\||$)", regex::escape(norm_path))
}

/// Named cache namespaces, created on demand.
///
/// One registry is built at startup and handed to every component that
/// caches; there is no process-wide instance.
pub struct CacheRegistry {
    settings: CacheSettings,
    namespaces: DashMap<String, Arc<dyn NamespaceCache>>,
    overrides: DashMap<String, NamespaceConfig>,
    persist_dir: Option<PathBuf>,
    pending: DashMap<String, PersistedNamespace>,
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("namespaces", &self.names())
            .field("persist_dir", &self.persist_dir)
            .finish()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

impl CacheRegistry {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            namespaces: DashMap::new(),
            overrides: DashMap::new(),
            persist_dir: None,
            pending: DashMap::new(),
        }
    }

    /// Registry backed by `dir`: previously flushed namespaces are loaded and
    /// revived as soon as each is opened with a value type.
    pub fn with_persistence(settings: CacheSettings, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut registry = Self::new(settings);
        for (name, ns) in persistence::load_dir(&dir)? {
            registry.pending.insert(name, ns);
        }
        info!(
            "Cache persistence enabled at {:?} ({} namespace file(s))",
            dir,
            registry.pending.len()
        );
        registry.persist_dir = Some(dir);
        Ok(registry)
    }

    /// Build from settings, enabling persistence when configured.
    pub fn from_settings(settings: CacheSettings) -> Result<Self> {
        match (settings.persist, settings.persist_dir.clone()) {
            (true, Some(dir)) => Self::with_persistence(settings, dir),
            _ => Ok(Self::new(settings)),
        }
    }

    pub fn persist_dir(&self) -> Option<&Path> {
        self.persist_dir.as_deref()
    }

    /// Effective parameters for `name`: runtime override, else settings.
    pub fn namespace_config(&self, name: &str) -> NamespaceConfig {
        self.overrides
            .get(name)
            .map(|o| *o)
            .unwrap_or_else(|| self.settings.namespace(name))
    }

    /// Open `name`, creating it on first use.
    ///
    /// A namespace holds one value type for its whole life; asking for another
    /// type is a [`CacheError::TypeMismatch`].
    pub fn get_or_create<V: CacheValue>(&self, name: &str) -> Result<Arc<Cache<String, V>>> {
        let erased = self
            .namespaces
            .entry(name.to_string())
            .or_insert_with(|| {
                let cache = Cache::<String, V>::new(name, self.namespace_config(name));
                if let Some((_, stored)) = self.pending.remove(name) {
                    revive(&cache, stored);
                }
                debug!("Spun up new cache: {}", name);
                Arc::new(cache) as Arc<dyn NamespaceCache>
            })
            .value()
            .clone();

        erased
            .into_any()
            .downcast::<Cache<String, V>>()
            .map_err(|_| CacheError::TypeMismatch {
                namespace: name.to_string(),
                requested: type_name::<V>(),
            })
    }

    /// Override size, TTL or eviction for one namespace at runtime.
    pub fn configure(&self, name: &str, config: NamespaceConfig) {
        self.overrides.insert(name.to_string(), config);
        if let Some(ns) = self.namespaces.get(name) {
            ns.reconfigure(config);
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stats(&self, name: &str) -> Option<CacheStats> {
        self.namespaces.get(name).map(|ns| ns.stats())
    }

    pub fn all_stats(&self) -> BTreeMap<String, CacheStats> {
        self.namespaces
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect()
    }

    /// Invalidate `pattern` in one namespace; unknown namespaces are a no-op.
    pub fn invalidate(&self, name: &str, pattern: &str) -> Result<usize> {
        match self.erased(name) {
            Some(ns) => ns.invalidate(pattern),
            None => Ok(0),
        }
    }

    /// Invalidate `pattern` in every namespace.
    pub fn invalidate_all(&self, pattern: &str) -> Result<usize> {
        let mut total = 0;
        for ns in self.all_erased() {
            total += ns.invalidate(pattern)?;
        }
        Ok(total)
    }

    /// Drop every entry that mentions `path` as a key segment, in every
    /// namespace.
    pub fn file_modified(&self, path: &str) -> Result<usize> {
        let norm = normalize_path(path);
        let removed = self.invalidate_all(&path_segment_pattern(&norm))?;
        debug!("Invalidated {} entries for modified file '{}'", removed, norm);
        Ok(removed)
    }

    /// Drop every entry derived from the tracker at `path`.
    pub fn tracker_modified(&self, path: &str) -> Result<usize> {
        let norm = normalize_path(path);
        let removed = self.invalidate_all(&path_segment_pattern(&norm))?;
        debug!("Invalidated {} entries for modified tracker '{}'", removed, norm);
        Ok(removed)
    }

    /// Compare the file's mtime with the one last recorded in the `metadata`
    /// namespace; on a change (or deletion) every entry mentioning the file is
    /// invalidated. Returns whether the file changed.
    pub fn check_file_modified(&self, path: &Path) -> Result<bool> {
        let norm = normalize_fs_path(path);
        let key = format!("timestamp:{}", norm);
        let metadata = self.get_or_create::<u128>("metadata")?;
        let recorded = metadata.get(&key);

        let current = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(|t| t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_nanos());

        match (current, recorded) {
            (None, None) => Ok(false),
            (None, Some(_)) => {
                self.file_modified(&norm)?;
                Ok(true)
            }
            (Some(now), Some(before)) if now <= before => Ok(false),
            (Some(now), _) => {
                self.file_modified(&norm)?;
                metadata.insert_with(key, now, Vec::new(), Ttl::Never);
                Ok(true)
            }
        }
    }

    /// Sweep expired entries everywhere.
    pub fn cleanup(&self) -> usize {
        self.all_erased().iter().map(|ns| ns.cleanup_expired()).sum()
    }

    /// Empty every namespace, flushing first when persistence is enabled.
    pub fn clear_all(&self) -> Result<()> {
        if self.persist_dir.is_some() {
            self.flush()?;
        }
        for ns in self.all_erased() {
            ns.clear();
        }
        info!("All caches cleared.");
        Ok(())
    }

    /// Write every open namespace to the persistence directory.
    ///
    /// A no-op without persistence. Namespaces loaded from disk but never
    /// opened keep their files untouched.
    pub fn flush(&self) -> Result<()> {
        let Some(dir) = &self.persist_dir else {
            return Ok(());
        };
        for ns in self.all_erased() {
            let stored = ns.persist()?;
            persistence::write_namespace(dir, ns.name(), &stored)?;
            debug!("Saved cache {} ({} entries)", ns.name(), stored.entries.len());
        }
        Ok(())
    }

    fn erased(&self, name: &str) -> Option<Arc<dyn NamespaceCache>> {
        self.namespaces.get(name).map(|e| e.value().clone())
    }

    // Cloned out so no shard lock is held while a namespace works.
    fn all_erased(&self) -> Vec<Arc<dyn NamespaceCache>> {
        self.namespaces.iter().map(|e| e.value().clone()).collect()
    }
}

/// Remaining lifetime in whole milliseconds, saturating at `u64::MAX`.
fn remaining_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn revive<V: CacheValue>(cache: &Cache<String, V>, stored: PersistedNamespace) {
    let total = stored.entries.len();
    let mut revived = 0;
    for (key, entry) in stored.entries {
        let value = match serde_json::from_value::<V>(entry.value) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Cache '{}': dropping stored entry '{}' ({})",
                    cache.name(),
                    key,
                    e
                );
                continue;
            }
        };
        let ttl = match entry.ttl_remaining_ms {
            Some(0) => continue,
            Some(ms) => Ttl::After(Duration::from_millis(ms)),
            None => Ttl::Never,
        };
        cache.insert_with(key, value, entry.dependencies, ttl);
        revived += 1;
    }
    debug!("Cache '{}': revived {}/{} stored entries", cache.name(), revived, total);
}
