use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use depgrid_cache::{
    tracker_cache_key, Cache, CacheError, CacheRegistry, CacheableResult, Ttl,
};
use depgrid_core::{CacheSettings, EvictionPolicy, NamespaceConfig};
use tempfile::TempDir;

fn small(max: usize) -> NamespaceConfig {
    NamespaceConfig::new(max, None)
}

#[test]
fn test_repeated_reads_count_hits() {
    let cache: Cache<String, u32> = Cache::new("hits", small(10));
    let key = "k".to_string();
    let mut computed = 0;
    for _ in 0..5 {
        let v: Result<u32, ()> = cache.get_or_compute(key.clone(), || {
            computed += 1;
            Ok(7)
        });
        assert_eq!(v, Ok(7));
    }
    let stats = cache.stats();
    assert_eq!(computed, 1);
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 0.8).abs() < 1e-9);
}

#[test]
fn test_failed_compute_is_not_stored() {
    let cache: Cache<String, u32> = Cache::new("errors", small(10));
    let r: Result<u32, &str> = cache.get_or_compute("k".into(), || Err("boom"));
    assert_eq!(r, Err("boom"));
    assert!(cache.is_empty());
}

#[test]
fn test_cascade_reaches_transitive_dependents_only() {
    let cache: Cache<String, &'static str> = Cache::new("cascade", small(10));
    cache.insert("A".into(), "a");
    cache.insert_with("B".into(), "b", vec!["A".into()], Ttl::Default);
    cache.insert_with("C".into(), "c", vec!["B".into()], Ttl::Default);
    cache.insert("D".into(), "d");

    assert_eq!(cache.invalidate("A$").unwrap(), 3);
    assert!(!cache.contains_key(&"A".to_string()));
    assert!(!cache.contains_key(&"B".to_string()));
    assert!(!cache.contains_key(&"C".to_string()));
    assert!(cache.contains_key(&"D".to_string()));
    assert_eq!(cache.stats().invalidations, 3);
}

#[test]
fn test_cyclic_dependencies_terminate() {
    let cache: Cache<String, u8> = Cache::new("cycle", small(10));
    cache.insert_with("x".into(), 1, vec!["y".into()], Ttl::Default);
    cache.insert_with("y".into(), 2, vec!["x".into()], Ttl::Default);
    assert_eq!(cache.invalidate_key(&"x".to_string()), 2);
    assert!(cache.is_empty());
}

#[test]
fn test_dependency_only_key_invalidates_dependents() {
    let cache: Cache<String, u8> = Cache::new("deps", small(10));
    cache.insert_with("parsed".into(), 1, vec!["file:src/a.rs".into()], Ttl::Default);
    assert_eq!(cache.invalidate("file:src/a\\.rs").unwrap(), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_evicted_entry_still_cascades_through_inbound_edges() {
    let cache: Cache<String, u8> = Cache::new("evict", small(2));
    cache.insert("base".into(), 0);
    cache.insert_with("derived".into(), 1, vec!["base".into()], Ttl::Default);
    // pushes "base" out
    cache.insert("other".into(), 2);
    assert!(!cache.contains_key(&"base".to_string()));
    assert_eq!(cache.invalidate_key(&"base".to_string()), 1);
    assert!(!cache.contains_key(&"derived".to_string()));
    assert!(cache.contains_key(&"other".to_string()));
}

#[test]
fn test_invalid_pattern_is_an_error() {
    let cache: Cache<String, u8> = Cache::new("bad", small(2));
    assert!(matches!(
        cache.invalidate("("),
        Err(CacheError::InvalidPattern { .. })
    ));
}

#[test]
fn test_lru_and_lfu_pick_different_victims() {
    let lru: Cache<String, u8> = Cache::new("lru", small(2));
    let lfu: Cache<String, u8> = Cache::new("lfu", small(2).with_eviction(EvictionPolicy::Lfu));
    for cache in [&lru, &lfu] {
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.get(&"a".to_string());
        cache.get(&"a".to_string());
        cache.get(&"b".to_string());
        cache.insert("c".into(), 3);
    }
    // LRU: "a" was read before "b", so "a" goes.
    assert!(!lru.contains_key(&"a".to_string()));
    assert!(lru.contains_key(&"b".to_string()));
    // LFU: "b" has fewer reads.
    assert!(lfu.contains_key(&"a".to_string()));
    assert!(!lfu.contains_key(&"b".to_string()));
}

#[test]
fn test_fifo_ignores_reads() {
    let cache: Cache<String, u8> = Cache::new("fifo", small(2).with_eviction(EvictionPolicy::Fifo));
    cache.insert("a".into(), 1);
    cache.insert("b".into(), 2);
    cache.get(&"a".to_string());
    cache.insert("c".into(), 3);
    assert!(!cache.contains_key(&"a".to_string()));
    assert!(cache.contains_key(&"b".to_string()));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_ttl_expiry_and_cleanup() {
    let cache: Cache<String, u8> = Cache::new("ttl", small(10));
    cache.insert_with("short".into(), 1, Vec::new(), Ttl::After(Duration::from_millis(20)));
    cache.insert_with("forever".into(), 2, Vec::new(), Ttl::After(Duration::ZERO));
    thread::sleep(Duration::from_millis(40));
    assert_eq!(cache.cleanup_expired(), 1);
    assert_eq!(cache.get(&"forever".to_string()), Some(2));
    assert_eq!(cache.stats().expirations, 1);
}

#[test]
fn test_expired_read_is_a_miss() {
    let cache: Cache<String, u8> = Cache::new("ttl", NamespaceConfig::new(10, Some(Duration::from_millis(10))));
    cache.insert("k".into(), 1);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(cache.get(&"k".to_string()), None);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 0);
}

#[test]
fn test_concurrent_access_stays_bounded() {
    let cache: Arc<Cache<String, usize>> = Arc::new(Cache::new("threads", small(64)));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("k{}", (t * 31 + i) % 100);
                    let _: Result<usize, ()> = cache.get_or_compute(key, || Ok(i));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let stats = cache.stats();
    assert!(cache.len() <= 64);
    assert_eq!(stats.hits + stats.misses, 1600);
}

#[test]
fn test_file_modified_spans_namespaces() {
    let registry = CacheRegistry::default();
    let trackers = registry.get_or_create::<String>("trackers").unwrap();
    let parsed = registry.get_or_create::<u32>("parsed").unwrap();

    trackers.insert(tracker_cache_key("docs/main_module.md", "main"), "t".into());
    trackers.insert(tracker_cache_key("docs/other.md", "doc"), "u".into());
    parsed.insert("src/a.rs|src/b.rs".into(), 1);
    parsed.insert_with("summary".into(), 2, vec!["file:src/a.rs".into()], Ttl::Default);
    parsed.insert("src/a.rsx".into(), 3);

    assert_eq!(registry.file_modified("src/a.rs").unwrap(), 2);
    assert_eq!(parsed.len(), 1);
    assert!(parsed.contains_key(&"src/a.rsx".to_string()));

    assert_eq!(registry.tracker_modified("./docs/main_module.md").unwrap(), 1);
    assert_eq!(trackers.len(), 1);
}

#[test]
fn test_check_file_modified_tracks_mtime() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("f.txt");
    let registry = CacheRegistry::default();

    assert!(!registry.check_file_modified(&path).unwrap());
    fs::write(&path, "one").unwrap();
    assert!(registry.check_file_modified(&path).unwrap());
    assert!(!registry.check_file_modified(&path).unwrap());
    fs::remove_file(&path).unwrap();
    assert!(registry.check_file_modified(&path).unwrap());
    assert!(!registry.check_file_modified(&path).unwrap());
}

#[test]
fn test_configure_before_open_is_used() {
    let registry = CacheRegistry::default();
    registry.configure(
        "grid_validation",
        NamespaceConfig::new(2, None).with_eviction(EvictionPolicy::Fifo),
    );
    let cache = registry.get_or_create::<bool>("grid_validation").unwrap();
    assert_eq!(cache.config().max_size, 2);
    assert_eq!(cache.config().eviction, EvictionPolicy::Fifo);
}

#[test]
fn test_type_mismatch() {
    let registry = CacheRegistry::default();
    registry.get_or_create::<Vec<String>>("ns").unwrap();
    let err = registry.get_or_create::<u64>("ns").unwrap_err();
    assert!(err.to_string().contains("ns"));
}

#[test]
fn test_persistence_roundtrip() {
    let temp = TempDir::new().unwrap();
    {
        let registry = CacheRegistry::with_persistence(CacheSettings::default(), temp.path()).unwrap();
        let cache = registry.get_or_create::<Vec<String>>("deps").unwrap();
        cache.insert("a".into(), vec!["x".into()]);
        cache.insert_with("b".into(), vec!["y".into()], vec!["a".into()], Ttl::Never);
        registry.flush().unwrap();
    }
    assert!(temp.path().join("deps.json").exists());

    let registry = CacheRegistry::with_persistence(CacheSettings::default(), temp.path()).unwrap();
    let cache = registry.get_or_create::<Vec<String>>("deps").unwrap();
    assert_eq!(cache.get(&"a".to_string()), Some(vec!["x".to_string()]));
    assert_eq!(cache.dependents_of(&"a".to_string()), vec!["b".to_string()]);
    assert_eq!(cache.invalidate_key(&"a".to_string()), 2);
}

#[test]
fn test_corrupt_persisted_file_is_removed() {
    let temp = TempDir::new().unwrap();
    let bad = temp.path().join("broken.json");
    fs::write(&bad, "{ not json").unwrap();
    fs::write(temp.path().join("empty.json"), "").unwrap();

    let registry = CacheRegistry::with_persistence(CacheSettings::default(), temp.path()).unwrap();
    assert!(!bad.exists());
    assert!(!temp.path().join("empty.json").exists());
    let cache = registry.get_or_create::<u8>("broken").unwrap();
    assert!(cache.is_empty());
}

#[test]
fn test_clear_all_empties_every_namespace() {
    let registry = CacheRegistry::default();
    let a = registry.get_or_create::<u8>("a").unwrap();
    let b = registry.get_or_create::<u8>("b").unwrap();
    a.insert("k".into(), 1);
    b.insert("k".into(), 2);
    registry.clear_all().unwrap();
    assert!(a.is_empty() && b.is_empty());
    assert_eq!(registry.all_stats().len(), 2);
}

#[test]
fn test_cacheable_result_registers_dependencies() {
    let cache: Cache<String, u8> = Cache::new("deps", small(10));
    let v: Result<u8, ()> = cache.get_or_compute_with_deps("out".into(), Ttl::Default, || {
        Ok(CacheableResult::with_dependencies(5, vec!["in".to_string()]))
    });
    assert_eq!(v, Ok(5));
    assert_eq!(cache.dependents_of(&"in".to_string()), vec!["out".to_string()]);
}
