use depgrid_cache::CacheRegistry;
use depgrid_core::{FsTree, KeyGenerator, KeyMap, KeySettings, MemoryTree, PathMigrationMap};
use depgrid_graph::{
    aggregate, AggregatedLink, Aggregator, CachedGrid, DependencyChar, Grid, GridAxis,
    TrackerSnapshot,
};
use std::collections::BTreeSet;
use std::fs;
use tempfile::TempDir;

fn generator() -> KeyGenerator {
    KeyGenerator::new(KeySettings::default()).unwrap()
}

/// proj -> 1A; a.rs, b.rs, c.rs -> 1A1, 1A2, 1A3
fn three_files() -> KeyMap {
    let mut tree = MemoryTree::new();
    tree.add_file("proj/a.rs")
        .add_file("proj/b.rs")
        .add_file("proj/c.rs");
    generator().generate(&["proj"], &tree).unwrap()
}

fn origins(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn pair_snapshot(origin: &str, ch: char) -> TrackerSnapshot {
    TrackerSnapshot::new(origin)
        .with_definition("1A1", "proj/a.rs")
        .with_definition("1A2", "proj/b.rs")
        .with_row("1A1", &format!("o{}", ch))
        .with_row("1A2", "po")
}

#[test]
fn test_end_to_end_two_trackers() {
    let map = three_files();
    let migration = PathMigrationMap::identity(&map);

    // "src" tracks A and B only and has no column headers.
    let src = pair_snapshot("src", '<');
    let project = TrackerSnapshot::new("project")
        .with_definition("1A1", "proj/a.rs")
        .with_definition("1A2", "proj/b.rs")
        .with_definition("1A3", "proj/c.rs")
        .with_column_headers(&["1A1", "1A2", "1A3"])
        .with_row("1A1", "o<p")
        .with_row("1A2", "pop")
        .with_row("1A3", "ppo");

    let report = aggregate(&[src, project], &migration, &map);
    assert!(report.skipped.is_empty());
    assert_eq!(report.snapshots_used, 2);
    assert_eq!(report.links.len(), 1);
    assert_eq!(
        report.links.get("1A1", "1A2"),
        Some(&AggregatedLink {
            dependency: DependencyChar::RowDependsOnColumn,
            origins: origins(&["src", "project"]),
        })
    );
    assert!(report
        .links
        .iter()
        .all(|(s, t, _)| s != "1A3" && t != "1A3"));
}

#[test]
fn test_conflict_resolution_is_order_independent() {
    let map = three_files();
    let migration = PathMigrationMap::identity(&map);
    let t1 = pair_snapshot("T1", '<');
    let t2 = pair_snapshot("T2", '>');

    let forward = aggregate(&[t1.clone(), t2.clone()], &migration, &map);
    let backward = aggregate(&[t2, t1], &migration, &map);
    assert_eq!(forward.links, backward.links);
    assert_eq!(forward.conflicts, 1);

    let link = forward.links.get("1A1", "1A2").unwrap();
    assert_eq!(link.dependency, DependencyChar::Mutual);
    assert_eq!(link.origins, origins(&["T1", "T2"]));
}

#[test]
fn test_parallel_matches_sequential() {
    let map = three_files();
    let migration = PathMigrationMap::identity(&map);
    let chars = ['<', '>', 'x', 'd', 'S', 's', 'n', 'p'];
    let snapshots: Vec<TrackerSnapshot> = (0..40)
        .map(|i| {
            let a = chars[i % chars.len()];
            let b = chars[(i * 3 + 1) % chars.len()];
            TrackerSnapshot::new(format!("t{i}"))
                .with_definition("1A1", "proj/a.rs")
                .with_definition("1A2", "proj/b.rs")
                .with_definition("1A3", "proj/c.rs")
                .with_row("1A1", &format!("o{a}{b}"))
                .with_row("1A2", &format!("{b}o{a}"))
                .with_row("1A3", "ppo")
        })
        .collect();

    let aggregator = Aggregator::new(&map, &migration);
    let sequential = aggregator.aggregate(&snapshots);
    let parallel = aggregator.aggregate_parallel(&snapshots);
    assert_eq!(sequential, parallel);

    let mut reversed = snapshots.clone();
    reversed.reverse();
    assert_eq!(aggregator.aggregate(&reversed).links, sequential.links);
}

#[test]
fn test_invalid_snapshots_are_skipped_whole() {
    let map = three_files();
    let migration = PathMigrationMap::identity(&map);

    let short = TrackerSnapshot::new("short")
        .with_definition("1A1", "proj/a.rs")
        .with_definition("1A2", "proj/b.rs")
        .with_row("1A1", "o<");
    let garbled = TrackerSnapshot::new("garbled")
        .with_definition("1A1", "proj/a.rs")
        .with_definition("1A3", "proj/c.rs")
        .with_row("1A1", "od")
        .with_row("1A3", "p?");
    let too_wide = TrackerSnapshot::new("too_wide")
        .with_definition("1A1", "proj/a.rs")
        .with_definition("1A3", "proj/c.rs")
        .with_row("1A1", "odd")
        .with_row("1A3", "po");
    let good = pair_snapshot("good", 'd');

    let report = aggregate(&[short, garbled, too_wide, good], &migration, &map);
    let skipped: Vec<&str> = report.skipped.iter().map(|s| s.origin.as_str()).collect();
    assert_eq!(skipped, vec!["short", "garbled", "too_wide"]);
    assert_eq!(report.snapshots_used, 1);
    // nothing from "garbled" leaked in, even its valid first row
    assert!(report.links.get("1A1", "1A3").is_none());
    assert_eq!(
        report.links.get("1A1", "1A2").unwrap().origins,
        origins(&["good"])
    );
}

#[test]
fn test_stale_keys_resolve_through_paths() {
    let old = three_files();
    // b.rs is deleted; c.rs becomes 1A2.
    let mut tree = MemoryTree::new();
    tree.add_file("proj/a.rs").add_file("proj/c.rs");
    let current = generator().generate(&["proj"], &tree).unwrap();
    let migration = PathMigrationMap::between(&old, &current);

    let snapshot = TrackerSnapshot::new("old")
        .with_definition("1A1", "proj/a.rs")
        .with_definition("1A2", "proj/b.rs")
        .with_definition("1A3", "proj/c.rs")
        .with_row("1A1", "o<d")
        .with_row("1A2", ">op")
        .with_row("1A3", "S.o");

    let aggregator = Aggregator::new(&current, &migration);
    let local = aggregator.resolve_snapshot(&snapshot).unwrap();
    assert_eq!(local.dropped_keys, 1);

    let report = aggregator.aggregate(&[snapshot]);
    assert_eq!(report.links.len(), 2);
    assert_eq!(
        report.links.get("1A1", "1A2").unwrap().dependency,
        DependencyChar::Documentation
    );
    assert_eq!(
        report.links.get("1A2", "1A1").unwrap().dependency,
        DependencyChar::StrongSemantic
    );
}

#[test]
fn test_colliding_keys_use_instance_strings() {
    let mut tree = MemoryTree::new();
    tree.add_file("a/x/p/f.rs").add_file("b/x/q/g.rs");
    let map = generator().generate(&["a", "b"], &tree).unwrap();
    let axis = GridAxis::from_key_map(&map).unwrap();
    assert!(axis.contains("2Aa1#1") && axis.contains("2Aa1#2"));

    let grid = Grid::create(&axis)
        .add_dependency("2Aa1#1", "2Aa1#2", DependencyChar::RowDependsOnColumn, &axis)
        .unwrap()
        .add_dependency("2Aa1#2", "2Aa1#1", DependencyChar::ColumnDependsOnRow, &axis)
        .unwrap();
    assert!(grid.validate(&axis).valid);

    let snapshot = TrackerSnapshot::from_grid("main", &grid, &axis, &map).unwrap();
    let report = aggregate(&[snapshot], &PathMigrationMap::identity(&map), &map);
    assert_eq!(report.links.len(), 2);
    let from_f = report.links.links_from("2Aa1#1");
    assert_eq!(from_f.len(), 1);
    assert_eq!(from_f[0].0, "2Aa1#2");
    assert_eq!(from_f[0].1.dependency, DependencyChar::RowDependsOnColumn);
}

#[test]
fn test_rows_decode_through_cache() {
    let map = three_files();
    let migration = PathMigrationMap::identity(&map);
    let registry = CacheRegistry::default();
    let cached = CachedGrid::new(&registry).unwrap();
    let aggregator = Aggregator::new(&map, &migration).with_row_cache(&cached);

    let snapshots = vec![pair_snapshot("one", '<'), pair_snapshot("two", '<')];
    let report = aggregator.aggregate(&snapshots);
    assert_eq!(report.links.len(), 1);

    // both snapshots share identical rows
    let stats = registry.stats("grid_decompress").unwrap();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 2);
}

#[test]
fn test_snapshot_from_scanned_directory() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/lib.rs"), "pub mod grid;").unwrap();
    fs::write(root.join("src/grid.rs"), "").unwrap();

    let map = generator()
        .generate(&["proj"], &FsTree::new(temp.path()))
        .unwrap();
    let axis = GridAxis::from_key_map(&map).unwrap();
    let lib = map.instance_for_path("proj/src/lib.rs").unwrap();
    let grid_rs = map.instance_for_path("proj/src/grid.rs").unwrap();

    let grid = Grid::create(&axis)
        .add_dependency(&lib, &grid_rs, DependencyChar::RowDependsOnColumn, &axis)
        .unwrap();
    let snapshot = TrackerSnapshot::from_grid("src", &grid, &axis, &map).unwrap();
    let json = serde_json::to_string(&snapshot).unwrap();
    let back: TrackerSnapshot = serde_json::from_str(&json).unwrap();

    let report = aggregate(&[back], &PathMigrationMap::identity(&map), &map);
    assert_eq!(report.links.len(), 1);
    assert!(report.links.get(&lib, &grid_rs).is_some());
}

#[test]
fn test_oversized_rows_skip_the_snapshot() {
    let map = three_files();
    let migration = PathMigrationMap::identity(&map);
    let huge = TrackerSnapshot::new("huge")
        .with_definition("1A1", "proj/a.rs")
        .with_definition("1A2", "proj/b.rs")
        .with_row("1A1", "o<")
        .with_row("1A2", "p99999999999999o");
    let overflowing = TrackerSnapshot::new("overflowing")
        .with_definition("1A1", "proj/a.rs")
        .with_definition("1A2", "proj/b.rs")
        .with_row("1A1", "o<")
        .with_row("1A2", "p18446744073709551615p5");

    let registry = CacheRegistry::default();
    let cached = CachedGrid::new(&registry).unwrap();
    for aggregator in [
        Aggregator::new(&map, &migration),
        Aggregator::new(&map, &migration).with_row_cache(&cached),
    ] {
        let report = aggregator.aggregate(&[huge.clone(), overflowing.clone()]);
        assert_eq!(report.snapshots_used, 0);
        assert!(report.links.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(
            report.skipped[0].reason,
            "row '1A2' has 100000000000000 cells, expected 2"
        );
        assert!(report.skipped[1].reason.contains("too large"));
    }
    assert!(cached.row_cache().len() <= 1);
}
