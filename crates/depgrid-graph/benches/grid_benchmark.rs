use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use depgrid_core::{KeyGenerator, KeySettings, MemoryTree, PathMigrationMap};
use depgrid_graph::{
    compress, decompress, get_char_at, Aggregator, DependencyChar, Grid, GridAxis,
    TrackerSnapshot,
};

/// Mostly placeholders with a few scattered dependencies, like a real row.
fn sparse_row(len: usize) -> Vec<DependencyChar> {
    (0..len)
        .map(|i| match i % 37 {
            0 => DependencyChar::RowDependsOnColumn,
            11 => DependencyChar::Documentation,
            23 => DependencyChar::NoDependency,
            _ => DependencyChar::Placeholder,
        })
        .collect()
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("rle");
    for len in [64usize, 512, 4096] {
        let row = sparse_row(len);
        let encoded = compress(&row);

        group.bench_with_input(BenchmarkId::new("compress", len), &row, |b, row| {
            b.iter(|| compress(black_box(row)))
        });
        group.bench_with_input(BenchmarkId::new("decompress", len), &encoded, |b, encoded| {
            b.iter(|| decompress(black_box(encoded)))
        });
        group.bench_with_input(
            BenchmarkId::new("get_char_at_last", len),
            &encoded,
            |b, encoded| b.iter(|| get_char_at(black_box(encoded), len - 1)),
        );
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut tree = MemoryTree::new();
    for dir in 0..8 {
        for file in 0..25 {
            tree.add_file(&format!("proj/d{dir}/f{file}.rs"));
        }
    }
    let map = KeyGenerator::new(KeySettings::default())
        .and_then(|g| g.generate(&["proj"], &tree))
        .unwrap();
    let migration = PathMigrationMap::identity(&map);
    let axis = GridAxis::from_key_map(&map).unwrap();
    let keys = axis.keys().to_vec();

    let snapshots: Vec<TrackerSnapshot> = (0..16)
        .map(|t| {
            let mut grid = Grid::create(&axis);
            for (i, key) in keys.iter().enumerate().skip(t).step_by(7) {
                let target = &keys[(i * 13 + t) % keys.len()];
                if target != key {
                    grid = grid
                        .add_dependency(key, target, DependencyChar::RowDependsOnColumn, &axis)
                        .unwrap();
                }
            }
            TrackerSnapshot::from_grid(format!("t{t}"), &grid, &axis, &map).unwrap()
        })
        .collect();

    let aggregator = Aggregator::new(&map, &migration);
    let mut group = c.benchmark_group("aggregate");
    group.bench_function("sequential", |b| {
        b.iter(|| aggregator.aggregate(black_box(&snapshots)))
    });
    group.bench_function("parallel", |b| {
        b.iter(|| aggregator.aggregate_parallel(black_box(&snapshots)))
    });
    group.finish();
}

criterion_group!(benches, bench_codec, bench_aggregate);
criterion_main!(benches);
