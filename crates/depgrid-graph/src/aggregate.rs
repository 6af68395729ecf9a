//! Merge many tracker snapshots into one project-wide set of links.
//!
//! Each snapshot is resolved on its own against the current key map (this is
//! the part that runs in parallel), then all observations are folded into a
//! [`LinkAccumulator`]. The accumulator only unions per-character origin
//! sets, so the fold is commutative and associative; priorities and conflict
//! rules are applied once, in [`LinkAccumulator::resolve`].

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use depgrid_core::{normalize_path, KeyMap, PathMigrationMap};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cached::CachedGrid;
use crate::grid::{Grid, GridAxis, GridError};
use crate::rle::{self, RleError};
use crate::DependencyChar;

/// `key = path` line of a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDefinition {
    pub key: String,
    pub path: String,
}

impl KeyDefinition {
    pub fn new(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
        }
    }
}

/// Logical content of one tracker file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    /// Label recorded in the origins of every link this snapshot contributes.
    pub origin: String,
    pub definitions: Vec<KeyDefinition>,
    #[serde(default)]
    pub column_headers: Vec<String>,
    /// `(row label, compressed row)` in definition order.
    pub rows: Vec<(String, String)>,
    #[serde(default)]
    pub last_key_edit: String,
    #[serde(default)]
    pub last_grid_edit: String,
}

impl TrackerSnapshot {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Snapshot of an in-memory grid. Axis keys are global instance strings of
    /// `key_map`.
    pub fn from_grid(
        origin: impl Into<String>,
        grid: &Grid,
        axis: &GridAxis,
        key_map: &KeyMap,
    ) -> Result<Self, GridError> {
        let mut snapshot = Self::new(origin);
        for key in axis.keys() {
            let info = key_map.resolve(key)?;
            let row = grid
                .row(key)
                .ok_or_else(|| GridError::MissingRow(key.clone()))?;
            snapshot
                .definitions
                .push(KeyDefinition::new(key.clone(), info.norm_path.clone()));
            snapshot.column_headers.push(key.clone());
            snapshot.rows.push((key.clone(), row.to_string()));
        }
        Ok(snapshot)
    }

    pub fn with_definition(mut self, key: &str, path: &str) -> Self {
        self.definitions.push(KeyDefinition::new(key, path));
        self
    }

    pub fn with_row(mut self, label: &str, row: &str) -> Self {
        self.rows.push((label.to_string(), row.to_string()));
        self
    }

    pub fn with_column_headers<S: AsRef<str>>(mut self, headers: &[S]) -> Self {
        self.column_headers = headers.iter().map(|h| h.as_ref().to_string()).collect();
        self
    }

    /// Column headers, imputed from the definitions when the tracker has none
    /// but its definitions and rows line up.
    fn effective_headers(&self) -> Cow<'_, [String]> {
        if self.column_headers.is_empty()
            && !self.definitions.is_empty()
            && self.definitions.len() == self.rows.len()
        {
            debug!(
                "Tracker '{}' has no column headers; using its {} definitions",
                self.origin,
                self.definitions.len()
            );
            Cow::Owned(self.definitions.iter().map(|d| d.key.clone()).collect())
        } else {
            Cow::Borrowed(&self.column_headers)
        }
    }
}

/// A snapshot left out of the aggregation, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSnapshot {
    pub origin: String,
    pub reason: String,
}

/// Final value of one `(source, target)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedLink {
    pub dependency: DependencyChar,
    pub origins: BTreeSet<String>,
}

type Observations = BTreeMap<DependencyChar, BTreeSet<String>>;

/// Every character observed for every pair, with the snapshots that observed
/// it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkAccumulator {
    pairs: BTreeMap<(String, String), Observations>,
}

impl LinkAccumulator {
    pub fn observe(&mut self, source: &str, target: &str, ch: DependencyChar, origin: &str) {
        self.pairs
            .entry((source.to_string(), target.to_string()))
            .or_default()
            .entry(ch)
            .or_default()
            .insert(origin.to_string());
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: LinkAccumulator) {
        for (pair, observed) in other.pairs {
            let mine = self.pairs.entry(pair).or_default();
            for (ch, origins) in observed {
                mine.entry(ch).or_default().extend(origins);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pick one character per pair: the highest priority wins. Between
    /// characters of equal priority, `<` against `>` becomes `x` carrying both
    /// origin sets; otherwise anything beats `n`, and `d` beats `S`.
    ///
    /// Returns the links and the number of pairs that needed a tiebreak.
    pub fn resolve(self) -> (AggregatedLinks, usize) {
        let mut links = BTreeMap::new();
        let mut conflicts = 0;
        for ((source, target), observed) in self.pairs {
            let Some(top) = observed.keys().map(|c| c.priority()).max() else {
                continue;
            };
            let mut contenders: Vec<(DependencyChar, BTreeSet<String>)> = observed
                .into_iter()
                .filter(|(c, _)| c.priority() == top)
                .collect();

            let link = if contenders.len() == 1 {
                let (dependency, origins) = contenders.remove(0);
                AggregatedLink {
                    dependency,
                    origins,
                }
            } else {
                conflicts += 1;
                let link = break_tie(contenders);
                warn!(
                    "Conflicting characters for {} -> {}; resolved to '{}' (origins {:?})",
                    source, target, link.dependency, link.origins
                );
                link
            };
            links.insert((source, target), link);
        }
        (AggregatedLinks { links }, conflicts)
    }
}

fn break_tie(contenders: Vec<(DependencyChar, BTreeSet<String>)>) -> AggregatedLink {
    let has = |c: DependencyChar| contenders.iter().any(|(d, _)| *d == c);
    if has(DependencyChar::RowDependsOnColumn) && has(DependencyChar::ColumnDependsOnRow) {
        let origins = contenders
            .into_iter()
            .filter(|(d, _)| {
                matches!(
                    d,
                    DependencyChar::RowDependsOnColumn | DependencyChar::ColumnDependsOnRow
                )
            })
            .flat_map(|(_, o)| o)
            .collect();
        return AggregatedLink {
            dependency: DependencyChar::Mutual,
            origins,
        };
    }

    // Contenders come out of a BTreeMap, so they are in enum order:
    // `<`/`>` before `n`, `d` before `S`.
    let mut remaining: Vec<_> = contenders
        .iter()
        .filter(|(d, _)| *d != DependencyChar::NoDependency)
        .cloned()
        .collect();
    if remaining.is_empty() {
        remaining = contenders;
    }
    let (dependency, origins) = remaining.remove(0);
    AggregatedLink {
        dependency,
        origins,
    }
}

/// Resolved project-wide links keyed by `(source, target)` instance strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedLinks {
    links: BTreeMap<(String, String), AggregatedLink>,
}

impl AggregatedLinks {
    pub fn get(&self, source: &str, target: &str) -> Option<&AggregatedLink> {
        self.links.get(&(source.to_string(), target.to_string()))
    }

    /// Every link whose source is `source`, ordered by target.
    pub fn links_from(&self, source: &str) -> Vec<(&str, &AggregatedLink)> {
        self.links
            .range((source.to_string(), String::new())..)
            .take_while(|((s, _), _)| s == source)
            .map(|((_, t), link)| (t.as_str(), link))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &AggregatedLink)> {
        self.links
            .iter()
            .map(|((s, t), link)| (s.as_str(), t.as_str(), link))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Observations from one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalLinks {
    pub origin: String,
    pub links: LinkAccumulator,
    /// Definitions whose path no longer resolves to a current key.
    pub dropped_keys: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    pub links: AggregatedLinks,
    pub skipped: Vec<SkippedSnapshot>,
    pub conflicts: usize,
    pub snapshots_used: usize,
}

/// Merges snapshots against one key map and migration map.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator<'a> {
    key_map: &'a KeyMap,
    migration: &'a PathMigrationMap,
    rows: Option<&'a CachedGrid>,
}

impl<'a> Aggregator<'a> {
    pub fn new(key_map: &'a KeyMap, migration: &'a PathMigrationMap) -> Self {
        Self {
            key_map,
            migration,
            rows: None,
        }
    }

    /// Decode rows through the `grid_decompress` cache.
    pub fn with_row_cache(mut self, cached: &'a CachedGrid) -> Self {
        self.rows = Some(cached);
        self
    }

    /// Decode a row of `len` cells. The declared length is checked first so
    /// an oversized row is never expanded.
    fn decode(&self, row: &str, len: usize) -> Result<Vec<DependencyChar>, RleError> {
        let actual = rle::decoded_len(row)?;
        if actual != len {
            return Err(RleError::LengthMismatch {
                expected: len,
                actual,
            });
        }
        match self.rows {
            Some(cached) => cached.decompress(row),
            None => rle::decompress(row),
        }
    }

    /// Current `(instance string, normalized path)` for a tracked path, or
    /// `None` when the path was removed or is no longer keyed.
    fn current_instance(&self, path: &str) -> Option<(String, String)> {
        let norm = normalize_path(path);
        if self.migration.get(&norm).is_some_and(|m| m.is_removed()) {
            return None;
        }
        let info = self.key_map.get(&norm)?;
        let instance = self.key_map.global_instance_string(info).ok()?;
        Some((instance, info.norm_path.clone()))
    }

    /// Resolve one snapshot to current instance strings. A structurally
    /// invalid snapshot contributes nothing.
    pub fn resolve_snapshot(&self, snapshot: &TrackerSnapshot) -> Result<LocalLinks, SkippedSnapshot> {
        let skip = |reason: String| SkippedSnapshot {
            origin: snapshot.origin.clone(),
            reason,
        };

        let n = snapshot.definitions.len();
        let headers = snapshot.effective_headers();
        if headers.len() != n || snapshot.rows.len() != n {
            return Err(skip(format!(
                "{} definitions, {} column headers and {} rows do not match",
                n,
                headers.len(),
                snapshot.rows.len()
            )));
        }

        let mut grid = Vec::with_capacity(n);
        for (i, def) in snapshot.definitions.iter().enumerate() {
            let (label, row) = &snapshot.rows[i];
            if label != &def.key {
                return Err(skip(format!(
                    "row {} is labelled '{}' but defined as '{}'",
                    i, label, def.key
                )));
            }
            if headers[i] != def.key {
                return Err(skip(format!(
                    "column {} is headed '{}' but defined as '{}'",
                    i, headers[i], def.key
                )));
            }
            let cells = self.decode(row, n).map_err(|e| match e {
                RleError::LengthMismatch { expected, actual } => skip(format!(
                    "row '{}' has {} cells, expected {}",
                    label, actual, expected
                )),
                e => skip(format!("row '{}' does not decode: {}", label, e)),
            })?;
            grid.push(cells);
        }

        let resolved: Vec<Option<(String, String)>> = snapshot
            .definitions
            .iter()
            .map(|def| self.current_instance(&def.path))
            .collect();
        let dropped_keys = resolved.iter().filter(|r| r.is_none()).count();

        let mut links = LinkAccumulator::default();
        for (i, cells) in grid.iter().enumerate() {
            let Some((source, source_path)) = &resolved[i] else {
                continue;
            };
            for (j, &ch) in cells.iter().enumerate() {
                if i == j || !ch.is_observation() {
                    continue;
                }
                let Some((target, target_path)) = &resolved[j] else {
                    continue;
                };
                if source_path == target_path {
                    continue;
                }
                links.observe(source, target, ch, &snapshot.origin);
            }
        }

        debug!(
            "Tracker '{}': {} pair(s) observed, {} definition(s) dropped",
            snapshot.origin,
            links.len(),
            dropped_keys
        );
        Ok(LocalLinks {
            origin: snapshot.origin.clone(),
            links,
            dropped_keys,
        })
    }

    pub fn aggregate(&self, snapshots: &[TrackerSnapshot]) -> AggregationReport {
        let resolved: Vec<_> = snapshots
            .iter()
            .map(|snapshot| self.resolve_snapshot(snapshot))
            .collect();
        self.fold(resolved)
    }

    /// Same result as [`Aggregator::aggregate`], resolving snapshots on the
    /// rayon pool. The fold stays on the calling thread.
    pub fn aggregate_parallel(&self, snapshots: &[TrackerSnapshot]) -> AggregationReport {
        let resolved: Vec<_> = snapshots
            .par_iter()
            .map(|snapshot| self.resolve_snapshot(snapshot))
            .collect();
        self.fold(resolved)
    }

    fn fold(&self, resolved: Vec<Result<LocalLinks, SkippedSnapshot>>) -> AggregationReport {
        let mut acc = LinkAccumulator::default();
        let mut skipped = Vec::new();
        let mut snapshots_used = 0;
        for result in resolved {
            match result {
                Ok(local) => {
                    acc.merge(local.links);
                    snapshots_used += 1;
                }
                Err(skip) => {
                    warn!("Skipping tracker '{}': {}", skip.origin, skip.reason);
                    skipped.push(skip);
                }
            }
        }

        let (links, conflicts) = acc.resolve();
        info!(
            "Aggregated {} link(s) from {} tracker(s); {} skipped, {} conflict(s)",
            links.len(),
            snapshots_used,
            skipped.len(),
            conflicts
        );
        AggregationReport {
            links,
            skipped,
            conflicts,
            snapshots_used,
        }
    }
}

/// Aggregate `snapshots` against the current keys.
pub fn aggregate(
    snapshots: &[TrackerSnapshot],
    migration: &PathMigrationMap,
    current: &KeyMap,
) -> AggregationReport {
    Aggregator::new(current, migration).aggregate(snapshots)
}
