use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::path::normalize_path;
use super::KeyMap;

/// Base keys a path held before and after a regeneration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMigration {
    pub old_key: Option<String>,
    pub new_key: Option<String>,
}

impl PathMigration {
    pub fn is_removed(&self) -> bool {
        self.new_key.is_none()
    }

    pub fn is_added(&self) -> bool {
        self.old_key.is_none()
    }

    pub fn is_changed(&self) -> bool {
        self.old_key != self.new_key
    }
}

/// `norm_path -> (old_key?, new_key?)` for every path known to either scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathMigrationMap {
    entries: BTreeMap<String, PathMigration>,
}

impl PathMigrationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare two scans of the same project.
    pub fn between(old: &KeyMap, new: &KeyMap) -> Self {
        let paths: BTreeSet<&str> = old
            .iter()
            .chain(new.iter())
            .map(|info| info.norm_path.as_str())
            .collect();
        let entries = paths
            .into_iter()
            .map(|path| {
                let migration = PathMigration {
                    old_key: old.key_for_path(path).map(str::to_string),
                    new_key: new.key_for_path(path).map(str::to_string),
                };
                (path.to_string(), migration)
            })
            .collect();
        Self { entries }
    }

    /// Migration for a map where nothing moved.
    pub fn identity(map: &KeyMap) -> Self {
        Self::between(map, map)
    }

    pub fn insert(&mut self, path: &str, old_key: Option<&str>, new_key: Option<&str>) {
        self.entries.insert(
            normalize_path(path),
            PathMigration {
                old_key: old_key.map(str::to_string),
                new_key: new_key.map(str::to_string),
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<&PathMigration> {
        self.entries.get(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PathMigration)> {
        self.entries.iter().map(|(p, m)| (p.as_str(), m))
    }

    /// Paths whose key changed, appeared or disappeared.
    pub fn changed(&self) -> impl Iterator<Item = (&str, &PathMigration)> {
        self.iter().filter(|(_, m)| m.is_changed())
    }
}
