use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use super::path::{extension, file_name, join_path, normalize_path, parent_path};
use super::KeyMap;
use crate::{KeyError, KeySettings};

/// One item of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Directory listings consumed by [`KeyGenerator`].
pub trait TreeSource {
    fn read_dir(&self, dir: &str) -> io::Result<Vec<TreeEntry>>;
}

/// A tree held in memory, for callers that already have a listing.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    dirs: BTreeMap<String, BTreeMap<String, bool>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file and every missing ancestor directory.
    pub fn add_file(&mut self, path: &str) -> &mut Self {
        self.add(path, false)
    }

    pub fn add_dir(&mut self, path: &str) -> &mut Self {
        self.add(path, true)
    }

    pub fn remove(&mut self, path: &str) -> &mut Self {
        let norm = normalize_path(path);
        if let Some(parent) = parent_path(&norm) {
            if let Some(entries) = self.dirs.get_mut(parent) {
                entries.remove(file_name(&norm));
            }
        }
        let prefix = format!("{}/", norm);
        self.dirs
            .retain(|dir, _| dir != &norm && !dir.starts_with(&prefix));
        self
    }

    fn add(&mut self, path: &str, is_dir: bool) -> &mut Self {
        let norm = normalize_path(path);
        if is_dir {
            self.dirs.entry(norm.clone()).or_default();
        }
        let mut child = norm;
        let mut child_is_dir = is_dir;
        while let Some(parent) = parent_path(&child).map(str::to_string) {
            let name = file_name(&child).to_string();
            self.dirs
                .entry(parent.clone())
                .or_default()
                .insert(name, child_is_dir);
            child = parent;
            child_is_dir = true;
        }
        self
    }
}

impl TreeSource for MemoryTree {
    fn read_dir(&self, dir: &str) -> io::Result<Vec<TreeEntry>> {
        let entries = self.dirs.get(dir).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no directory '{}'", dir))
        })?;
        Ok(entries
            .iter()
            .map(|(name, &is_dir)| TreeEntry {
                name: name.clone(),
                is_dir,
            })
            .collect())
    }
}

/// Reads listings from the local filesystem.
///
/// Normalized paths are resolved against `base`; symlinks are followed and
/// entries that are neither files nor directories are left out.
#[derive(Debug, Clone)]
pub struct FsTree {
    base: PathBuf,
}

impl FsTree {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, dir: &str) -> PathBuf {
        let path = Path::new(dir);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}

impl TreeSource for FsTree {
    fn read_dir(&self, dir: &str) -> io::Result<Vec<TreeEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.resolve(dir))? {
            let entry = entry?;
            let meta = match fs::metadata(entry.path()) {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("Skipping unreadable entry {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if !(meta.is_dir() || meta.is_file()) {
                continue;
            }
            out.push(TreeEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
            });
        }
        Ok(out)
    }
}

/// Walks root directories and assigns keys in a reproducible order.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    settings: KeySettings,
    excluded_paths: GlobSet,
}

impl KeyGenerator {
    pub fn new(settings: KeySettings) -> Result<Self, KeyError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &settings.excluded_paths {
            let glob = Glob::new(&normalize_path(pattern)).map_err(|e| KeyError::InvalidExclusion {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let excluded_paths = builder.build().map_err(|e| KeyError::InvalidExclusion {
            pattern: settings.excluded_paths.join(", "),
            reason: e.to_string(),
        })?;
        Ok(Self {
            settings,
            excluded_paths,
        })
    }

    pub fn settings(&self) -> &KeySettings {
        &self.settings
    }

    /// Build a fresh map for `roots`.
    ///
    /// Roots receive `1A`, `1B`, ... in the order given. Children are visited
    /// in sorted name order, so the same tree always yields the same keys.
    pub fn generate<S: AsRef<str>>(
        &self,
        roots: &[S],
        tree: &dyn TreeSource,
    ) -> Result<KeyMap, KeyError> {
        let mut map = KeyMap::new();
        for root in roots {
            let root = normalize_path(root.as_ref());
            if self.is_excluded_path(&root) {
                debug!("Skipping excluded root '{}'", root);
                continue;
            }
            if map.contains_path(&root) {
                warn!("Root '{}' is already keyed; skipping", root);
                continue;
            }
            let entries = tree.read_dir(&root).map_err(|e| KeyError::Scan {
                path: root.clone(),
                reason: e.to_string(),
            })?;
            map.assign_root(&root)?;
            self.walk(&mut map, &root, entries, tree)?;
        }
        info!("Generated {} key(s) for {} root(s)", map.len(), roots.len());
        Ok(map)
    }

    fn walk(
        &self,
        map: &mut KeyMap,
        dir: &str,
        mut entries: Vec<TreeEntry>,
        tree: &dyn TreeSource,
    ) -> Result<(), KeyError> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            let path = join_path(dir, &entry.name);
            if self.skips(&path, &entry) {
                continue;
            }
            if map.contains_path(&path) {
                warn!("Path '{}' is already keyed; check overlapping roots", path);
                continue;
            }
            map.assign_or_get(&path, entry.is_dir)?;
            if entry.is_dir {
                match tree.read_dir(&path) {
                    Ok(children) => self.walk(map, &path, children, tree)?,
                    Err(e) => warn!("Error accessing directory '{}': {}", path, e),
                }
            }
        }
        Ok(())
    }

    fn is_excluded_path(&self, norm_path: &str) -> bool {
        self.excluded_paths.is_match(norm_path)
    }

    /// Exclusion rules applied to each listed item.
    pub fn skips(&self, path: &str, entry: &TreeEntry) -> bool {
        let name = entry.name.as_str();
        if self.is_excluded_path(path) {
            debug!("Skipping excluded path '{}'", path);
            return true;
        }
        if self.settings.excluded_dirs.iter().any(|d| d == name)
            || self.settings.skip_file_names.iter().any(|n| n == name)
        {
            debug!("Skipping excluded name '{}'", path);
            return true;
        }
        if !entry.is_dir {
            if self
                .settings
                .skip_file_suffixes
                .iter()
                .any(|suffix| name.ends_with(suffix.as_str()))
            {
                debug!("Skipping tracker file '{}'", path);
                return true;
            }
            if let Some(ext) = extension(name) {
                if self.settings.excluded_extensions.iter().any(|e| e == ext) {
                    debug!("Skipping file '{}' with excluded extension", path);
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_tree_creates_ancestors() {
        let mut tree = MemoryTree::new();
        tree.add_file("proj/src/a.rs");
        let top = tree.read_dir("proj").unwrap();
        assert_eq!(
            top,
            vec![TreeEntry {
                name: "src".into(),
                is_dir: true
            }]
        );
        assert!(tree.read_dir("proj/src/a.rs").is_err());
    }

    #[test]
    fn memory_tree_remove_drops_subtree() {
        let mut tree = MemoryTree::new();
        tree.add_file("p/a/x.rs").add_file("p/b.rs");
        tree.remove("p/a");
        let names: Vec<_> = tree
            .read_dir("p")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b.rs"]);
        assert!(tree.read_dir("p/a").is_err());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let settings = KeySettings {
            excluded_paths: vec!["src/[".into()],
            ..Default::default()
        };
        assert!(matches!(
            KeyGenerator::new(settings),
            Err(KeyError::InvalidExclusion { .. })
        ));
    }
}
