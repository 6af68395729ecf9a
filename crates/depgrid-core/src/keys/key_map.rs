use std::collections::HashMap;

use tracing::{debug, warn};

use super::path::{is_within, normalize_path, parent_path};
use super::{hierarchical_cmp, parse_subdir_key, split_instance, validate_key, KeyInfo};
use crate::KeyError;

const MAX_LETTERS: u32 = 26;

/// Path to key assignments for one scan of a project.
///
/// `KeyInfo` records live in an arena; lookups by path, by base key and by
/// parent directory go through secondary indexes. The per-base index is kept
/// sorted by path, which is all `#n` disambiguation needs, so instance numbers
/// are never stored and always reflect the current set of colliding paths.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    infos: Vec<KeyInfo>,
    by_path: HashMap<String, usize>,
    by_base: HashMap<String, Vec<usize>>,
    children: HashMap<String, Vec<usize>>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a map from previously assigned records.
    ///
    /// Paths must be unique and every `parent_path` must name a directory in
    /// the same set.
    pub fn from_infos(infos: Vec<KeyInfo>) -> Result<Self, KeyError> {
        let mut map = Self::new();
        for mut info in infos {
            if !validate_key(&info.key_string) {
                return Err(KeyError::InvalidFormat(info.key_string));
            }
            info.norm_path = normalize_path(&info.norm_path);
            info.parent_path = info.parent_path.map(|p| normalize_path(&p));
            if map.by_path.contains_key(&info.norm_path) {
                return Err(KeyError::InvalidFormat(format!(
                    "duplicate path '{}'",
                    info.norm_path
                )));
            }
            map.by_path.insert(info.norm_path.clone(), map.infos.len());
            map.infos.push(info);
        }
        for info in &map.infos {
            if let Some(parent) = &info.parent_path {
                let parent_is_dir = map
                    .by_path
                    .get(parent)
                    .map(|&idx| map.infos[idx].is_directory)
                    .unwrap_or(false);
                if !parent_is_dir {
                    return Err(KeyError::UntrackedParent {
                        path: info.norm_path.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        map.reindex();
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyInfo> {
        self.infos.iter()
    }

    pub fn get(&self, path: &str) -> Option<&KeyInfo> {
        self.by_path
            .get(&normalize_path(path))
            .map(|&idx| &self.infos[idx])
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Base key of a path.
    pub fn key_for_path(&self, path: &str) -> Option<&str> {
        self.get(path).map(|info| info.key_string.as_str())
    }

    /// All records sharing a base key, sorted by path.
    pub fn infos_for_key(&self, key: &str) -> Vec<&KeyInfo> {
        self.by_base
            .get(key)
            .map(|group| group.iter().map(|&idx| &self.infos[idx]).collect())
            .unwrap_or_default()
    }

    /// Direct children of a tracked directory, in assignment order.
    pub fn children_of(&self, dir: &str) -> Vec<&KeyInfo> {
        self.children
            .get(&normalize_path(dir))
            .map(|kids| kids.iter().map(|&idx| &self.infos[idx]).collect())
            .unwrap_or_default()
    }

    /// Assign a new top level key (`1A`, `1B`, ...) to a root directory.
    ///
    /// Returns the existing record when the path is already keyed.
    pub fn assign_root(&mut self, path: &str) -> Result<KeyInfo, KeyError> {
        let norm = normalize_path(path);
        if let Some(existing) = self.get(&norm) {
            return Ok(existing.clone());
        }

        let next = self
            .infos
            .iter()
            .filter(|info| info.parent_path.is_none() && info.tier == 1 && info.key_string.len() == 2)
            .filter_map(|info| info.key_string.chars().nth(1))
            .map(|c| c as u32 - 'A' as u32 + 1)
            .max()
            .unwrap_or(0);
        if next >= MAX_LETTERS {
            return Err(KeyError::TooManyChildren {
                kind: "root directories",
                parent: "<roots>".to_string(),
                path: norm,
            });
        }

        let letter = letter_at('A', next);
        let info = KeyInfo {
            key_string: format!("1{}", letter),
            norm_path: norm,
            parent_path: None,
            tier: 1,
            is_directory: true,
        };
        debug!("Assigned root key '{}' to '{}'", info.key_string, info.norm_path);
        Ok(self.insert(info))
    }

    /// Key for `path`, assigning one when it is new.
    ///
    /// New paths are keyed relative to their tracked parent directory. A new
    /// directory whose parent is not tracked becomes a root; a new file whose
    /// parent is not tracked is rejected.
    pub fn assign_or_get(&mut self, path: &str, is_directory: bool) -> Result<KeyInfo, KeyError> {
        let norm = normalize_path(path);
        if let Some(existing) = self.get(&norm) {
            return Ok(existing.clone());
        }

        let parent = parent_path(&norm).and_then(|p| self.get(p).filter(|info| info.is_directory));
        let Some(parent) = parent.cloned() else {
            if is_directory {
                return self.assign_root(&norm);
            }
            return Err(KeyError::UntrackedParent {
                parent: parent_path(&norm).unwrap_or_default().to_string(),
                path: norm,
            });
        };

        let info = if is_directory {
            self.next_directory_key(&parent, norm)?
        } else {
            let number = self.max_file_number(&parent) + 1;
            KeyInfo {
                key_string: format!("{}{}", parent.key_string, number),
                norm_path: norm,
                parent_path: Some(parent.norm_path.clone()),
                tier: parent.tier,
                is_directory: false,
            }
        };
        debug!(
            "Assigned key '{}' to {} '{}'",
            info.key_string,
            if info.is_directory { "directory" } else { "file" },
            info.norm_path
        );
        Ok(self.insert(info))
    }

    fn next_directory_key(&self, parent: &KeyInfo, norm: String) -> Result<KeyInfo, KeyError> {
        let used = self
            .children
            .get(&parent.norm_path)
            .into_iter()
            .flatten()
            .map(|&idx| &self.infos[idx])
            .filter(|info| info.is_directory)
            .filter_map(|info| info.key_string.chars().last())
            .filter(|c| c.is_ascii_lowercase())
            .map(|c| c as u32 - 'a' as u32 + 1)
            .max()
            .unwrap_or(0);
        if used >= MAX_LETTERS {
            return Err(KeyError::TooManyChildren {
                kind: "sub-directories",
                parent: parent.norm_path.clone(),
                path: norm,
            });
        }
        let letter = letter_at('a', used);

        // A directory inside a sub-directory key is promoted to the next tier.
        let (key_string, tier) = match parse_subdir_key(&parent.key_string) {
            Some((tier, sub)) => (
                format!("{}{}{}", tier + 1, sub.to_ascii_uppercase(), letter),
                tier + 1,
            ),
            None => (format!("{}{}", parent.key_string, letter), parent.tier),
        };
        if !validate_key(&key_string) {
            return Err(KeyError::InvalidFormat(key_string));
        }
        Ok(KeyInfo {
            key_string,
            norm_path: norm,
            parent_path: Some(parent.norm_path.clone()),
            tier,
            is_directory: true,
        })
    }

    fn max_file_number(&self, parent: &KeyInfo) -> u64 {
        self.children
            .get(&parent.norm_path)
            .into_iter()
            .flatten()
            .map(|&idx| &self.infos[idx])
            .filter(|info| !info.is_directory)
            .filter_map(|info| info.key_string.strip_prefix(parent.key_string.as_str()))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }

    fn insert(&mut self, info: KeyInfo) -> KeyInfo {
        let idx = self.infos.len();
        self.by_path.insert(info.norm_path.clone(), idx);
        self.insert_by_base(idx, &info);
        if let Some(parent) = &info.parent_path {
            self.children.entry(parent.clone()).or_default().push(idx);
        }
        self.infos.push(info.clone());
        info
    }

    fn insert_by_base(&mut self, idx: usize, info: &KeyInfo) {
        let infos = &self.infos;
        let group = self.by_base.entry(info.key_string.clone()).or_default();
        let pos = group
            .binary_search_by(|&other| infos[other].norm_path.cmp(&info.norm_path))
            .unwrap_or_else(|pos| pos);
        group.insert(pos, idx);
    }

    /// Remove a path and everything underneath it.
    pub fn remove(&mut self, path: &str) -> Vec<KeyInfo> {
        let norm = normalize_path(path);
        if !self.by_path.contains_key(&norm) {
            return Vec::new();
        }
        let (removed, kept): (Vec<KeyInfo>, Vec<KeyInfo>) = std::mem::take(&mut self.infos)
            .into_iter()
            .partition(|info| is_within(&info.norm_path, &norm));
        self.infos = kept;
        self.reindex();
        debug!("Removed {} key(s) under '{}'", removed.len(), norm);
        removed
    }

    fn reindex(&mut self) {
        self.by_path.clear();
        self.by_base.clear();
        self.children.clear();
        for (idx, info) in self.infos.iter().enumerate() {
            self.by_path.insert(info.norm_path.clone(), idx);
            self.by_base
                .entry(info.key_string.clone())
                .or_default()
                .push(idx);
            if let Some(parent) = &info.parent_path {
                self.children.entry(parent.clone()).or_default().push(idx);
            }
        }
        let infos = &self.infos;
        for group in self.by_base.values_mut() {
            group.sort_by(|&a, &b| infos[a].norm_path.cmp(&infos[b].norm_path));
        }
    }

    /// `KEY` when the base key is unique, otherwise `KEY#n` where `n` is the
    /// 1-based position of the path among all paths sharing that key.
    pub fn global_instance_string(&self, info: &KeyInfo) -> Result<String, KeyError> {
        let group = self
            .by_base
            .get(&info.key_string)
            .ok_or_else(|| KeyError::UnknownKey(info.key_string.clone()))?;
        let position = group
            .iter()
            .position(|&idx| self.infos[idx].norm_path == info.norm_path)
            .ok_or_else(|| KeyError::UnknownPath(info.norm_path.clone()))?;
        if group.len() == 1 {
            Ok(info.key_string.clone())
        } else {
            Ok(format!("{}#{}", info.key_string, position + 1))
        }
    }

    /// Global instance string for a tracked path.
    pub fn instance_for_path(&self, path: &str) -> Result<String, KeyError> {
        let info = self
            .get(path)
            .ok_or_else(|| KeyError::UnknownPath(normalize_path(path)))?;
        self.global_instance_string(info)
    }

    /// Inverse of [`KeyMap::global_instance_string`].
    ///
    /// A bare key resolves only when it is unique; `KEY#n` must name an
    /// existing position.
    pub fn resolve(&self, s: &str) -> Result<&KeyInfo, KeyError> {
        let (base, instance) = split_instance(s)?;
        let group = self
            .by_base
            .get(base)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| KeyError::UnknownKey(base.to_string()))?;

        match instance {
            None if group.len() == 1 => Ok(&self.infos[group[0]]),
            None => Err(KeyError::AmbiguousKey {
                key: base.to_string(),
                candidates: (1..=group.len()).map(|n| format!("{}#{}", base, n)).collect(),
            }),
            Some(n) if n >= 1 && n <= group.len() => Ok(&self.infos[group[n - 1]]),
            Some(n) => Err(KeyError::InvalidInstance {
                key: base.to_string(),
                instance: n,
                available: group.len(),
            }),
        }
    }

    /// Path for a base key, using the directory the key was referenced from to
    /// pick between colliding paths.
    pub fn path_for_key(&self, key: &str, context_dir: Option<&str>) -> Result<&str, KeyError> {
        let matches = self.infos_for_key(key);
        match matches.as_slice() {
            [] => Err(KeyError::UnknownKey(key.to_string())),
            [only] => {
                let only: &KeyInfo = only;
                Ok(only.norm_path.as_str())
            }
            many => {
                if let Some(context) = context_dir.map(normalize_path) {
                    if let Some(hit) = many
                        .iter()
                        .copied()
                        .find(|info| info.parent_path.as_deref() == Some(context.as_str()))
                    {
                        return Ok(hit.norm_path.as_str());
                    }
                    warn!(
                        "Ambiguous key '{}': no candidate is a child of '{}'",
                        key, context
                    );
                }
                Err(KeyError::AmbiguousKey {
                    key: key.to_string(),
                    candidates: many.iter().map(|info| info.norm_path.clone()).collect(),
                })
            }
        }
    }

    /// Every global instance string in canonical grid order.
    pub fn sorted_instance_strings(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .by_base
            .iter()
            .flat_map(|(base, group)| {
                let single = group.len() == 1;
                (1..=group.len()).map(move |n| {
                    if single {
                        base.clone()
                    } else {
                        format!("{}#{}", base, n)
                    }
                })
            })
            .collect();
        out.sort_by(|a, b| hierarchical_cmp(a, b));
        out
    }

    /// Records ordered by tier, then key, then path.
    pub fn sort_key_infos(&self) -> Vec<&KeyInfo> {
        let mut out: Vec<&KeyInfo> = self.infos.iter().collect();
        out.sort_by(|a, b| {
            a.tier
                .cmp(&b.tier)
                .then_with(|| hierarchical_cmp(&a.key_string, &b.key_string))
                .then_with(|| a.norm_path.cmp(&b.norm_path))
        });
        out
    }
}

fn letter_at(first: char, offset: u32) -> char {
    char::from_u32(first as u32 + offset).unwrap_or(first)
}
