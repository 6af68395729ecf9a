use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::{CacheError, Result};

/// One stored entry. Values are kept as JSON until the namespace is opened
/// with a concrete type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub value: serde_json::Value,
    /// Remaining lifetime at flush time; `None` never expires.
    #[serde(default)]
    pub ttl_remaining_ms: Option<u64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// On-disk form of a namespace (`<dir>/<namespace>.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedNamespace {
    /// Entries in least recently used first order.
    pub entries: Vec<(String, PersistedEntry)>,
    /// Dependency edges, `dependency -> dependents`, for reference when
    /// inspecting a file by hand.
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl PersistedNamespace {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) fn namespace_file(dir: &Path, namespace: &str) -> PathBuf {
    dir.join(format!("{}.json", namespace))
}

/// Load every `*.json` namespace file in `dir`.
///
/// Empty or corrupt files are deleted and logged; they never fail the load.
pub(crate) fn load_dir(dir: &Path) -> Result<Vec<(String, PersistedNamespace)>> {
    fs::create_dir_all(dir).map_err(|source| CacheError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let listing = fs::read_dir(dir).map_err(|source| CacheError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut out = Vec::new();
    for entry in listing.flatten() {
        let path = entry.path();
        let Some(name) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".json"))
            .map(str::to_string)
        else {
            continue;
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to load cache {} from {:?}: {}", name, path, e);
                continue;
            }
        };
        if text.trim().is_empty() {
            warn!("Cache file {:?} is empty. Deleting it.", path);
            remove_quietly(&path);
            continue;
        }
        match serde_json::from_str::<PersistedNamespace>(&text) {
            Ok(ns) => {
                debug!("Loaded persistent cache: {} ({} entries)", name, ns.entries.len());
                out.push((name, ns));
            }
            Err(e) => {
                error!(
                    "Failed to decode JSON from {:?}: {}. Deleting corrupt cache file.",
                    path, e
                );
                remove_quietly(&path);
            }
        }
    }
    Ok(out)
}

/// Write `ns` atomically: a uniquely named temp file renamed over the target.
/// An empty namespace removes the file instead.
pub(crate) fn write_namespace(dir: &Path, namespace: &str, ns: &PersistedNamespace) -> Result<()> {
    let target = namespace_file(dir, namespace);
    if ns.is_empty() {
        if target.exists() {
            remove_quietly(&target);
        }
        return Ok(());
    }

    let temp = dir.join(format!("{}.json.{}.tmp", namespace, uuid::Uuid::new_v4()));
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| CacheError::Io { path, source }
    };

    let result = (|| -> Result<()> {
        let bytes = serde_json::to_vec(ns)?;
        let mut file = fs::File::create(&temp).map_err(io_err(&temp))?;
        file.write_all(&bytes).map_err(io_err(&temp))?;
        file.sync_all().map_err(io_err(&temp))?;
        fs::rename(&temp, &target).map_err(io_err(&target))?;
        Ok(())
    })();

    if result.is_err() && temp.exists() {
        remove_quietly(&temp);
    }
    result
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        error!("Error removing cache file {:?}: {}", path, e);
    }
}
