//! Hierarchical keys for tracked paths.
//!
//! A key such as `1Ba2` encodes a tier (`1`), a directory letter (`B`), an
//! optional sub-directory letter (`a`) and an optional file number (`2`).
//! Distinct paths may share a base key; [`KeyMap::global_instance_string`]
//! disambiguates them with a `#n` suffix computed on demand.

pub mod key_map;
pub mod migration;
pub mod path;
pub mod registry;
pub mod scanner;

pub use key_map::KeyMap;
pub use migration::{PathMigration, PathMigrationMap};
pub use path::normalize_path;
pub use registry::KeyRegistry;
pub use scanner::{FsTree, KeyGenerator, MemoryTree, TreeEntry, TreeSource};

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::KeyError;

static BASE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[1-9]\d*[A-Z](?:[a-z](?:[1-9]\d*)?|[1-9]\d*)?$").expect("valid base key regex")
});

static INSTANCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+(?:#[0-9]+)?$").expect("valid instance regex"));

static SUBDIR_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([1-9]\d*)[A-Z]([a-z])$").expect("valid subdir key regex"));

/// Identity of one tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_string: String,
    pub norm_path: String,
    pub parent_path: Option<String>,
    pub tier: u32,
    pub is_directory: bool,
}

/// Returns true when `key` is a well formed base key (`1A`, `1Ba`, `2Aa13`).
pub fn validate_key(key: &str) -> bool {
    BASE_KEY_RE.is_match(key)
}

/// Returns true when `s` is a base key optionally followed by `#n`.
pub fn validate_instance_string(s: &str) -> bool {
    INSTANCE_RE.is_match(s)
}

/// Split `KEY#n` into its base and instance number.
pub fn split_instance(s: &str) -> Result<(&str, Option<usize>), KeyError> {
    if !validate_instance_string(s) {
        return Err(KeyError::InvalidFormat(s.to_string()));
    }
    match s.split_once('#') {
        Some((base, n)) => {
            let n = n
                .parse::<usize>()
                .map_err(|_| KeyError::InvalidFormat(s.to_string()))?;
            Ok((base, Some(n)))
        }
        None => Ok((s, None)),
    }
}

/// Tier and sub-directory letter of a `<tier><Upper><lower>` key.
pub(crate) fn parse_subdir_key(key: &str) -> Option<(u32, char)> {
    let caps = SUBDIR_KEY_RE.captures(key)?;
    let tier = caps.get(1)?.as_str().parse().ok()?;
    let letter = caps.get(2)?.as_str().chars().next()?;
    Some((tier, letter))
}

#[derive(Debug, PartialEq, Eq)]
enum Part<'a> {
    Num(&'a str),
    Text(&'a str),
}

fn split_parts(base: &str) -> Vec<Part<'_>> {
    let mut parts = Vec::new();
    let bytes = base.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let digit = bytes[start].is_ascii_digit();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() == digit {
            end += 1;
        }
        let piece = &base[start..end];
        parts.push(if digit {
            Part::Num(piece)
        } else {
            Part::Text(piece)
        });
        start = end;
    }
    parts
}

// Compares digit runs by value without parsing, so arbitrarily long runs work.
fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_base(a: &str, b: &str) -> Ordering {
    let pa = split_parts(a);
    let pb = split_parts(b);
    for (x, y) in pa.iter().zip(pb.iter()) {
        let ord = match (x, y) {
            (Part::Num(x), Part::Num(y)) => cmp_numeric(x, y),
            (Part::Text(x), Part::Text(y)) => x.cmp(y),
            (Part::Num(_), Part::Text(_)) => Ordering::Less,
            (Part::Text(_), Part::Num(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    pa.len().cmp(&pb.len()).then_with(|| a.cmp(b))
}

/// Total order over key and instance strings.
///
/// Digit runs compare numerically (`1A2` < `1A10`), a number sorts before
/// letters at the same position, a prefix sorts before its extensions and the
/// `#n` instance is the final tiebreak (a bare key counts as instance 0).
pub fn hierarchical_cmp(a: &str, b: &str) -> Ordering {
    let (base_a, inst_a) = a.split_once('#').unwrap_or((a, ""));
    let (base_b, inst_b) = b.split_once('#').unwrap_or((b, ""));
    cmp_base(base_a, base_b).then_with(|| cmp_numeric(inst_a, inst_b))
}

/// Sort keys (or instance strings) into canonical grid order.
pub fn sort_key_strings_hierarchically<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    let mut sorted: Vec<String> = keys
        .iter()
        .map(|k| k.as_ref().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    sorted.sort_by(|a, b| hierarchical_cmp(a, b));
    sorted
}
