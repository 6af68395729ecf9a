use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use depgrid_core::{sort_key_strings_hierarchically, DepGridError, KeyError, KeyMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::rle::{self, RleError};
use crate::DependencyChar;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("malformed row '{row}': {source}")]
    Format {
        row: String,
        #[source]
        source: RleError,
    },

    #[error("key '{0}' is not on the grid axis")]
    UnknownKey(String),

    #[error("key '{0}' appears twice on the grid axis")]
    DuplicateKey(String),

    #[error("grid has no row for '{0}'")]
    MissingRow(String),

    #[error("row '{row}' has {actual} cells, expected {expected}")]
    RowLength {
        row: String,
        expected: usize,
        actual: usize,
    },

    #[error("cell ({key}, {key}) is the diagonal and must stay 'o'")]
    Diagonal { key: String },

    #[error("'{0}' is not a dependency character")]
    NotADependency(DependencyChar),

    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

impl From<GridError> for DepGridError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::Key(e) => DepGridError::Key(e),
            other => DepGridError::Grid(other.to_string()),
        }
    }
}

fn decode_exact(key: &str, row: &str, len: usize) -> Result<Vec<DependencyChar>, GridError> {
    rle::decompress_exact(row, len).map_err(|source| match source {
        RleError::LengthMismatch { expected, actual } => GridError::RowLength {
            row: key.to_string(),
            expected,
            actual,
        },
        source => GridError::Format {
            row: key.to_string(),
            source,
        },
    })
}

/// Ordered row/column keys of a grid with O(1) position lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridAxis {
    keys: Vec<String>,
    positions: HashMap<String, usize>,
}

impl GridAxis {
    /// Axis over keys that are already in grid order.
    pub fn new(keys: Vec<String>) -> Result<Self, GridError> {
        let mut positions = HashMap::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            if positions.insert(key.clone(), i).is_some() {
                return Err(GridError::DuplicateKey(key.clone()));
            }
        }
        Ok(Self { keys, positions })
    }

    /// Axis in canonical hierarchical order.
    pub fn sorted<S: AsRef<str>>(keys: &[S]) -> Result<Self, GridError> {
        Self::new(sort_key_strings_hierarchically(keys))
    }

    /// Axis over every global instance string of `map`.
    pub fn from_key_map(map: &KeyMap) -> Result<Self, GridError> {
        Self::new(map.sorted_instance_strings())
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    fn require(&self, key: &str) -> Result<usize, GridError> {
        self.position(key)
            .ok_or_else(|| GridError::UnknownKey(key.to_string()))
    }
}

/// Outcome of [`Grid::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridValidation {
    pub valid: bool,
    pub diagnostics: Vec<String>,
}

/// Dependencies of one row grouped by character.
pub type DependencyMap = BTreeMap<DependencyChar, Vec<String>>;

/// Compressed rows keyed by row key.
///
/// Rows are shared between clones; every edit returns a new grid and leaves
/// earlier snapshots untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    rows: HashMap<String, Arc<str>>,
}

impl Grid {
    /// Placeholder grid: `o` on the diagonal, `p` everywhere else.
    pub fn create(axis: &GridAxis) -> Self {
        let n = axis.len();
        let mut rows = HashMap::with_capacity(n);
        let mut cells = vec![DependencyChar::Placeholder; n];
        for (i, key) in axis.keys().iter().enumerate() {
            cells[i] = DependencyChar::Diagonal;
            rows.insert(key.clone(), Arc::from(rle::compress(&cells)));
            cells[i] = DependencyChar::Placeholder;
        }
        debug!("Created grid with {} rows", n);
        Self { rows }
    }

    /// Grid from already-compressed rows; nothing is validated.
    pub fn from_rows<I, K, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = (K, R)>,
        K: Into<String>,
        R: AsRef<str>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|(k, r)| (k.into(), Arc::from(r.as_ref())))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, key: &str) -> Option<&str> {
        self.rows.get(key).map(|r| r.as_ref())
    }

    /// Rows in key order.
    pub fn rows(&self) -> Vec<(&str, &str)> {
        let mut rows: Vec<(&str, &str)> = self
            .rows
            .iter()
            .map(|(k, r)| (k.as_str(), r.as_ref()))
            .collect();
        rows.sort_unstable_by(|a, b| a.0.cmp(b.0));
        rows
    }

    /// Decode `key`'s row, which must span `axis`. A row of the wrong
    /// length is rejected before it is expanded.
    pub fn decode_row(&self, key: &str, axis: &GridAxis) -> Result<Vec<DependencyChar>, GridError> {
        let row = self
            .row(key)
            .ok_or_else(|| GridError::MissingRow(key.to_string()))?;
        decode_exact(key, row, axis.len())
    }

    /// Check the grid against `axis`: one row per key and no others, every
    /// row decodes to `axis.len()` known characters, `o` on the diagonal.
    ///
    /// Never fails; every problem found is reported as a diagnostic.
    pub fn validate(&self, axis: &GridAxis) -> GridValidation {
        let mut diagnostics = Vec::new();

        let mut extra: Vec<&str> = self
            .rows
            .keys()
            .filter(|k| !axis.contains(k))
            .map(String::as_str)
            .collect();
        extra.sort_unstable();
        for key in extra {
            diagnostics.push(format!("row '{}' is not on the grid axis", key));
        }

        for (i, key) in axis.keys().iter().enumerate() {
            let Some(row) = self.row(key) else {
                diagnostics.push(format!("missing row for '{}'", key));
                continue;
            };
            let cells = match decode_exact(key, row, axis.len()) {
                Ok(cells) => cells,
                Err(e @ GridError::RowLength { .. }) => {
                    diagnostics.push(e.to_string());
                    continue;
                }
                Err(e) => {
                    diagnostics.push(format!("row '{}' does not decode: {}", key, e));
                    continue;
                }
            };
            if cells[i] != DependencyChar::Diagonal {
                diagnostics.push(format!(
                    "row '{}' has '{}' on the diagonal",
                    key, cells[i]
                ));
            }
        }

        let valid = diagnostics.is_empty();
        if !valid {
            warn!(
                "Grid validation failed with {} problem(s); first: {}",
                diagnostics.len(),
                diagnostics[0]
            );
        }
        GridValidation { valid, diagnostics }
    }

    /// Other keys that `key`'s row records something about, grouped by
    /// character. Diagonal, placeholder and unset cells are left out.
    pub fn dependencies(&self, key: &str, axis: &GridAxis) -> Result<DependencyMap, GridError> {
        let own = axis.require(key)?;
        let cells = self.decode_row(key, axis)?;

        let mut out = DependencyMap::new();
        for (i, ch) in cells.into_iter().enumerate() {
            if i == own || !ch.is_observation() {
                continue;
            }
            out.entry(ch).or_default().push(axis.keys()[i].clone());
        }
        Ok(out)
    }

    /// Cell value for `(row_key, col_key)`.
    pub fn char_at(
        &self,
        row_key: &str,
        col_key: &str,
        axis: &GridAxis,
    ) -> Result<DependencyChar, GridError> {
        let col = axis.require(col_key)?;
        let row = self
            .row(row_key)
            .ok_or_else(|| GridError::MissingRow(row_key.to_string()))?;
        rle::get_char_at(row, col).map_err(|source| GridError::Format {
            row: row_key.to_string(),
            source,
        })
    }

    /// New grid with one cell replaced. Only the edited row is re-encoded.
    pub fn set_char_at(
        &self,
        row_key: &str,
        col_key: &str,
        ch: DependencyChar,
        axis: &GridAxis,
    ) -> Result<Grid, GridError> {
        let row_pos = axis.require(row_key)?;
        let col_pos = axis.require(col_key)?;
        if (row_pos == col_pos) != (ch == DependencyChar::Diagonal) {
            return Err(if row_pos == col_pos {
                GridError::Diagonal {
                    key: row_key.to_string(),
                }
            } else {
                GridError::NotADependency(ch)
            });
        }

        let mut cells = self.decode_row(row_key, axis)?;
        cells[col_pos] = ch;

        let mut next = self.clone();
        next.rows
            .insert(row_key.to_string(), Arc::from(rle::compress(&cells)));
        Ok(next)
    }

    /// Record `row_key -> col_key` as `ch`.
    pub fn add_dependency(
        &self,
        row_key: &str,
        col_key: &str,
        ch: DependencyChar,
        axis: &GridAxis,
    ) -> Result<Grid, GridError> {
        if row_key == col_key {
            return Err(GridError::Diagonal {
                key: row_key.to_string(),
            });
        }
        if matches!(ch, DependencyChar::Diagonal | DependencyChar::Unset) {
            return Err(GridError::NotADependency(ch));
        }
        self.set_char_at(row_key, col_key, ch, axis)
    }

    /// Clear the cell back to the unset marker.
    pub fn remove_dependency(
        &self,
        row_key: &str,
        col_key: &str,
        axis: &GridAxis,
    ) -> Result<Grid, GridError> {
        if row_key == col_key {
            return Err(GridError::Diagonal {
                key: row_key.to_string(),
            });
        }
        self.set_char_at(row_key, col_key, DependencyChar::Unset, axis)
    }

    /// `X k1 k2 ..` header followed by one `key = row` line per axis key.
    pub fn format_for_display(&self, axis: &GridAxis) -> String {
        let mut out = String::from("X");
        for key in axis.keys() {
            out.push(' ');
            out.push_str(key);
        }
        out.push('\n');
        for key in axis.keys() {
            let _ = writeln!(out, "{} = {}", key, self.row(key).unwrap_or(""));
        }
        out
    }
}
