use std::convert::Infallible;
use std::sync::Arc;

use depgrid_cache::{Cache, CacheError, CacheRegistry};
use sha2::{Digest, Sha256};

use crate::grid::{DependencyMap, Grid, GridAxis, GridError, GridValidation};
use crate::rle::{self, RleError};
use crate::DependencyChar;

pub const DECOMPRESS_NAMESPACE: &str = "grid_decompress";
pub const VALIDATION_NAMESPACE: &str = "grid_validation";
pub const DEPENDENCIES_NAMESPACE: &str = "grid_dependencies";

fn hash_axis(hasher: &mut Sha256, axis: &GridAxis) {
    for key in axis.keys() {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([0xffu8]);
}

/// SHA-256 over the axis and every row, hex encoded. Any edit to either
/// yields a different fingerprint.
pub fn grid_fingerprint(grid: &Grid, axis: &GridAxis) -> String {
    let mut hasher = Sha256::new();
    hash_axis(&mut hasher, axis);
    for (key, row) in grid.rows() {
        hasher.update(key.as_bytes());
        hasher.update([b'=']);
        hasher.update(row.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 over the axis and one encoded row. Edits to other rows leave it
/// unchanged.
pub fn row_fingerprint(key: &str, row: &str, axis: &GridAxis) -> String {
    let mut hasher = Sha256::new();
    hash_axis(&mut hasher, axis);
    hasher.update(key.as_bytes());
    hasher.update([b'=']);
    hasher.update(row.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Grid operations memoized in registry namespaces.
#[derive(Debug, Clone)]
pub struct CachedGrid {
    rows: Arc<Cache<String, Vec<DependencyChar>>>,
    validations: Arc<Cache<String, GridValidation>>,
    dependencies: Arc<Cache<String, Vec<(DependencyChar, Vec<String>)>>>,
}

impl CachedGrid {
    pub fn new(registry: &CacheRegistry) -> Result<Self, CacheError> {
        Ok(Self {
            rows: registry.get_or_create(DECOMPRESS_NAMESPACE)?,
            validations: registry.get_or_create(VALIDATION_NAMESPACE)?,
            dependencies: registry.get_or_create(DEPENDENCIES_NAMESPACE)?,
        })
    }

    /// [`rle::decompress`] through the `grid_decompress` namespace. Decode
    /// errors are not cached.
    pub fn decompress(&self, row: &str) -> Result<Vec<DependencyChar>, RleError> {
        self.rows
            .get_or_compute(format!("decompress:{}", row), || rle::decompress(row))
    }

    /// [`Grid::validate`] through the `grid_validation` namespace.
    pub fn validate(&self, grid: &Grid, axis: &GridAxis) -> GridValidation {
        let key = format!("validate_grid:{}", grid_fingerprint(grid, axis));
        self.validations
            .get_or_compute(key, || Ok::<_, Infallible>(grid.validate(axis)))
            .unwrap_or_else(|never| match never {})
    }

    /// [`Grid::dependencies`] through the `grid_dependencies` namespace.
    pub fn dependencies(
        &self,
        grid: &Grid,
        key: &str,
        axis: &GridAxis,
    ) -> Result<DependencyMap, GridError> {
        if !axis.contains(key) {
            return Err(GridError::UnknownKey(key.to_string()));
        }
        let row = grid
            .row(key)
            .ok_or_else(|| GridError::MissingRow(key.to_string()))?;
        let cache_key = format!("dependencies:{}", row_fingerprint(key, row, axis));
        let grouped = self.dependencies.get_or_compute(cache_key, || {
            grid.dependencies(key, axis)
                .map(|deps| deps.into_iter().collect::<Vec<_>>())
        })?;
        Ok(grouped.into_iter().collect())
    }

    pub fn row_cache(&self) -> &Arc<Cache<String, Vec<DependencyChar>>> {
        &self.rows
    }
}
