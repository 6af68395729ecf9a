//! Dependency grids and tracker aggregation.
//!
//! A grid is a square matrix of [`DependencyChar`] cells over the
//! hierarchically sorted keys of a project, stored as run-length compressed
//! rows. Trackers persist partial grids; [`Aggregator`] merges them into one
//! set of project-wide links.

pub mod aggregate;
pub mod cached;
pub mod dependency;
pub mod grid;
pub mod rle;

pub use aggregate::{
    aggregate, AggregatedLink, AggregatedLinks, AggregationReport, Aggregator, KeyDefinition,
    LinkAccumulator, LocalLinks, SkippedSnapshot, TrackerSnapshot,
};
pub use cached::{grid_fingerprint, row_fingerprint, CachedGrid};
pub use dependency::{DependencyChar, InvalidDependencyChar};
pub use grid::{DependencyMap, Grid, GridAxis, GridError, GridValidation};
pub use rle::{compress, decompress, get_char_at, RleError};
