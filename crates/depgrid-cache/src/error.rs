use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid invalidation pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("cache namespace '{namespace}' already holds values of another type (requested {requested})")]
    TypeMismatch {
        namespace: String,
        requested: &'static str,
    },

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl From<CacheError> for depgrid_core::DepGridError {
    fn from(err: CacheError) -> Self {
        depgrid_core::DepGridError::Cache(err.to_string())
    }
}
