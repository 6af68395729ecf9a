use thiserror::Error;

/// Failures raised by the key manager.
///
/// All of these are recoverable: a failed lookup or assignment never leaves the
/// map it was performed against in a modified state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key format: '{0}'")]
    InvalidFormat(String),

    #[error("key '{0}' is not present in the key map")]
    UnknownKey(String),

    #[error("path '{0}' has no key")]
    UnknownPath(String),

    #[error("key '{key}' is ambiguous; use one of {candidates:?}")]
    AmbiguousKey {
        key: String,
        candidates: Vec<String>,
    },

    #[error("instance #{instance} of key '{key}' is out of range (1..={available})")]
    InvalidInstance {
        key: String,
        instance: usize,
        available: usize,
    },

    #[error("parent directory '{parent}' of '{path}' is not tracked")]
    UntrackedParent { path: String, parent: String },

    #[error("more than 26 {kind} under '{parent}' (while keying '{path}')")]
    TooManyChildren {
        kind: &'static str,
        parent: String,
        path: String,
    },

    #[error("failed to list directory '{path}': {reason}")]
    Scan { path: String, reason: String },

    #[error("invalid exclusion pattern '{pattern}': {reason}")]
    InvalidExclusion { pattern: String, reason: String },
}

/// Umbrella error for callers that drive several layers at once.
#[derive(Error, Debug)]
pub enum DepGridError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Grid error: {0}")]
    Grid(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

pub type Result<T> = std::result::Result<T, DepGridError>;
