pub mod config;
pub mod error;
pub mod keys;
pub mod logging;

pub use config::*;
pub use error::*;
pub use keys::{
    hierarchical_cmp, normalize_path, sort_key_strings_hierarchically, split_instance,
    validate_instance_string, validate_key, FsTree, KeyGenerator, KeyInfo, KeyMap, KeyRegistry,
    MemoryTree, PathMigration, PathMigrationMap, TreeEntry, TreeSource,
};
pub use logging::init_tracing;
