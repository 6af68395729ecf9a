use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

use super::{KeyGenerator, KeyMap, PathMigrationMap, TreeSource};
use crate::KeyError;

/// Shared handle to the current key map.
///
/// Readers take an `Arc<KeyMap>` snapshot and keep using it for as long as
/// they like; writers build a new map and publish it atomically. Writers are
/// serialized so that concurrent `update` calls never lose each other's edits.
#[derive(Debug)]
pub struct KeyRegistry {
    current: ArcSwap<KeyMap>,
    generator: KeyGenerator,
    writer: Mutex<()>,
}

impl KeyRegistry {
    pub fn new(generator: KeyGenerator) -> Self {
        Self::with_map(generator, KeyMap::new())
    }

    pub fn with_map(generator: KeyGenerator, map: KeyMap) -> Self {
        Self {
            current: ArcSwap::from_pointee(map),
            generator,
            writer: Mutex::new(()),
        }
    }

    /// Snapshot of the current map.
    pub fn load(&self) -> Arc<KeyMap> {
        self.current.load_full()
    }

    /// Publish `map`, returning the map it replaced.
    pub fn replace(&self, map: KeyMap) -> Arc<KeyMap> {
        let _guard = self.writer.lock();
        self.current.swap(Arc::new(map))
    }

    /// Apply `edit` to a copy of the current map and publish the copy.
    ///
    /// Nothing is published when `edit` fails.
    pub fn update<T>(
        &self,
        edit: impl FnOnce(&mut KeyMap) -> Result<T, KeyError>,
    ) -> Result<T, KeyError> {
        let _guard = self.writer.lock();
        let mut next = KeyMap::clone(&self.current.load());
        let out = edit(&mut next)?;
        self.current.store(Arc::new(next));
        Ok(out)
    }

    /// Regenerate keys for `roots`, publish the result and report how every
    /// path's key moved.
    pub fn rescan<S: AsRef<str>>(
        &self,
        roots: &[S],
        tree: &dyn TreeSource,
    ) -> Result<PathMigrationMap, KeyError> {
        let _guard = self.writer.lock();
        let next = self.generator.generate(roots, tree)?;
        let previous = self.current.load_full();
        let migration = PathMigrationMap::between(&previous, &next);
        info!(
            "Rescan produced {} key(s); {} path(s) changed",
            next.len(),
            migration.changed().count()
        );
        self.current.store(Arc::new(next));
        Ok(migration)
    }
}
