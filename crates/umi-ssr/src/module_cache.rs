//! In-process cache of loaded server modules and its invalidator.

use crate::builder::WrittenModule;
use crate::interceptor::RenderHandler;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Loaded render handlers keyed by module path.
///
/// Every invalidation advances the path's generation. A loader that read the
/// file before an invalidation holds a stale generation and cannot cache its
/// handler, see [`ModuleCache::insert_if_current`].
#[derive(Default)]
pub struct ModuleCache {
    entries: RwLock<Entries>,
}

#[derive(Default)]
struct Entries {
    handlers: HashMap<PathBuf, Arc<dyn RenderHandler>>,
    invalidated_at: HashMap<PathBuf, u64>,
    cleared_at: u64,
    clock: u64,
}

impl Entries {
    fn generation(&self, path: &Path) -> u64 {
        self.invalidated_at
            .get(path)
            .copied()
            .unwrap_or(0)
            .max(self.cleared_at)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl ModuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Arc<dyn RenderHandler>> {
        self.read().handlers.get(path).cloned()
    }

    /// Current generation of `path`. Take it before reading the module file.
    #[must_use]
    pub fn generation(&self, path: &Path) -> u64 {
        self.read().generation(path)
    }

    pub fn insert(&self, path: PathBuf, handler: Arc<dyn RenderHandler>) {
        debug!(path = %path.display(), "Server module cached");
        self.write().handlers.insert(path, handler);
    }

    /// Cache `handler` unless `path` was invalidated since `generation` was
    /// taken. Returns whether it was cached.
    pub fn insert_if_current(
        &self,
        path: PathBuf,
        generation: u64,
        handler: Arc<dyn RenderHandler>,
    ) -> bool {
        let mut entries = self.write();
        if entries.generation(&path) != generation {
            debug!(path = %path.display(), "Server module invalidated while loading, not cached");
            return false;
        }
        debug!(path = %path.display(), "Server module cached");
        entries.handlers.insert(path, handler);
        true
    }

    /// Evict one entry and advance its generation. Returns whether it was cached.
    pub fn invalidate(&self, path: &Path) -> bool {
        let mut entries = self.write();
        let now = entries.tick();
        entries.invalidated_at.insert(path.to_path_buf(), now);
        entries.handlers.remove(path).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.write();
        let now = entries.tick();
        entries.cleared_at = now;
        entries.handlers.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("len", &self.len())
            .finish()
    }
}

/// Evicts rebuilt modules so the next request loads the new file.
#[derive(Debug, Clone)]
pub struct ModuleCacheInvalidator {
    cache: Arc<ModuleCache>,
}

impl ModuleCacheInvalidator {
    pub fn new(cache: Arc<ModuleCache>) -> Self {
        Self { cache }
    }

    /// Evict the module that was just written.
    pub fn invalidate(&self, written: &WrittenModule) -> bool {
        let evicted = self.cache.invalidate(written.path());
        debug!(
            path = %written.path().display(),
            digest = written.digest(),
            evicted,
            "Server module invalidated"
        );
        evicted
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }
}
