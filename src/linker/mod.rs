//! Linkers and the load context that owns them.
//!
//! A [`Linker`] holds one package's tables and is constructed through the
//! resumable [`LinkerState`] machine. The [`LoadContext`] owns every linker,
//! the object store and the queues shared by a load pass; object creation
//! (`create_export`, `create_import`, `preload`) lives on the context because
//! resolving a reference may open and drive other packages.
//!
//! ```text
//! LoadContext
//!   ├── ObjectStore            objects, packages, classes
//!   ├── linkers[LinkerId]      one per open package
//!   ├── loaded queue           objects created this pass
//!   └── FileSystem / config
//! ```

mod export_hash;
mod export_reader;
mod loader;
mod resolve;
mod save;
mod state;

pub use export_reader::*;
pub use loader::*;
pub use save::*;
pub use state::*;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::format::PackageIndex;
use crate::names::{self, Name, NameTable};
use crate::object::{ObjectFlags, ObjectId, ObjectStore};
use crate::stream::FileSystem;
use crate::util::{Error, LoaderConfig, Result, TimeBudget};

/// Handle of a linker registered in a [`LoadContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkerId(u32);

impl LinkerId {
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LinkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "linker#{}", self.0)
    }
}

/// Single-threaded owner of the object graph and every open linker.
pub struct LoadContext {
    names: Arc<NameTable>,
    objects: ObjectStore,
    fs: Arc<dyn FileSystem>,
    config: LoaderConfig,
    linkers: Vec<Option<Linker>>,
    package_linkers: HashMap<ObjectId, LinkerId>,
    /// Objects created or touched this pass, in creation order.
    loaded: Vec<ObjectId>,
    /// Objects allocated while an async pass was active.
    constructed: Vec<ObjectId>,
    async_depth: usize,
    sync_depth: usize,
    /// References being resolved, to reject cycles.
    resolving: HashSet<(LinkerId, PackageIndex)>,
}

impl LoadContext {
    /// Context over the process-wide name table.
    pub fn new(fs: Arc<dyn FileSystem>, config: LoaderConfig) -> Self {
        Self::with_name_table(names::init_global(), fs, config)
    }

    pub fn with_name_table(names: Arc<NameTable>, fs: Arc<dyn FileSystem>, config: LoaderConfig) -> Self {
        Self {
            objects: ObjectStore::new(names.clone()),
            names,
            fs,
            config,
            linkers: Vec::new(),
            package_linkers: HashMap::new(),
            loaded: Vec::new(),
            constructed: Vec::new(),
            async_depth: 0,
            sync_depth: 0,
            resolving: HashSet::new(),
        }
    }

    #[inline]
    pub fn names(&self) -> &Arc<NameTable> {
        &self.names
    }

    #[inline]
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    #[inline]
    pub fn objects_mut(&mut self) -> &mut ObjectStore {
        &mut self.objects
    }

    #[inline]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn linker(&self, id: LinkerId) -> Option<&Linker> {
        self.linkers.get(id.index()).and_then(Option::as_ref)
    }

    pub fn linker_mut(&mut self, id: LinkerId) -> Option<&mut Linker> {
        self.linkers.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub(crate) fn require_linker(&self, id: LinkerId) -> Result<&Linker> {
        self.linker(id).ok_or_else(|| Error::other(format!("{id} was detached")))
    }

    pub(crate) fn require_linker_mut(&mut self, id: LinkerId) -> Result<&mut Linker> {
        self.linker_mut(id).ok_or_else(|| Error::other(format!("{id} was detached")))
    }

    /// Linker currently attached to a package object.
    pub fn linker_for_package(&self, package: ObjectId) -> Option<LinkerId> {
        self.package_linkers.get(&package).copied()
    }

    /// Linkers that are still attached.
    pub fn linkers(&self) -> impl Iterator<Item = &Linker> {
        self.linkers.iter().flatten()
    }

    /// Find or open the linker of a package. The linker is left in
    /// [`LinkerState::LoaderOpened`]; tick it to construct its tables.
    pub fn get_package_linker(&mut self, package_name: &str) -> Result<LinkerId> {
        let name = self.names.try_intern(package_name)?;
        if let Some(id) = self.objects.find_package(name).and_then(|p| self.linker_for_package(p)) {
            return Ok(id);
        }
        let filename = self
            .fs
            .resolve(package_name)
            .ok_or_else(|| Error::PackageNotFound(package_name.to_string()))?;
        let package = self.objects.create_package(name);
        let id = LinkerId::from_index(self.linkers.len());
        let core = self.objects.core_names();
        let linker = Linker::open(id, name, package, filename, (core.core, core.class), self.fs.as_ref(), &self.config)?;
        tracing::info!(package = package_name, file = %linker.filename().display(), %id, "opening package");
        self.linkers.push(Some(linker));
        self.package_linkers.insert(package, id);
        Ok(id)
    }

    /// Tick a linker's construction. A fatal error detaches the linker.
    pub fn tick_linker(&mut self, id: LinkerId, budget: &mut TimeBudget) -> Result<Progress> {
        let Self { linkers, objects, names, config, .. } = &mut *self;
        let linker = linkers
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::other(format!("{id} was detached")))?;
        let mut env = LinkerEnv { names: &**names, config: &*config, objects };
        let result = linker.tick(&mut env, budget);
        match result {
            Ok(progress) => Ok(progress),
            Err(e) => {
                if e.is_fatal_for_loader() {
                    tracing::error!(%id, error = %e, "linker failed");
                    self.detach_linker(id);
                }
                Err(e)
            }
        }
    }

    /// Drive a linker to [`LinkerState::Finalized`] without a time limit.
    pub fn finish_linker(&mut self, id: LinkerId) -> Result<()> {
        let mut budget = TimeBudget::unlimited();
        while !self.tick_linker(id, &mut budget)?.is_complete() {
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Forget a linker: exports lose their handles and objects their
    /// association; the objects themselves stay alive.
    pub fn detach_linker(&mut self, id: LinkerId) {
        let Some(linker) = self.linkers.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        for export in &linker.exports {
            let Some(object) = export.object else { continue };
            if let Some(record) = self.objects.get_mut(object) {
                if record.linker.is_some_and(|(owner, _)| owner == id) {
                    record.linker = None;
                }
            }
        }
        for other in self.linkers.iter_mut().flatten() {
            for import in &mut other.imports {
                if import.source_linker == Some(id) {
                    import.source_linker = None;
                    import.source_index = None;
                }
            }
        }
        self.package_linkers.retain(|_, linker| *linker != id);
        self.resolving.retain(|(linker, _)| *linker != id);
        tracing::debug!(%id, package = %self.names.resolve(linker.package_name()), "linker detached");
    }

    /// Synchronously load a whole package: construct its linker, create and
    /// preload every export, then run post-load to a fixed point.
    #[tracing::instrument(skip(self))]
    pub fn load_package(&mut self, package_name: &str) -> Result<ObjectId> {
        let id = self.get_package_linker(package_name)?;
        let result = self.load_linker_now(id);
        if let Err(e) = &result {
            if e.is_fatal_for_loader() {
                self.detach_linker(id);
            }
        }
        result
    }

    fn load_linker_now(&mut self, id: LinkerId) -> Result<ObjectId> {
        // Entries before `start` belong to an enclosing pass
        let start = self.loaded.len();
        self.sync_depth += 1;
        let result = self.run_sync_pass(id, start);
        self.sync_depth -= 1;
        if result.is_err() {
            self.loaded.truncate(start);
        }
        result
    }

    fn run_sync_pass(&mut self, id: LinkerId, start: usize) -> Result<ObjectId> {
        self.finish_linker(id)?;
        let count = self.require_linker(id)?.exports().len();
        for i in 0..count {
            if let Some(object) = self.create_export(id, i)? {
                self.preload(object)?;
            }
        }
        let mut cursor = start;
        loop {
            while cursor < self.loaded.len() {
                let object = self.loaded[cursor];
                cursor += 1;
                self.preload(object)?;
            }
            if !self.post_load_pending(start)? {
                break;
            }
        }
        self.loaded.truncate(start);
        let package = self.require_linker(id)?.package();
        if let Some(info) = self.objects.package_info_mut(package) {
            info.fully_loaded = true;
        }
        tracing::info!(package = %self.objects.path_name(package), objects = self.objects.len(), "package loaded");
        Ok(package)
    }

    /// Run post-load on queued objects that still need it. Returns whether
    /// any hook ran, since hooks may queue more objects.
    fn post_load_pending(&mut self, start: usize) -> Result<bool> {
        let mut ran = false;
        let mut cursor = start;
        while cursor < self.loaded.len() {
            let object = self.loaded[cursor];
            cursor += 1;
            ran |= self.post_load(object)?;
        }
        Ok(ran)
    }

    /// Load a package and find an object in it by dotted path.
    pub fn load_object(&mut self, path: &str) -> Result<ObjectId> {
        let package = path.split('.').next().unwrap_or(path);
        self.load_package(package)?;
        self.objects
            .find_by_path(path)
            .ok_or_else(|| Error::other(format!("{path} not found after loading {package}")))
    }

    /// Construct an object from code while a load pass runs. It has no serial
    /// data and joins the pass's post-load queue; outside a pass its
    /// post-load hook runs immediately.
    pub fn construct_object(&mut self, name: Name, outer: Option<ObjectId>, class: ObjectId) -> Result<ObjectId> {
        let mut flags = ObjectFlags::NEED_POST_LOAD;
        if self.is_async_loading() {
            flags |= ObjectFlags::ASYNC_LOADING;
        }
        let object = self.objects.allocate(name, outer, Some(class), flags);
        if self.is_async_loading() {
            self.constructed.push(object);
        }
        if self.is_async_loading() || self.sync_depth > 0 {
            self.loaded.push(object);
        } else {
            self.post_load(object)?;
        }
        Ok(object)
    }

    /// Objects queued for preload and post-load this pass.
    pub fn loaded_queue(&self) -> &[ObjectId] {
        &self.loaded
    }

    pub(crate) fn clear_loaded_queue(&mut self) {
        self.loaded.clear();
    }

    pub(crate) fn begin_async(&mut self) {
        self.async_depth += 1;
    }

    pub(crate) fn end_async(&mut self) {
        self.async_depth = self.async_depth.saturating_sub(1);
    }

    #[inline]
    pub fn is_async_loading(&self) -> bool {
        self.async_depth > 0
    }

    /// Clear `ASYNC_LOADING` on everything constructed since the last call.
    pub(crate) fn finish_constructed(&mut self) -> usize {
        let constructed = std::mem::take(&mut self.constructed);
        for &object in &constructed {
            if let Some(record) = self.objects.get_mut(object) {
                record.flags.remove(ObjectFlags::ASYNC_LOADING);
            }
        }
        constructed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PackageBuilder;
    use crate::stream::MemoryFileSystem;

    #[test]
    fn test_linker_id_display() {
        assert_eq!(LinkerId::from_index(3).to_string(), "linker#3");
    }

    #[test]
    fn test_missing_package() {
        let names = Arc::new(NameTable::new());
        let fs = Arc::new(MemoryFileSystem::new());
        let mut cx = LoadContext::with_name_table(names.clone(), fs, LoaderConfig::default());
        let count = cx.objects().len();
        assert!(matches!(cx.get_package_linker("Nowhere"), Err(Error::PackageNotFound(_))));
        assert!(cx.objects().find_package(names.intern_or_add("Nowhere")).is_none());
        assert_eq!(cx.objects().len(), count);
    }

    #[test]
    fn test_linker_reused_per_package() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert_package("Empty", PackageBuilder::new().build().unwrap());
        let mut cx = LoadContext::with_name_table(Arc::new(NameTable::new()), fs, LoaderConfig::default());
        let a = cx.get_package_linker("Empty").unwrap();
        let b = cx.get_package_linker("EMPTY").unwrap();
        assert_eq!(a, b);
        cx.finish_linker(a).unwrap();
        assert!(cx.linker(a).unwrap().is_finalized());

        cx.detach_linker(a);
        assert!(cx.linker(a).is_none());
        let c = cx.get_package_linker("Empty").unwrap();
        assert_ne!(a, c);
    }
}
