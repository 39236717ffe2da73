//! One package request moving through the async phases.

use std::time::Instant;

use sha2::{Digest, Sha256};
use smallvec::SmallVec;

use super::{AsyncPhase, LoadCallback};
use crate::linker::{LinkerId, LoadContext, Progress};
use crate::object::ObjectId;
use crate::stream::{dispatch, ByteSource, Completion};
use crate::util::{Error, Result, TimeBudget};

/// Bytes hashed per read while verifying a file.
const HASH_READ_SIZE: usize = 1 << 20;

enum Step {
    Unit,
    Waiting,
    Done,
}

/// State of one queued package load.
pub struct AsyncPackage {
    name: String,
    linker: Option<LinkerId>,
    package: Option<ObjectId>,
    phase: AsyncPhase,
    cursor: usize,
    preload_cursor: usize,
    post_load_cursor: usize,
    callbacks: SmallVec<[LoadCallback; 1]>,
    expected_hash: Option<[u8; 32]>,
    verification: Option<Completion<[u8; 32]>>,
    ticks: u64,
    started: Option<Instant>,
}

impl AsyncPackage {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            linker: None,
            package: None,
            phase: AsyncPhase::CreateLoader,
            cursor: 0,
            preload_cursor: 0,
            post_load_cursor: 0,
            callbacks: SmallVec::new(),
            expected_hash: None,
            verification: None,
            ticks: 0,
            started: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn phase(&self) -> AsyncPhase {
        self.phase
    }

    #[inline]
    pub fn linker(&self) -> Option<LinkerId> {
        self.linker
    }

    /// Package object, once the loader exists.
    #[inline]
    pub fn package(&self) -> Option<ObjectId> {
        self.package
    }

    /// Ticks this package received.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub(crate) fn add_callback(&mut self, callback: LoadCallback) {
        self.callbacks.push(callback);
    }

    pub(crate) fn set_expected_hash(&mut self, digest: [u8; 32]) {
        self.expected_hash = Some(digest);
    }

    /// Load progress in `[0, 100]`.
    pub fn percentage(&self, cx: &LoadContext) -> f32 {
        let linker = self.linker.and_then(|id| cx.linker(id));
        let ratio = |done: usize, total: usize| if total == 0 { 0.0 } else { (done as f32 / total as f32).min(1.0) };
        let within = match self.phase {
            AsyncPhase::CreateLoader | AsyncPhase::FinishObjects => 0.0,
            AsyncPhase::FinishLoader => linker.map_or(0.0, |l| l.construction_fraction()),
            AsyncPhase::CreateImports => linker.map_or(0.0, |l| ratio(self.cursor, l.imports().len())),
            AsyncPhase::CreateExports => linker.map_or(0.0, |l| ratio(self.cursor, l.exports().len())),
            AsyncPhase::PreloadQueuedObjects => ratio(self.preload_cursor, cx.loaded_queue().len()),
            AsyncPhase::PostLoadObjects => ratio(self.post_load_cursor, cx.loaded_queue().len()),
        };
        self.phase.completed_weight() + self.phase.weight() * within
    }

    /// Advance through the phases until done, out of budget or waiting.
    ///
    /// Packages this one imports from are appended to `requests`.
    pub(crate) fn tick(
        &mut self,
        cx: &mut LoadContext,
        budget: &mut TimeBudget,
        requests: &mut Vec<String>,
    ) -> Result<Progress> {
        self.ticks += 1;
        loop {
            let step = match self.phase {
                AsyncPhase::CreateLoader => self.create_loader(cx)?,
                AsyncPhase::FinishLoader => self.finish_loader(cx, budget)?,
                AsyncPhase::CreateImports => self.create_imports(cx, budget, requests)?,
                AsyncPhase::CreateExports => self.create_exports(cx)?,
                AsyncPhase::PreloadQueuedObjects => self.preload_queued(cx)?,
                AsyncPhase::PostLoadObjects => self.post_load_queued(cx)?,
                AsyncPhase::FinishObjects => self.finish_objects(cx)?,
            };
            match step {
                Step::Done => return Ok(Progress::Complete),
                Step::Waiting => return Ok(Progress::Pending),
                Step::Unit => {
                    if budget.consume_unit() {
                        return Ok(Progress::Pending);
                    }
                }
            }
        }
    }

    fn advance(&mut self, next: AsyncPhase) {
        tracing::debug!(package = %self.name, from = %self.phase, to = %next, "async phase");
        self.phase = next;
        self.cursor = 0;
    }

    fn linker_id(&self) -> Result<LinkerId> {
        self.linker.ok_or_else(|| Error::other(format!("{}: no loader created", self.name)))
    }

    fn create_loader(&mut self, cx: &mut LoadContext) -> Result<Step> {
        self.started = Some(Instant::now());
        let id = cx.get_package_linker(&self.name)?;
        let linker = cx.require_linker(id)?;
        self.linker = Some(id);
        self.package = Some(linker.package());
        if self.expected_hash.is_some() {
            let source = cx.file_system().open(linker.filename())?;
            self.verification = Some(dispatch(cx.config().io_mode, move || hash_source(source.as_ref())));
        }
        tracing::info!(package = %self.name, file = %linker.filename().display(), "async load started");
        self.advance(AsyncPhase::FinishLoader);
        Ok(Step::Unit)
    }

    fn finish_loader(&mut self, cx: &mut LoadContext, budget: &mut TimeBudget) -> Result<Step> {
        match cx.tick_linker(self.linker_id()?, budget)? {
            Progress::Complete => {
                self.advance(AsyncPhase::CreateImports);
                Ok(Step::Unit)
            }
            Progress::Pending => Ok(Step::Waiting),
        }
    }

    fn create_imports(
        &mut self,
        cx: &mut LoadContext,
        budget: &mut TimeBudget,
        requests: &mut Vec<String>,
    ) -> Result<Step> {
        let id = self.linker_id()?;
        let linker = cx.require_linker(id)?;
        if self.cursor >= linker.imports().len() {
            self.advance(AsyncPhase::CreateExports);
            return Ok(Step::Unit);
        }
        let i = self.cursor;
        if linker.imports()[i].object.is_none() {
            if let Some(dependency) = self.dependency_of(cx, id, i) {
                requests.push(dependency.clone());
                match cx.get_package_linker(&dependency).and_then(|dep| cx.tick_linker(dep, budget)) {
                    Ok(Progress::Pending) => return Ok(Step::Waiting),
                    Ok(Progress::Complete) => {}
                    Err(e) => tracing::warn!(package = %self.name, %dependency, error = %e, "dependency failed to open"),
                }
            }
        }
        match cx.create_import(id, i) {
            Ok(_) => {}
            Err(e @ (Error::MissingImport { .. } | Error::PackageNotFound(_))) => {
                tracing::warn!(package = %self.name, import = i, error = %e, "import skipped");
            }
            Err(e) => return Err(e),
        }
        self.cursor += 1;
        Ok(Step::Unit)
    }

    /// Name of the on-disk package import `i` comes from, when it still
    /// needs loading.
    fn dependency_of(&self, cx: &LoadContext, id: LinkerId, i: usize) -> Option<String> {
        let linker = cx.linker(id)?;
        let package = linker.import_package(i)?;
        if package == linker.package_name() {
            return None;
        }
        let loaded = cx
            .objects()
            .find_package(package)
            .and_then(|p| cx.objects().package_info(p))
            .is_some_and(|info| info.fully_loaded);
        let text = cx.names().resolve(package);
        (!loaded && cx.file_system().resolve(&text).is_some()).then_some(text)
    }

    fn create_exports(&mut self, cx: &mut LoadContext) -> Result<Step> {
        let id = self.linker_id()?;
        let linker = cx.require_linker_mut(id)?;
        if self.cursor >= linker.exports().len() {
            self.advance(AsyncPhase::PreloadQueuedObjects);
            return Ok(Step::Unit);
        }
        if !linker.precache_export(self.cursor)? {
            return Ok(Step::Waiting);
        }
        if let Some(object) = cx.create_export(id, self.cursor)? {
            cx.preload(object)?;
        }
        self.cursor += 1;
        Ok(Step::Unit)
    }

    fn preload_queued(&mut self, cx: &mut LoadContext) -> Result<Step> {
        match cx.loaded_queue().get(self.preload_cursor).copied() {
            Some(object) => {
                self.preload_cursor += 1;
                cx.preload(object)?;
            }
            None => self.advance(AsyncPhase::PostLoadObjects),
        }
        Ok(Step::Unit)
    }

    fn post_load_queued(&mut self, cx: &mut LoadContext) -> Result<Step> {
        let len = cx.loaded_queue().len();
        if let Some(object) = cx.loaded_queue().get(self.post_load_cursor).copied() {
            self.post_load_cursor += 1;
            cx.post_load(object)?;
        } else if self.preload_cursor == len {
            self.advance(AsyncPhase::FinishObjects);
        } else {
            // Post-load queued more objects
            self.advance(AsyncPhase::PreloadQueuedObjects);
        }
        Ok(Step::Unit)
    }

    fn finish_objects(&mut self, cx: &mut LoadContext) -> Result<Step> {
        if let Some(verification) = &self.verification {
            let Some(digest) = verification.try_take() else {
                return Ok(Step::Waiting);
            };
            self.verification = None;
            if Some(digest?) != self.expected_hash {
                let path = self
                    .linker
                    .and_then(|id| cx.linker(id))
                    .map_or_else(|| self.name.clone(), |l| l.filename().display().to_string());
                return Err(Error::VerificationFailed { path });
            }
            tracing::debug!(package = %self.name, "content verified");
        }
        let constructed = cx.finish_constructed();
        let objects = cx.loaded_queue().len();
        cx.clear_loaded_queue();
        let package = self.package.ok_or_else(|| Error::other(format!("{}: no package object", self.name)))?;
        if let Some(info) = cx.objects_mut().package_info_mut(package) {
            info.fully_loaded = true;
        }
        tracing::info!(
            package = %self.name,
            objects,
            constructed,
            ticks = self.ticks,
            elapsed_ms = self.started.map_or(0, |s| s.elapsed().as_millis() as u64),
            "async load finished"
        );
        Ok(Step::Done)
    }

    /// Deliver the outcome to every callback exactly once.
    pub(crate) fn notify(self, result: Result<ObjectId>) -> Result<ObjectId> {
        for callback in self.callbacks {
            callback(&self.name, result.as_ref().copied());
        }
        result
    }
}

/// SHA-256 of a whole source.
fn hash_source(source: &dyn ByteSource) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_READ_SIZE];
    let len = source.len();
    let mut offset = 0u64;
    while offset < len {
        let n = (len - offset).min(HASH_READ_SIZE as u64) as usize;
        source.read_at(offset, &mut buf[..n])?;
        hasher.update(&buf[..n]);
        offset += n as u64;
    }
    Ok(hasher.finalize().into())
}

/// SHA-256 of a byte slice, in the form [`crate::async_loading::AsyncLoader::set_expected_hash`] takes.
pub fn content_hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
