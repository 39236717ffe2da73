//! One package's tables and the resumable construction of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::export_hash::{ExportHash, EXPORT_HASH_BATCH};
use super::state::{LinkerState, Progress};
use super::LinkerId;
use crate::format::*;
use crate::names::{Name, NameTable, MAX_NAME_LEN};
use crate::object::{ObjectFlags, ObjectId, ObjectStore};
use crate::stream::{Archive, ArchiveState, AsyncReader, ByteSource, CountingArchive, FileSystem, MemoryReader};
use crate::util::{Error, LoaderConfig, Result, TimeBudget};

/// Archive a linker reads its package through.
pub enum PackageReader {
    /// Precaching reader over the file, chunk-aware for compressed packages.
    Async(AsyncReader),
    /// Whole file decompressed up front.
    Memory(MemoryReader),
}

impl Archive for PackageReader {
    fn state(&self) -> &ArchiveState {
        match self {
            Self::Async(r) => r.state(),
            Self::Memory(r) => r.state(),
        }
    }

    fn state_mut(&mut self) -> &mut ArchiveState {
        match self {
            Self::Async(r) => r.state_mut(),
            Self::Memory(r) => r.state_mut(),
        }
    }

    fn serialize(&mut self, data: &mut [u8]) -> Result<()> {
        match self {
            Self::Async(r) => r.serialize(data),
            Self::Memory(r) => r.serialize(data),
        }
    }

    fn tell(&self) -> u64 {
        match self {
            Self::Async(r) => r.tell(),
            Self::Memory(r) => r.tell(),
        }
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        match self {
            Self::Async(r) => r.seek(pos),
            Self::Memory(r) => r.seek(pos),
        }
    }

    fn total_size(&self) -> u64 {
        match self {
            Self::Async(r) => r.total_size(),
            Self::Memory(r) => r.total_size(),
        }
    }

    fn precache(&mut self, offset: u64, size: u64) -> Result<bool> {
        match self {
            Self::Async(r) => r.precache(offset, size),
            Self::Memory(r) => r.precache(offset, size),
        }
    }
}

/// Borrowed services a linker needs while it is ticked.
pub struct LinkerEnv<'a> {
    pub names: &'a NameTable,
    pub config: &'a LoaderConfig,
    pub objects: &'a mut ObjectStore,
}

/// Result of one construction step.
enum Step {
    /// One unit of work done.
    Unit,
    /// Waiting for a precache request.
    Waiting,
}

/// Mediates between one package file and the objects created from it.
pub struct Linker {
    pub(super) id: LinkerId,
    pub(super) package_name: Name,
    pub(super) package: ObjectId,
    pub(super) filename: PathBuf,
    pub(super) state: LinkerState,
    pub(super) cursor: usize,
    /// Archive position the current table loop resumes at.
    resume_pos: u64,
    pub(super) archive: CountingArchive<PackageReader>,
    pub(super) summary: PackageFileSummary,
    pending_names: Vec<Name>,
    pub(super) name_map: Arc<[Name]>,
    pub(super) imports: Vec<ObjectImport>,
    pub(super) exports: Vec<ObjectExport>,
    pub(super) depends: DependsMap,
    pub(super) export_hash: ExportHash,
    /// `Core` and `Class`, reported for class index 0.
    intrinsic_class: (Name, Name),
}

impl Linker {
    /// Open the file behind `package` and stop in [`LinkerState::LoaderOpened`].
    pub(super) fn open(
        id: LinkerId,
        package_name: Name,
        package: ObjectId,
        filename: PathBuf,
        intrinsic_class: (Name, Name),
        fs: &dyn FileSystem,
        config: &LoaderConfig,
    ) -> Result<Self> {
        let source = fs.open(&filename)?;
        let fully_compressed = fs.contents().and_then(|c| c.uncompressed_file_size(&filename));
        let reader = match fully_compressed {
            Some(size) => PackageReader::Memory(decompress_whole_file(source.as_ref(), size, config)?),
            None => PackageReader::Async(AsyncReader::new(source, config.io_mode, config.min_read_size)),
        };
        tracing::debug!(file = %filename.display(), fully_compressed = fully_compressed.is_some(), "linker opened");
        Ok(Self {
            id,
            package_name,
            package,
            filename,
            state: LinkerState::LoaderOpened,
            cursor: 0,
            resume_pos: 0,
            archive: CountingArchive::new(reader),
            summary: PackageFileSummary::default(),
            pending_names: Vec::new(),
            name_map: Arc::from(Vec::new()),
            imports: Vec::new(),
            exports: Vec::new(),
            depends: Vec::new(),
            export_hash: ExportHash::new(),
            intrinsic_class,
        })
    }

    #[inline]
    pub fn id(&self) -> LinkerId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> LinkerState {
        self.state
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.state == LinkerState::Finalized
    }

    #[inline]
    pub fn package(&self) -> ObjectId {
        self.package
    }

    #[inline]
    pub fn package_name(&self) -> Name {
        self.package_name
    }

    #[inline]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn summary(&self) -> &PackageFileSummary {
        &self.summary
    }

    /// Local name table mapped into the global one.
    pub fn names(&self) -> &[Name] {
        &self.name_map
    }

    pub fn imports(&self) -> &[ObjectImport] {
        &self.imports
    }

    pub fn exports(&self) -> &[ObjectExport] {
        &self.exports
    }

    pub fn depends(&self, export: usize) -> &[PackageIndex] {
        self.depends.get(export).map_or(&[], |d| d.as_slice())
    }

    /// Bytes read through the package archive so far.
    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.archive.bytes()
    }

    /// Logical file size (uncompressed size for compressed packages).
    #[inline]
    pub fn file_size(&self) -> u64 {
        self.archive.total_size()
    }

    /// Progress through construction in `[0, 1]`, counting table entries.
    pub fn construction_fraction(&self) -> f32 {
        let step = 1.0 / LinkerState::Finalized.ordinal() as f32;
        let within = match self.loop_len() {
            Some(len) if len > 0 => (self.cursor as f32 / len as f32).min(1.0),
            _ => 0.0,
        };
        (self.state.fraction() + within * step).min(1.0)
    }

    pub(super) fn hash_built(&self) -> bool {
        self.state >= LinkerState::ExportHashBuilt
    }

    fn path_string(&self) -> String {
        self.filename.display().to_string()
    }

    /// Advance construction until finalized, out of budget or waiting on I/O.
    #[tracing::instrument(skip_all, fields(file = %self.filename.display(), state = %self.state))]
    pub fn tick(&mut self, env: &mut LinkerEnv<'_>, budget: &mut TimeBudget) -> Result<Progress> {
        while self.state != LinkerState::Finalized {
            match self.step(env)? {
                Step::Waiting => return Ok(Progress::Pending),
                Step::Unit => {
                    if budget.consume_unit() && self.state != LinkerState::Finalized {
                        return Ok(Progress::Pending);
                    }
                }
            }
        }
        Ok(Progress::Complete)
    }

    fn advance(&mut self) {
        let next = self.state.next();
        tracing::debug!(file = %self.filename.display(), from = %self.state, to = %next, "linker state");
        self.state = next;
        self.cursor = 0;
    }

    fn loop_len(&self) -> Option<usize> {
        match self.state {
            LinkerState::SummaryParsed => Some(self.summary.name_count as usize),
            LinkerState::NameTableParsed | LinkerState::ImportTableParsed => Some(self.summary.import_count as usize),
            LinkerState::ImportTableFixedUp
            | LinkerState::ExportTableParsed
            | LinkerState::DependsTableParsed
            | LinkerState::ExportHashBuilt => Some(self.summary.export_count as usize),
            _ => None,
        }
    }

    fn step(&mut self, env: &mut LinkerEnv<'_>) -> Result<Step> {
        match self.state {
            LinkerState::Created => Err(Error::other("linker ticked before it was opened")),
            LinkerState::LoaderOpened => self.parse_summary(env.config),
            LinkerState::SummaryParsed => self.parse_name(env.names),
            LinkerState::NameTableParsed => self.parse_import(),
            LinkerState::ImportTableParsed => self.fix_up_import(env),
            LinkerState::ImportTableFixedUp => self.parse_export(env.names),
            LinkerState::ExportTableParsed => self.parse_depends(env.config),
            LinkerState::DependsTableParsed => self.hash_exports(),
            LinkerState::ExportHashBuilt => self.match_existing(env),
            LinkerState::ExistingObjectsMatched => {
                tracing::debug!(
                    file = %self.filename.display(),
                    names = self.name_map.len(),
                    imports = self.imports.len(),
                    exports = self.exports.len(),
                    "linker finalized"
                );
                self.advance();
                Ok(Step::Unit)
            }
            LinkerState::Finalized => Ok(Step::Unit),
        }
    }

    fn parse_summary(&mut self, config: &LoaderConfig) -> Result<Step> {
        let header = config.header_precache_size.min(self.archive.total_size());
        if !self.archive.precache(0, header)? {
            return Ok(Step::Waiting);
        }
        self.archive.seek(0)?;
        let path = self.path_string();
        let mut summary = PackageFileSummary::default();
        summary.serialize(&mut self.archive).map_err(|e| e.with_path(&path))?;

        if summary.engine_version > ENGINE_VERSION_CURRENT {
            tracing::warn!(
                file = %path,
                engine_version = summary.engine_version,
                current = ENGINE_VERSION_CURRENT,
                "package saved by a newer engine"
            );
        }
        if !summary.compressed_chunks.is_empty() {
            match self.archive.inner_mut() {
                PackageReader::Async(reader) => {
                    reader.set_compression(summary.compression_flags, summary.compressed_chunks.clone())?;
                }
                PackageReader::Memory(_) => {
                    return Err(Error::corrupt(format!("{path}: fully compressed package also declares chunks")));
                }
            }
        }
        for (what, offset, count) in [
            ("name", summary.name_offset, summary.name_count),
            ("import", summary.import_offset, summary.import_count),
            ("export", summary.export_offset, summary.export_count),
        ] {
            if count > 0 && offset as u64 >= self.archive.total_size() {
                return Err(Error::corrupt(format!("{path}: {what} table offset {offset} past end of file")));
            }
        }
        tracing::debug!(
            file = %path,
            version = summary.file_version,
            licensee = summary.licensee_version,
            names = summary.name_count,
            imports = summary.import_count,
            exports = summary.export_count,
            compressed = summary.is_compressed(),
            "summary parsed"
        );
        self.summary = summary;
        self.resume_pos = self.summary.name_offset as u64;
        self.advance();
        Ok(Step::Unit)
    }

    /// Seek to the loop position, waiting for the bytes when they are not cached.
    fn begin_unit(&mut self, header_precache: u64) -> Result<bool> {
        if !self.archive.precache(self.resume_pos, header_precache)? {
            return Ok(false);
        }
        self.archive.seek(self.resume_pos)?;
        Ok(true)
    }

    fn end_unit(&mut self) {
        self.resume_pos = self.archive.tell();
        self.cursor += 1;
    }

    fn parse_name(&mut self, names: &NameTable) -> Result<Step> {
        let count = self.summary.name_count as usize;
        if self.cursor >= count {
            self.name_map = std::mem::take(&mut self.pending_names).into();
            self.resume_pos = self.summary.import_offset as u64;
            self.advance();
            return Ok(Step::Unit);
        }
        if !self.begin_unit(256)? {
            return Ok(Step::Waiting);
        }
        let mut record = NameEntryRecord::default();
        record.serialize(&mut self.archive)?;
        if record.text.is_empty() || record.text.len() > MAX_NAME_LEN {
            return Err(Error::corrupt(format!(
                "{}: name entry {} has invalid length {}",
                self.path_string(),
                self.cursor,
                record.text.len()
            )));
        }
        let index = names.add_entry(&record.text);
        names.add_entry_flags(index, record.flags);
        self.pending_names.push(Name::new(index, 0));
        self.end_unit();
        Ok(Step::Unit)
    }

    fn parse_import(&mut self) -> Result<Step> {
        let count = self.summary.import_count as usize;
        if self.cursor >= count {
            self.advance();
            return Ok(Step::Unit);
        }
        if !self.begin_unit(256)? {
            return Ok(Step::Waiting);
        }
        let mut import = ObjectImport::default();
        import.serialize(&mut NameMapReader::new(&mut self.archive, &self.name_map))?;
        self.check_index(import.outer_index)?;
        if import.outer_index == PackageIndex::from_import(self.cursor) {
            return Err(Error::corrupt(format!("{}: import {} is its own outer", self.path_string(), self.cursor)));
        }
        self.imports.push(import);
        self.end_unit();
        Ok(Step::Unit)
    }

    fn fix_up_import(&mut self, env: &mut LinkerEnv<'_>) -> Result<Step> {
        if self.cursor >= self.imports.len() {
            self.resume_pos = self.summary.export_offset as u64;
            self.advance();
            return Ok(Step::Unit);
        }
        let version = self.summary.file_version;
        let import = &mut self.imports[self.cursor];
        for rename in &env.config.import_renames {
            if version > rename.max_version || !env.names.matches(import.class_name, &rename.old_class) {
                continue;
            }
            if let Some(package) = &rename.class_package {
                if !env.names.matches(import.class_package, package) {
                    continue;
                }
            }
            tracing::debug!(
                import = %env.names.resolve(import.object_name),
                from = %rename.old_class,
                to = %rename.new_class,
                "import class renamed"
            );
            import.class_name = env.names.try_intern(&rename.new_class)?;
            if let Some(package) = &rename.new_class_package {
                import.class_package = env.names.try_intern(package)?;
            }
            break;
        }
        self.cursor += 1;
        Ok(Step::Unit)
    }

    fn parse_export(&mut self, names: &NameTable) -> Result<Step> {
        let count = self.summary.export_count as usize;
        if self.cursor >= count {
            self.resume_pos = self.summary.depends_offset as u64;
            self.advance();
            return Ok(Step::Unit);
        }
        if !self.begin_unit(256)? {
            return Ok(Step::Waiting);
        }
        let mut export = ObjectExport::default();
        export.serialize(&mut NameMapReader::new(&mut self.archive, &self.name_map))?;
        for index in [export.class_index, export.super_index, export.outer_index, export.archetype_index] {
            self.check_index(index)?;
        }
        let own = PackageIndex::from_export(self.cursor);
        if export.outer_index == own {
            return Err(self.corrupt_export(names, &export, "export is its own outer"));
        }
        if export.serial_size > 0 && export.serial_end().is_none_or(|end| end > self.archive.total_size()) {
            return Err(self.corrupt_export(
                names,
                &export,
                &format!(
                    "serial range {}+{} outside the {}-byte file",
                    export.serial_offset,
                    export.serial_size,
                    self.archive.total_size()
                ),
            ));
        }
        self.exports.push(export);
        self.end_unit();
        Ok(Step::Unit)
    }

    fn parse_depends(&mut self, config: &LoaderConfig) -> Result<Step> {
        let count = self.exports.len();
        let has_table = config.load_depends_table
            && self.summary.file_version >= VER_DEPENDS_TABLE
            && self.summary.depends_offset > 0;
        if !has_table {
            self.depends = vec![Vec::new(); count];
            self.cursor = count;
        }
        if self.cursor >= count {
            self.advance();
            return Ok(Step::Unit);
        }
        if !self.begin_unit(256)? {
            return Ok(Step::Waiting);
        }
        let mut list = Vec::new();
        serialize_depends(&mut self.archive, &mut list)?;
        for &index in &list {
            self.check_index(index)?;
        }
        self.depends.push(list);
        self.end_unit();
        Ok(Step::Unit)
    }

    fn hash_exports(&mut self) -> Result<Step> {
        let end = (self.cursor + EXPORT_HASH_BATCH).min(self.exports.len());
        for i in self.cursor..end {
            self.export_hash.insert(&mut self.exports, i);
        }
        self.cursor = end;
        if self.cursor >= self.exports.len() {
            self.advance();
        }
        Ok(Step::Unit)
    }

    /// Associate exports with objects of the same identity already in memory.
    fn match_existing(&mut self, env: &mut LinkerEnv<'_>) -> Result<Step> {
        if !env.config.find_existing_exports {
            self.cursor = self.exports.len();
        }
        if self.cursor >= self.exports.len() {
            self.advance();
            return Ok(Step::Unit);
        }
        let i = self.cursor;
        self.cursor += 1;

        let export = &self.exports[i];
        let outer = if export.is_forced() {
            None
        } else if export.outer_index.is_null() {
            Some(self.package)
        } else {
            match export.outer_index.to_export() {
                Some(j) => match self.exports[j].object {
                    Some(outer) => Some(outer),
                    None => return Ok(Step::Unit),
                },
                None => return Ok(Step::Unit),
            }
        };
        let Some(class_name) = self.export_class_name(i) else {
            return Ok(Step::Unit);
        };
        let Some(object) = env.objects.find_object(outer, export.object_name, Some(class_name), None) else {
            return Ok(Step::Unit);
        };
        let Some(record) = env.objects.get_mut(object) else {
            return Ok(Step::Unit);
        };
        let owner = record.linker;
        match owner {
            Some((linker, _)) if linker != self.id => Ok(Step::Unit),
            _ => {
                record.linker = Some((self.id, i));
                self.exports[i].object = Some(object);
                tracing::debug!(
                    object = %env.objects.path_name(object),
                    needs_load = env.objects.get(object).is_some_and(|r| r.flags.contains(ObjectFlags::NEED_LOAD)),
                    "export matched existing object"
                );
                Ok(Step::Unit)
            }
        }
    }

    pub(super) fn check_index(&self, index: PackageIndex) -> Result<()> {
        let ok = match (index.to_export(), index.to_import()) {
            (Some(e), _) => e < self.summary.export_count as usize,
            (_, Some(i)) => i < self.summary.import_count as usize,
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::BadPackageIndex {
                index: index.raw(),
                imports: self.summary.import_count as usize,
                exports: self.summary.export_count as usize,
            })
        }
    }

    /// For exports not yet in the table.
    fn corrupt_export(&self, names: &NameTable, export: &ObjectExport, reason: &str) -> Error {
        Error::CorruptExport {
            path: self.path_string(),
            export: format!("{}[{}]", names.resolve(export.object_name), self.cursor),
            reason: reason.to_string(),
        }
    }

    pub(super) fn corrupt_export_at(&self, names: &NameTable, index: usize, reason: impl Into<String>) -> Error {
        Error::CorruptExport { path: self.path_string(), export: self.export_path(names, index), reason: reason.into() }
    }

    /// Read `[offset, offset + size)` and restore the archive position.
    pub(super) fn read_range(&mut self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let saved = self.archive.tell();
        self.archive.seek(offset)?;
        let mut bytes = vec![0u8; size as usize];
        let read = self.archive.serialize(&mut bytes);
        self.archive.seek(saved)?;
        read?;
        Ok(bytes)
    }

    /// Start reading an export's serial data in the background.
    pub fn precache_export(&mut self, index: usize) -> Result<bool> {
        let Some(export) = self.exports.get(index) else {
            return Ok(true);
        };
        if export.serial_size <= 0 {
            return Ok(true);
        }
        let (offset, size) = (export.serial_offset as u64, export.serial_size as u64);
        self.archive.precache(offset, size)
    }

    /// Archive state to read export data with.
    pub(super) fn archive_state(&self) -> ArchiveState {
        self.archive.state().clone()
    }

    /// Class name of an export. A class defined in this package reports the
    /// class export's name; index 0 is `Class`.
    pub fn export_class_name(&self, index: usize) -> Option<Name> {
        let class = self.exports.get(index)?.class_index;
        self.index_object_name(class)
    }

    /// Package the class of an export lives in.
    pub fn export_class_package(&self, index: usize) -> Option<Name> {
        let class = self.exports.get(index)?.class_index;
        if class.is_null() {
            return Some(self.intrinsic_class.0);
        }
        if class.is_export() {
            return Some(self.package_name);
        }
        self.import_package(class.to_import()?)
    }

    /// Outermost package name of an import.
    pub fn import_package(&self, index: usize) -> Option<Name> {
        let mut current = index;
        for _ in 0..=self.imports.len() {
            let import = self.imports.get(current)?;
            match import.outer_index.to_import() {
                Some(outer) => current = outer,
                None if import.outer_index.is_null() => return Some(import.object_name),
                None => return Some(self.package_name),
            }
        }
        None
    }

    fn index_object_name(&self, index: PackageIndex) -> Option<Name> {
        if index.is_null() {
            return Some(self.intrinsic_class.1);
        }
        match (index.to_export(), index.to_import()) {
            (Some(e), _) => self.exports.get(e).map(|e| e.object_name),
            (_, Some(i)) => self.imports.get(i).map(|i| i.object_name),
            _ => None,
        }
    }

    /// Dotted path of an import, e.g. `Engine.Materials.Default`.
    pub fn import_path(&self, names: &NameTable, index: usize) -> String {
        self.index_path(names, PackageIndex::from_import(index))
    }

    /// Dotted path of an export, starting at this package.
    pub fn export_path(&self, names: &NameTable, index: usize) -> String {
        self.index_path(names, PackageIndex::from_export(index))
    }

    pub(super) fn index_path(&self, names: &NameTable, index: PackageIndex) -> String {
        let mut parts = Vec::new();
        let mut current = index;
        let limit = self.imports.len() + self.exports.len() + 1;
        while !current.is_null() && parts.len() < limit {
            match (current.to_export(), current.to_import()) {
                (Some(e), _) => {
                    let Some(export) = self.exports.get(e) else { break };
                    parts.push(names.resolve(export.object_name));
                    if export.is_forced() {
                        return join_reversed(parts);
                    }
                    current = export.outer_index;
                    if current.is_null() {
                        parts.push(names.resolve(self.package_name));
                    }
                }
                (_, Some(i)) => {
                    let Some(import) = self.imports.get(i) else { break };
                    parts.push(names.resolve(import.object_name));
                    current = import.outer_index;
                }
                _ => break,
            }
        }
        join_reversed(parts)
    }
}

fn join_reversed(mut parts: Vec<String>) -> String {
    parts.reverse();
    parts.join(".")
}

/// Read a file stored as one compressed stream into memory.
fn decompress_whole_file(source: &dyn ByteSource, size: u64, config: &LoaderConfig) -> Result<MemoryReader> {
    let mut raw = vec![0u8; source.len() as usize];
    source.read_at(0, &mut raw)?;
    let mut reader = MemoryReader::new(raw);
    let mut image = vec![0u8; size as usize];
    reader.serialize_compressed(&mut image, config.full_compression)?;
    Ok(MemoryReader::new(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ExportSpec;
    use crate::linker::LoadContext;
    use crate::stream::MemoryFileSystem;
    use std::time::Duration;

    fn sample(names: &Arc<NameTable>) -> Vec<u8> {
        let mut builder = PackageBuilder::with_name_table(names.clone());
        let core = builder.add_import("Core", "Package", PackageIndex::NULL, "Core");
        let object = builder.add_import("Core", "Class", core, "Object");
        let mut previous = PackageIndex::NULL;
        for i in 0..100 {
            let spec = ExportSpec::new(format!("Part_{i}"), object).payload(vec![i as u8; 8]);
            let export = builder.add_export(spec);
            if !previous.is_null() {
                builder.add_depends(export, previous).unwrap();
            }
            previous = export;
        }
        builder.build().unwrap()
    }

    fn open(names: &Arc<NameTable>) -> (LoadContext, LinkerId) {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert_package("Parts", sample(names));
        let mut cx = LoadContext::with_name_table(names.clone(), fs, LoaderConfig::default());
        let id = cx.get_package_linker("Parts").unwrap();
        (cx, id)
    }

    fn tables(linker: &Linker) -> String {
        format!("{:?}\n{:?}\n{:?}\n{:?}", linker.names(), linker.imports(), linker.exports(), linker.depends)
    }

    #[test]
    fn test_zero_budget_ticks_resume_one_unit_at_a_time() {
        let names = Arc::new(NameTable::new());
        let (mut cx, id) = open(&names);
        assert_eq!(cx.linker(id).unwrap().state(), LinkerState::LoaderOpened);

        let mut visited = vec![LinkerState::LoaderOpened];
        let mut ticks = 0;
        loop {
            let linker = cx.linker(id).unwrap();
            let (state, cursor) = (linker.state(), linker.cursor);
            let mut budget = TimeBudget::with_limit(Duration::ZERO);
            let progress = cx.tick_linker(id, &mut budget).unwrap();
            ticks += 1;
            assert_eq!(budget.units(), 1);

            let linker = cx.linker(id).unwrap();
            if linker.state() == state {
                assert!(linker.cursor > cursor, "{state} did not move past {cursor}");
            } else {
                assert_eq!(linker.state(), state.next());
                assert_eq!(linker.cursor, 0);
                visited.push(linker.state());
            }
            if progress.is_complete() {
                break;
            }
            assert!(ticks < 10_000);
        }
        assert_eq!(visited, &LinkerState::ALL[1..]);
        let linker = cx.linker(id).unwrap();
        assert!(ticks > linker.names().len() + linker.imports().len() + 3 * linker.exports().len());

        let (mut whole, whole_id) = open(&names);
        let progress = whole.tick_linker(whole_id, &mut TimeBudget::unlimited()).unwrap();
        assert!(progress.is_complete());
        assert_eq!(tables(whole.linker(whole_id).unwrap()), tables(linker));
    }
}
