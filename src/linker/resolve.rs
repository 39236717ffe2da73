//! Turning table entries into objects.

use super::export_reader::ExportReader;
use super::{LinkerId, LoadContext};
use crate::format::PackageIndex;
use crate::names::Name;
use crate::object::{ObjectFlags, ObjectId, PostLoadContext, PropertyBag};
use crate::stream::{Archive, MemoryReader};
use crate::util::{Error, Result};

/// Import fields copied out of the linker while resolving.
#[derive(Clone, Copy)]
struct ImportKey {
    class_package: Name,
    class_name: Name,
    outer_index: PackageIndex,
    object_name: Name,
}

impl LoadContext {
    /// Object for a package index of `linker`: `None` for the root, exports
    /// through [`LoadContext::create_export`], imports through
    /// [`LoadContext::create_import`].
    pub fn index_to_object(&mut self, linker: LinkerId, index: PackageIndex) -> Result<Option<ObjectId>> {
        if let Some(i) = index.to_export() {
            self.create_export(linker, i)
        } else if let Some(i) = index.to_import() {
            self.create_import(linker, i).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Rejects re-entrant resolution of the same reference.
    fn enter(&mut self, linker: LinkerId, index: PackageIndex) -> Result<()> {
        if !self.resolving.insert((linker, index)) {
            let path = self.require_linker(linker)?.filename().display().to_string();
            return Err(Error::corrupt(format!("{path}: circular reference through {index}")));
        }
        Ok(())
    }

    fn leave(&mut self, linker: LinkerId, index: PackageIndex) {
        self.resolving.remove(&(linker, index));
    }

    /// Find or allocate the object behind an export. Serial data is not read.
    pub fn create_export(&mut self, linker: LinkerId, index: usize) -> Result<Option<ObjectId>> {
        let l = self.require_linker(linker)?;
        let export = l
            .exports
            .get(index)
            .ok_or_else(|| Error::BadPackageIndex {
                index: PackageIndex::from_export(index).raw(),
                imports: l.imports.len(),
                exports: l.exports.len(),
            })?;
        if let Some(object) = export.object {
            return Ok(Some(object));
        }
        let key = PackageIndex::from_export(index);
        self.enter(linker, key)?;
        let result = self.create_export_inner(linker, index);
        self.leave(linker, key);
        result.map(Some)
    }

    fn create_export_inner(&mut self, linker: LinkerId, index: usize) -> Result<ObjectId> {
        let l = self.require_linker(linker)?;
        let export = &l.exports[index];
        let (class_index, super_index, outer_index, archetype_index) =
            (export.class_index, export.super_index, export.outer_index, export.archetype_index);
        let (object_name, persistent_flags, forced) = (export.object_name, export.object_flags, export.is_forced());
        let package = l.package();
        let path = l.filename().display().to_string();
        let export_path = l.export_path(&self.names, index);

        let class = if class_index.is_null() {
            self.objects.core().class_class
        } else {
            let resolved = self.index_to_object(linker, class_index);
            match resolved {
                Ok(Some(class)) => class,
                Ok(None) | Err(Error::MissingImport { .. }) | Err(Error::PackageNotFound(_)) => {
                    let class = self.require_linker(linker)?.index_path(&self.names, class_index);
                    return Err(Error::UnresolvedClass { path, export: export_path, class });
                }
                Err(e) => return Err(e),
            }
        };

        let outer = if forced {
            None
        } else if outer_index.is_null() {
            Some(package)
        } else {
            self.index_to_object(linker, outer_index)?
        };

        if archetype_index == PackageIndex::from_export(index) {
            return Err(Error::CorruptExport { path, export: export_path, reason: "export is its own archetype".into() });
        }
        let archetype = match self.index_to_object(linker, archetype_index) {
            Ok(archetype) => archetype,
            Err(e @ (Error::MissingImport { .. } | Error::PackageNotFound(_))) => {
                tracing::warn!(export = %export_path, error = %e, "archetype unavailable");
                None
            }
            Err(e) => return Err(e),
        };

        // Handle may have been cached while resolving the references above
        if let Some(object) = self.require_linker(linker)?.exports[index].object {
            return Ok(object);
        }

        let class_name = self.objects.get(class).map(|r| r.name);
        let existing = if forced {
            self.objects.find_package(object_name)
        } else {
            self.objects.find_object(outer, object_name, class_name, None)
        };
        let object = match existing {
            Some(object) => {
                tracing::debug!(export = %export_path, "reusing object already in memory");
                object
            }
            None => {
                let mut flags = persistent_flags | ObjectFlags::NEED_LOAD;
                if self.is_async_loading() {
                    flags |= ObjectFlags::ASYNC_LOADING;
                }
                let object = if forced {
                    let object = self.objects.create_package(object_name);
                    if let Some(record) = self.objects.get_mut(object) {
                        record.flags = flags;
                    }
                    object
                } else {
                    self.objects.allocate(object_name, outer, Some(class), flags)
                };
                if self.is_async_loading() {
                    self.constructed.push(object);
                }
                object
            }
        };

        let super_struct = match self.index_to_object(linker, super_index) {
            Ok(super_struct) => super_struct,
            Err(e @ (Error::MissingImport { .. } | Error::PackageNotFound(_))) => {
                tracing::warn!(export = %export_path, error = %e, "super struct unavailable");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(record) = self.objects.get_mut(object) {
            if record.linker.is_none() {
                record.linker = Some((linker, index));
            }
            record.archetype = archetype.or(record.archetype);
            record.super_struct = super_struct.or(record.super_struct);
            if record.class.is_none() {
                record.class = Some(class);
            }
        }
        if forced {
            let l = self.require_linker(linker)?;
            let export = &l.exports[index];
            let (guid, counts) = (export.package_guid, export.generation_net_object_count.clone());
            if let Some(info) = self.objects.package_info_mut(object) {
                info.guid = guid;
                info.generation_net_object_counts = counts;
            }
        }
        self.require_linker_mut(linker)?.exports[index].object = Some(object);
        self.loaded.push(object);
        Ok(object)
    }

    /// Resolve an import, opening and finalizing its package as needed.
    pub fn create_import(&mut self, linker: LinkerId, index: usize) -> Result<ObjectId> {
        let l = self.require_linker(linker)?;
        let import = l.imports.get(index).ok_or_else(|| Error::BadPackageIndex {
            index: PackageIndex::from_import(index).raw(),
            imports: l.imports.len(),
            exports: l.exports.len(),
        })?;
        if let Some(object) = import.object {
            return Ok(object);
        }
        let key = ImportKey {
            class_package: import.class_package,
            class_name: import.class_name,
            outer_index: import.outer_index,
            object_name: import.object_name,
        };
        let index_key = PackageIndex::from_import(index);
        self.enter(linker, index_key)?;
        let result = self.create_import_inner(linker, index, key);
        self.leave(linker, index_key);

        let (object, source) = result?;
        let import = &mut self.require_linker_mut(linker)?.imports[index];
        import.object = Some(object);
        if let Some((source_linker, source_index)) = source {
            import.source_linker = Some(source_linker);
            import.source_index = Some(source_index);
        }
        Ok(object)
    }

    fn create_import_inner(
        &mut self,
        linker: LinkerId,
        index: usize,
        key: ImportKey,
    ) -> Result<(ObjectId, Option<(LinkerId, usize)>)> {
        if key.outer_index.is_null() {
            let package = self.objects.create_package(key.object_name);
            return Ok((package, None));
        }

        let outer = self
            .index_to_object(linker, key.outer_index)?
            .ok_or_else(|| Error::corrupt("import outer resolved to nothing"))?;
        let missing = |cx: &Self, reason: String| -> Error {
            let path = cx.linker(linker).map_or_else(String::new, |l| l.import_path(&cx.names, index));
            Error::MissingImport { path, reason }
        };

        if let Some(object) =
            self.objects.find_object(Some(outer), key.object_name, Some(key.class_name), Some(key.class_package))
        {
            let source = self.objects.get(object).and_then(|r| r.linker);
            return Ok((object, source));
        }

        let package = self.objects.outermost(outer);
        let package_name = self.objects.get(package).map(|r| r.name).unwrap_or(Name::NONE);
        let package_text = self.names.resolve(package_name);
        let source = match self.get_package_linker(&package_text) {
            Ok(source) => source,
            Err(Error::PackageNotFound(_)) => {
                return Err(missing(self, format!("package {package_text} not found")));
            }
            Err(e) => return Err(missing(self, format!("package {package_text} failed to open: {e}"))),
        };
        if source == linker {
            return Err(missing(self, "import refers to its own package".into()));
        }
        if let Err(e) = self.finish_linker(source) {
            return Err(missing(self, format!("package {package_text} failed to load: {e}")));
        }
        // Fatal failures in the source package detach the source linker only
        let source_failed = |cx: &mut Self, e: Error| -> Error {
            if e.is_fatal_for_loader() {
                tracing::warn!(package = %package_text, error = %e, "source package failed");
                cx.detach_linker(source);
            }
            missing(&*cx, format!("package {package_text} failed: {e}"))
        };

        // Outer inside the source package's index space
        let source_outer = if outer == package {
            PackageIndex::NULL
        } else {
            match self.source_export_of(source, outer) {
                Some(i) => PackageIndex::from_export(i),
                None => {
                    let outer_path = self.objects.path_name(outer);
                    return Err(missing(self, format!("outer {outer_path} is not an export of {package_text}")));
                }
            }
        };

        let found = self.require_linker(source)?.find_export_index(
            key.class_name,
            key.class_package,
            key.object_name,
            Some(source_outer),
        );
        if let Some(export) = found {
            return match self.create_export(source, export) {
                Ok(Some(object)) => Ok((object, Some((source, export)))),
                Ok(None) => Err(missing(self, "export could not be created".into())),
                Err(e) => Err(source_failed(self, e)),
            };
        }

        let core = *self.objects.core_names();
        let redirector = self.require_linker(source)?.find_export_index(
            core.redirector,
            core.core,
            key.object_name,
            Some(source_outer),
        );
        if let Some(export) = redirector {
            return match self.follow_redirector(source, export, key) {
                Ok(Some(object)) => Ok(object),
                Ok(None) => Err(missing(self, "redirector destination has a different class".into())),
                Err(e) => Err(source_failed(self, e)),
            };
        }

        Err(missing(
            self,
            format!("no export of class {} in {package_text}", self.names.resolve(key.class_name)),
        ))
    }

    /// Export of `source` that produced `object`.
    fn source_export_of(&self, source: LinkerId, object: ObjectId) -> Option<usize> {
        match self.objects.get(object).and_then(|r| r.linker) {
            Some((owner, i)) if owner == source => Some(i),
            _ => self.linker(source)?.exports.iter().position(|e| e.object == Some(object)),
        }
    }

    fn follow_redirector(
        &mut self,
        source: LinkerId,
        export: usize,
        key: ImportKey,
    ) -> Result<Option<(ObjectId, Option<(LinkerId, usize)>)>> {
        let Some(redirector) = self.create_export(source, export)? else {
            return Ok(None);
        };
        self.preload(redirector)?;
        let Some(destination) = self.objects.redirector_destination(redirector) else {
            return Ok(None);
        };
        if self.objects.class_name(destination) != Some(key.class_name) {
            return Ok(None);
        }
        tracing::debug!(
            from = %self.objects.path_name(redirector),
            to = %self.objects.path_name(destination),
            "followed redirector"
        );
        let association = self.objects.get(destination).and_then(|r| r.linker);
        Ok(Some((destination, association)))
    }

    /// Read an object's serial data. A no-op once the object is loaded.
    #[tracing::instrument(skip(self), fields(object = object.index()))]
    pub fn preload(&mut self, object: ObjectId) -> Result<()> {
        let Some(record) = self.objects.get(object) else {
            return Ok(());
        };
        if !record.flags.contains(ObjectFlags::NEED_LOAD) {
            return Ok(());
        }
        let (class, super_struct, association) = (record.class, record.super_struct, record.linker);
        let Some((linker, index)) = association.filter(|(l, _)| self.linker(*l).is_some()) else {
            tracing::warn!(object = %self.objects.path_name(object), "object needs load but has no linker");
            if let Some(record) = self.objects.get_mut(object) {
                record.flags.remove(ObjectFlags::NEED_LOAD);
            }
            return Ok(());
        };
        if let Some(super_struct) = super_struct.filter(|&s| s != object) {
            self.preload(super_struct)?;
        }
        // Super preload may have reached this object through its children
        if !self.objects.get(object).is_some_and(|r| r.flags.contains(ObjectFlags::NEED_LOAD)) {
            return Ok(());
        }

        let names = self.names.clone();
        let l = self.require_linker_mut(linker)?;
        let export = &l.exports[index];
        let (offset, size) = match export.serial_end() {
            Some(end) if end <= l.file_size() => (export.serial_offset as u64, export.serial_size as u64),
            _ => {
                let reason = format!(
                    "serial range {}+{} outside the {}-byte file",
                    export.serial_offset,
                    export.serial_size,
                    l.file_size()
                );
                return Err(l.corrupt_export_at(&names, index, reason));
            }
        };
        let bytes = if size == 0 { Vec::new() } else { l.read_range(offset, size)? };
        let state = l.archive_state();
        let name_map = l.name_map.clone();

        if let Some(record) = self.objects.get_mut(object) {
            record.flags.remove(ObjectFlags::NEED_LOAD);
        }
        let serializer = self.objects.serializer_for(class);
        let mut inner = MemoryReader::with_base_offset(bytes, offset);
        *inner.state_mut() = state;

        let mut properties = PropertyBag::new();
        let mut binary = Vec::new();
        let consumed = {
            let mut reader = ExportReader::new(self, linker, inner, name_map);
            serializer
                .serialize_tagged_properties(&mut reader, &mut properties)
                .and_then(|()| serializer.serialize_binary_fields(&mut reader, &mut binary))
                .map(|()| reader.tell() - offset)
        };
        let consumed = match consumed {
            Ok(consumed) => consumed,
            Err(e @ (Error::CorruptData(_) | Error::UnexpectedEof(_))) => {
                let l = self.require_linker(linker)?;
                return Err(l.corrupt_export_at(&self.names, index, e.to_string()));
            }
            Err(e) => return Err(e),
        };
        if consumed != size {
            let l = self.require_linker(linker)?;
            return Err(l.corrupt_export_at(&self.names, index, format!("serializer consumed {consumed} of {size} bytes")));
        }

        if let Some(record) = self.objects.get_mut(object) {
            record.properties = properties;
            record.binary = binary;
            record.flags.insert(ObjectFlags::NEED_POST_LOAD);
        }
        Ok(())
    }

    /// Run the class post-load hook once. Returns whether it ran.
    pub fn post_load(&mut self, object: ObjectId) -> Result<bool> {
        let Some(record) = self.objects.get_mut(object) else {
            return Ok(false);
        };
        if !record.flags.contains(ObjectFlags::NEED_POST_LOAD) {
            return Ok(false);
        }
        record.flags.remove(ObjectFlags::NEED_POST_LOAD);
        let class = record.class;
        let serializer = self.objects.serializer_for(class);
        serializer.post_load(&mut PostLoadContext::new(object, self))?;
        Ok(true)
    }
}
