//! Writing an in-memory package back to a package file.

use std::collections::HashMap;
use std::path::Path;

use super::LoadContext;
use crate::format::{ObjectExport, ObjectImport, PackageBuilder, PackageFlags, PackageIndex, PayloadWriter};
use crate::names::{Name, NameArchive};
use crate::object::{ClassSerializer, ObjectArchive, ObjectFlags, ObjectId, ObjectStore};
use crate::stream::{delegate_archive, Archive, NullWriter};
use crate::util::{Error, Result};

/// Records every object reference written through it.
struct ReferenceCollector {
    inner: NullWriter,
    found: Vec<ObjectId>,
}

impl Archive for ReferenceCollector {
    delegate_archive!(inner);
}

impl NameArchive for ReferenceCollector {
    fn serialize_name(&mut self, _name: &mut Name) -> Result<()> {
        self.inner.serialize_i32(&mut 0)?;
        self.inner.serialize_i32(&mut 0)
    }
}

impl ObjectArchive for ReferenceCollector {
    fn serialize_object_ref(&mut self, object: &mut Option<ObjectId>) -> Result<()> {
        if let Some(object) = *object {
            self.found.push(object);
        }
        self.inner.serialize_i32(&mut 0)
    }
}

/// Payload archive that stores object references as package indices.
struct ExportWriter<'w, 'p> {
    inner: &'w mut PayloadWriter<'p>,
    indices: &'w HashMap<ObjectId, PackageIndex>,
}

impl Archive for ExportWriter<'_, '_> {
    delegate_archive!(inner);
}

impl NameArchive for ExportWriter<'_, '_> {
    fn serialize_name(&mut self, name: &mut Name) -> Result<()> {
        self.inner.serialize_name(name)
    }
}

impl ObjectArchive for ExportWriter<'_, '_> {
    fn serialize_object_ref(&mut self, object: &mut Option<ObjectId>) -> Result<()> {
        let mut index = match *object {
            None => PackageIndex::NULL,
            Some(object) => *self
                .indices
                .get(&object)
                .ok_or_else(|| Error::other(format!("object #{} has no package index", object.index())))?,
        };
        index.serialize(&mut *self.inner)
    }
}

/// Run an object's serializer over `ar` without touching the stored fields.
fn write_object(
    serializer: &dyn ClassSerializer,
    objects: &ObjectStore,
    object: ObjectId,
    ar: &mut dyn ObjectArchive,
) -> Result<()> {
    let record = objects.get(object).ok_or_else(|| Error::other("object vanished while saving"))?;
    let mut properties = record.properties.clone();
    let mut binary = record.binary.clone();
    serializer.serialize_tagged_properties(ar, &mut properties)?;
    serializer.serialize_binary_fields(ar, &mut binary)
}

/// Assigns import indices to objects outside the saved package.
struct ImportTable<'a> {
    objects: &'a ObjectStore,
    builder: &'a mut PackageBuilder,
    indices: &'a mut HashMap<ObjectId, PackageIndex>,
}

impl ImportTable<'_> {
    fn index_of(&mut self, object: ObjectId) -> Result<PackageIndex> {
        if let Some(&index) = self.indices.get(&object) {
            return Ok(index);
        }
        let objects = self.objects;
        let record = objects.get(object).ok_or_else(|| Error::other("dangling object reference"))?;
        let outer = match record.outer {
            Some(outer) => self.index_of(outer)?,
            None => PackageIndex::NULL,
        };
        let core = objects.core_names();
        let (class_name, class_package) = match record.class {
            Some(class) => {
                let package = objects.outermost(class);
                let package_name = objects.get(package).map_or(core.core, |r| r.name);
                (objects.get(class).map_or(core.object, |r| r.name), package_name)
            }
            None => (core.object, core.core),
        };
        let index = self
            .builder
            .add_import_record(ObjectImport::new(class_package, class_name, outer, record.name));
        self.indices.insert(object, index);
        Ok(index)
    }
}

impl LoadContext {
    /// Encode `package` and everything inside it as a package file.
    ///
    /// References to objects outside the package become imports; every
    /// object must already be loaded.
    #[tracing::instrument(skip_all, fields(package = %self.objects.path_name(package)))]
    pub fn save_package(&self, package: ObjectId) -> Result<Vec<u8>> {
        let objects = &self.objects;
        if !objects.is_package(package) {
            return Err(Error::other(format!("{} is not a package", objects.path_name(package))));
        }
        let members = objects.objects_in(package);
        if let Some(&unloaded) = members
            .iter()
            .find(|&&id| objects.get(id).is_some_and(|r| r.flags.contains(ObjectFlags::NEED_LOAD)))
        {
            return Err(Error::other(format!("{} was never loaded", objects.path_name(unloaded))));
        }

        let mut builder = PackageBuilder::with_name_table(self.names.clone());
        if let Some(info) = objects.package_info(package) {
            let mut flags = info.package_flags;
            flags.remove(PackageFlags::STORE_COMPRESSED);
            flags.remove(PackageFlags::STORE_FULLY_COMPRESSED);
            builder.set_package_flags(flags).set_guid(info.guid);
            if !info.folder_name.is_empty() {
                builder.set_folder_name(info.folder_name.clone());
            }
        }
        if !self.config.save_compression.is_none() {
            builder.set_compression(self.config.save_compression, self.config.compression_chunk_size);
        }

        let mut indices: HashMap<ObjectId, PackageIndex> = HashMap::with_capacity(members.len() + 1);
        for (i, &object) in members.iter().enumerate() {
            indices.insert(object, PackageIndex::from_export(i));
        }
        indices.insert(package, PackageIndex::NULL);

        // Pass 1: references made by each export
        let mut references = Vec::with_capacity(members.len());
        for &object in &members {
            let record = objects.get(object).ok_or_else(|| Error::other("object vanished while saving"))?;
            let mut collector = ReferenceCollector { inner: NullWriter::new(), found: Vec::new() };
            let serializer = objects.serializer_for(record.class);
            write_object(serializer.as_ref(), objects, object, &mut collector)?;
            let mut found = collector.found;
            found.extend(record.class.filter(|&c| c != objects.core().class_class));
            found.extend(record.outer.filter(|&o| o != package));
            found.extend(record.archetype);
            found.extend(record.super_struct);
            references.push(found);
        }

        let mut depends = Vec::with_capacity(members.len());
        {
            let mut imports = ImportTable { objects, builder: &mut builder, indices: &mut indices };
            for found in &references {
                let mut list: Vec<PackageIndex> = Vec::new();
                for &object in found {
                    let index = imports.index_of(object)?;
                    if index.is_import() && !list.contains(&index) {
                        list.push(index);
                    }
                }
                depends.push(list);
            }
        }

        // Pass 2: export records and payloads
        let index_of = |object: Option<ObjectId>| object.and_then(|o| indices.get(&o).copied()).unwrap_or_default();
        for (i, &object) in members.iter().enumerate() {
            let record = objects.get(object).ok_or_else(|| Error::other("object vanished while saving"))?;
            let serializer = objects.serializer_for(record.class);
            let payload = builder.encode_payload(|w| {
                let mut writer = ExportWriter { inner: w, indices: &indices };
                write_object(serializer.as_ref(), objects, object, &mut writer)
            })?;
            let class_index = match record.class {
                Some(class) if class == objects.core().class_class => PackageIndex::NULL,
                class => index_of(class),
            };
            let export = ObjectExport {
                class_index,
                super_index: index_of(record.super_struct),
                outer_index: match record.outer {
                    Some(outer) if outer != package => index_of(Some(outer)),
                    _ => PackageIndex::NULL,
                },
                object_name: record.name,
                archetype_index: index_of(record.archetype),
                object_flags: record.flags.persistent(),
                ..Default::default()
            };
            let index = builder.add_export_record(export, payload);
            for &dependency in &depends[i] {
                builder.add_depends(index, dependency)?;
            }
        }

        let bytes = builder.build()?;
        tracing::info!(
            exports = members.len(),
            imports = builder.imports().len(),
            names = builder.names().len(),
            bytes = bytes.len(),
            "package saved"
        );
        Ok(bytes)
    }

    /// [`LoadContext::save_package`] into a file.
    pub fn save_package_to(&self, package: ObjectId, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.save_package(package)?;
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NameTable;
    use crate::object::{PropertyBag, PropertyValue};
    use crate::stream::MemoryFileSystem;
    use crate::util::LoaderConfig;
    use std::sync::Arc;

    #[test]
    fn test_save_and_reload() {
        let names = Arc::new(NameTable::new());
        let fs = Arc::new(MemoryFileSystem::new());
        let mut cx = LoadContext::with_name_table(names.clone(), fs.clone(), LoaderConfig::default());

        let package = cx.objects_mut().create_package(names.intern_or_add("Saved"));
        let object_class = cx.objects().core().object_class;
        let chair = cx.objects_mut().allocate(names.intern_or_add("Chair"), Some(package), Some(object_class), ObjectFlags::PUBLIC);
        let seat = cx.objects_mut().allocate(names.intern_or_add("Seat"), Some(chair), Some(object_class), ObjectFlags::PUBLIC);
        let mut bag = PropertyBag::new();
        bag.set(names.intern_or_add("Legs"), PropertyValue::Int(4));
        bag.set(names.intern_or_add("Part"), PropertyValue::Object(Some(seat)));
        cx.objects_mut().get_mut(chair).unwrap().properties = bag;

        let bytes = cx.save_package(package).unwrap();
        fs.insert_package("Saved", bytes);

        let mut other = LoadContext::with_name_table(names.clone(), fs, LoaderConfig::default());
        let loaded = other.load_package("Saved").unwrap();
        let chair = other.objects().find_by_path("Saved.Chair").unwrap();
        let seat = other.objects().find_by_path("Saved.Chair.Seat").unwrap();
        let record = other.objects().get(chair).unwrap();
        assert_eq!(record.properties.get_int(names.intern_or_add("Legs")), Some(4));
        assert_eq!(record.properties.get_object(names.intern_or_add("Part")), Some(seat));
        assert_eq!(other.objects().outermost(seat), loaded);
        // Imports of Core.Object only
        let id = other.linker_for_package(loaded).unwrap();
        assert!(other.linker(id).unwrap().imports().iter().all(|i| names.matches(i.class_package, "Core")));
    }

    #[test]
    fn test_unloaded_object_rejected() {
        let names = Arc::new(NameTable::new());
        let fs = Arc::new(MemoryFileSystem::new());
        let mut cx = LoadContext::with_name_table(names.clone(), fs, LoaderConfig::default());
        let package = cx.objects_mut().create_package(names.intern_or_add("Half"));
        let class = cx.objects().core().object_class;
        cx.objects_mut().allocate(names.intern_or_add("Pending"), Some(package), Some(class), ObjectFlags::NEED_LOAD);
        assert!(cx.save_package(package).is_err());
    }
}
