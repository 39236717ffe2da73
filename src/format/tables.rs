//! Name, import, export and depends table records.

use smallvec::SmallVec;

use super::constants::*;
use super::index::PackageIndex;
use crate::linker::LinkerId;
use crate::names::{Name, NameArchive};
use crate::object::{ObjectFlags, ObjectId};
use crate::stream::{serialize_vec, Archive};
use crate::util::{Guid, Result};

/// One entry of a package's local name table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameEntryRecord {
    pub text: String,
    pub flags: u64,
}

impl NameEntryRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), flags: 0 }
    }

    pub fn serialize<A: Archive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        ar.serialize_string(&mut self.text)?;
        ar.serialize_u64(&mut self.flags)
    }
}

/// A resource this package references from another package.
#[derive(Debug, Clone, Default)]
pub struct ObjectImport {
    pub class_package: Name,
    pub class_name: Name,
    pub outer_index: PackageIndex,
    pub object_name: Name,

    // Transient
    pub object: Option<ObjectId>,
    pub source_linker: Option<LinkerId>,
    pub source_index: Option<usize>,
}

impl ObjectImport {
    pub fn new(class_package: Name, class_name: Name, outer_index: PackageIndex, object_name: Name) -> Self {
        Self { class_package, class_name, outer_index, object_name, ..Default::default() }
    }

    pub fn serialize<A: NameArchive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        ar.serialize_name(&mut self.class_package)?;
        ar.serialize_name(&mut self.class_name)?;
        self.outer_index.serialize(ar)?;
        ar.serialize_name(&mut self.object_name)
    }

    /// Persistent fields only, for comparing tables.
    pub fn same_record(&self, other: &Self) -> bool {
        self.class_package == other.class_package
            && self.class_name == other.class_name
            && self.outer_index == other.outer_index
            && self.object_name == other.object_name
    }
}

/// Named template objects of an export, keyed by component name.
pub type ComponentMap = SmallVec<[(Name, PackageIndex); 2]>;

/// A resource defined by this package.
#[derive(Debug, Clone, Default)]
pub struct ObjectExport {
    /// Null means the export is itself a class.
    pub class_index: PackageIndex,
    pub super_index: PackageIndex,
    /// Null means the package root.
    pub outer_index: PackageIndex,
    pub object_name: Name,
    pub archetype_index: PackageIndex,
    pub object_flags: ObjectFlags,
    pub serial_size: i32,
    pub serial_offset: i32,
    pub component_map: ComponentMap,
    pub export_flags: u32,
    pub generation_net_object_count: Vec<i32>,
    pub package_guid: Guid,

    // Transient
    pub object: Option<ObjectId>,
    pub hash_next: Option<u32>,
}

impl ObjectExport {
    pub fn serialize<A: NameArchive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        let version = ar.version();
        self.class_index.serialize(ar)?;
        self.super_index.serialize(ar)?;
        self.outer_index.serialize(ar)?;
        ar.serialize_name(&mut self.object_name)?;
        self.archetype_index.serialize(ar)?;
        ar.serialize_u64(&mut self.object_flags.0)?;
        ar.serialize_i32(&mut self.serial_size)?;
        // Files before the header-size change omit the offset for empty exports
        if self.serial_size != 0 || version >= VER_HEADER_SIZE_AND_FOLDER {
            ar.serialize_i32(&mut self.serial_offset)?;
        }
        if version >= VER_COMPONENT_MAP {
            let mut components: Vec<(Name, PackageIndex)> = self.component_map.to_vec();
            serialize_vec(ar, &mut components, |ar, (name, index)| {
                ar.serialize_name(name)?;
                index.serialize(ar)
            })?;
            if ar.is_loading() {
                self.component_map = components.into();
            }
        }
        ar.serialize_u32(&mut self.export_flags)?;
        if version >= VER_NET_OBJECT_COUNTS {
            serialize_vec(ar, &mut self.generation_net_object_count, |ar, n| ar.serialize_i32(n))?;
            ar.serialize_guid(&mut self.package_guid)?;
        }
        if ar.is_loading() {
            self.object_flags = self.object_flags.persistent();
            super::upgrade::upgrade_export(self, version);
        }
        Ok(())
    }

    #[inline]
    pub fn is_forced(&self) -> bool {
        self.export_flags & EXPORT_FORCED != 0
    }

    /// End of the serialized range, or `None` for invalid ranges.
    pub fn serial_end(&self) -> Option<u64> {
        if self.serial_offset < 0 || self.serial_size < 0 {
            return None;
        }
        Some(self.serial_offset as u64 + self.serial_size as u64)
    }

    /// Persistent fields only, for comparing tables.
    pub fn same_record(&self, other: &Self) -> bool {
        self.class_index == other.class_index
            && self.super_index == other.super_index
            && self.outer_index == other.outer_index
            && self.object_name == other.object_name
            && self.archetype_index == other.archetype_index
            && self.object_flags == other.object_flags
            && self.serial_size == other.serial_size
            && self.serial_offset == other.serial_offset
            && self.component_map == other.component_map
            && self.export_flags == other.export_flags
            && self.generation_net_object_count == other.generation_net_object_count
            && self.package_guid == other.package_guid
    }
}

/// Per-export dependency lists.
pub type DependsMap = Vec<Vec<PackageIndex>>;

/// Serialize one depends list.
pub fn serialize_depends<A: Archive + ?Sized>(ar: &mut A, list: &mut Vec<PackageIndex>) -> Result<()> {
    serialize_vec(ar, list, |ar, index| index.serialize(ar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{NameMapReader, NameMapWriter};
    use crate::names::NameTable;
    use crate::stream::{MemoryReader, MemoryWriter};

    fn names() -> (NameTable, Vec<Name>) {
        let table = NameTable::new();
        let map = ["Core", "Class", "Mesh", "Rock", "Light"]
            .iter()
            .map(|s| table.intern_or_add(s))
            .collect();
        (table, map)
    }

    #[test]
    fn test_export_roundtrip() {
        let (_table, map) = names();
        let mut export = ObjectExport {
            class_index: PackageIndex::from_import(0),
            outer_index: PackageIndex::NULL,
            object_name: map[3].with_number(5),
            object_flags: ObjectFlags::PUBLIC | ObjectFlags::STANDALONE,
            serial_size: 40,
            serial_offset: 512,
            component_map: [(map[4], PackageIndex::from_export(1))].into_iter().collect(),
            export_flags: EXPORT_FORCED,
            generation_net_object_count: vec![3, 4],
            package_guid: Guid::new(9, 8, 7, 6),
            ..Default::default()
        };

        let mut writer = NameMapWriter::new(MemoryWriter::new(), &map);
        export.serialize(&mut writer).unwrap();
        let bytes = writer.into_inner().into_inner();

        let mut reader = NameMapReader::new(MemoryReader::new(bytes), &map);
        let mut back = ObjectExport::default();
        back.serialize(&mut reader).unwrap();
        assert!(back.same_record(&export));
        assert!(back.is_forced());
        assert_eq!(back.serial_end(), Some(552));
    }

    #[test]
    fn test_transient_flags_not_loaded() {
        let (_table, map) = names();
        let mut export = ObjectExport {
            object_name: map[2],
            object_flags: ObjectFlags::PUBLIC | ObjectFlags::NEED_LOAD,
            ..Default::default()
        };
        let mut writer = NameMapWriter::new(MemoryWriter::new(), &map);
        export.serialize(&mut writer).unwrap();
        let bytes = writer.into_inner().into_inner();

        let mut back = ObjectExport::default();
        back.serialize(&mut NameMapReader::new(MemoryReader::new(bytes), &map)).unwrap();
        assert_eq!(back.object_flags, ObjectFlags::PUBLIC);
    }

    #[test]
    fn test_old_export_layout() {
        let (_table, map) = names();
        let mut export = ObjectExport { object_name: map[2], serial_size: 0, serial_offset: 99, ..Default::default() };
        let mut writer = NameMapWriter::new(MemoryWriter::with_version(VER_MIN_SUPPORTED, 0), &map);
        export.serialize(&mut writer).unwrap();
        let bytes = writer.into_inner().into_inner();
        // class, super, outer, name(2), archetype, flags(8), size, export flags
        assert_eq!(bytes.len(), 4 * 3 + 8 + 4 + 8 + 4 + 4);

        let mut inner = MemoryReader::new(bytes);
        inner.state_mut().version = VER_MIN_SUPPORTED;
        let mut back = ObjectExport { serial_offset: 1, ..Default::default() };
        back.serialize(&mut NameMapReader::new(inner, &map)).unwrap();
        assert!(back.component_map.is_empty());
        assert_eq!(back.package_guid, Guid::ZERO);
    }

    #[test]
    fn test_import_roundtrip() {
        let (_table, map) = names();
        let mut import = ObjectImport::new(map[0], map[1], PackageIndex::from_import(1), map[2]);
        let mut writer = NameMapWriter::new(MemoryWriter::new(), &map);
        import.serialize(&mut writer).unwrap();
        let bytes = writer.into_inner().into_inner();
        assert_eq!(bytes.len(), 28);

        let mut back = ObjectImport::default();
        back.serialize(&mut NameMapReader::new(MemoryReader::new(bytes), &map)).unwrap();
        assert!(back.same_record(&import));
        assert!(back.object.is_none());
    }

    #[test]
    fn test_name_entry_roundtrip() {
        let mut entry = NameEntryRecord { text: "Texture2D".into(), flags: 0x70010 };
        let mut writer = MemoryWriter::new();
        entry.serialize(&mut writer).unwrap();
        let mut back = NameEntryRecord::default();
        back.serialize(&mut MemoryReader::new(writer.into_inner())).unwrap();
        assert_eq!(back, entry);
    }
}
