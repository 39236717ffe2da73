//! Package writer.
//!
//! [`PackageBuilder`] lays a package out as
//!
//! ```text
//! summary | names | imports | exports | depends | [padding] | payloads
//! ```
//!
//! and rewrites the summary and export table once payload offsets are known.
//! With compression enabled, everything past the summary is cut into
//! fixed-size logical chunks, each stored as one compressed block after a
//! summary that carries the chunk table.

use std::sync::Arc;

use super::constants::*;
use super::index::PackageIndex;
use super::name_map::{LocalNameIndex, NameMapWriter};
use super::summary::{CompressedChunk, GenerationInfo, PackageFileSummary};
use super::tables::{serialize_depends, ComponentMap, DependsMap, NameEntryRecord, ObjectExport, ObjectImport};
use crate::names::{Name, NameArchive, NameTable};
use crate::object::{write_property_terminator, write_property_with, ObjectFlags, PropertyType};
use crate::stream::{delegate_archive, serialize_compressed_chunked, Archive, CompressionFlags, MemoryWriter};
use crate::util::{Error, Guid, Result};

/// Description of one export to add.
#[derive(Debug, Clone, Default)]
pub struct ExportSpec {
    pub object_name: String,
    pub class_index: PackageIndex,
    pub super_index: PackageIndex,
    pub outer_index: PackageIndex,
    pub archetype_index: PackageIndex,
    pub object_flags: ObjectFlags,
    pub export_flags: u32,
    pub component_map: Vec<(String, PackageIndex)>,
    pub generation_net_object_count: Vec<i32>,
    pub package_guid: Guid,
    pub payload: Vec<u8>,
}

impl ExportSpec {
    pub fn new(object_name: impl Into<String>, class_index: PackageIndex) -> Self {
        Self {
            object_name: object_name.into(),
            class_index,
            object_flags: ObjectFlags::PUBLIC,
            ..Default::default()
        }
    }

    pub fn outer(mut self, outer: PackageIndex) -> Self {
        self.outer_index = outer;
        self
    }

    pub fn super_struct(mut self, super_index: PackageIndex) -> Self {
        self.super_index = super_index;
        self
    }

    pub fn archetype(mut self, archetype: PackageIndex) -> Self {
        self.archetype_index = archetype;
        self
    }

    pub fn flags(mut self, flags: ObjectFlags) -> Self {
        self.object_flags = flags;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn component(mut self, name: impl Into<String>, index: PackageIndex) -> Self {
        self.component_map.push((name.into(), index));
        self
    }

    /// Mark as a top-level package folded into this file.
    pub fn forced(mut self, package_guid: Guid, generation_net_object_count: Vec<i32>) -> Self {
        self.export_flags |= EXPORT_FORCED;
        self.package_guid = package_guid;
        self.generation_net_object_count = generation_net_object_count;
        self
    }
}

/// Local name table under construction.
struct LocalNames {
    table: Arc<NameTable>,
    map: Vec<Name>,
    index: LocalNameIndex,
}

impl LocalNames {
    fn new(table: Arc<NameTable>) -> Self {
        let mut names = Self { table, map: Vec::new(), index: LocalNameIndex::default() };
        names.add(Name::NONE);
        names
    }

    fn add(&mut self, name: Name) -> Name {
        let base = name.base();
        let next = self.map.len() as i32;
        if self.index.insert(base, next) == next {
            self.map.push(base);
        }
        name
    }

    fn add_text(&mut self, text: &str) -> Name {
        let name = self.table.intern_or_add(text);
        self.add(name)
    }
}

/// Archive handed to [`PackageBuilder::encode_payload`]. Names are added to
/// the package's local table as they are written.
pub struct PayloadWriter<'a> {
    inner: MemoryWriter,
    names: &'a mut LocalNames,
}

impl PayloadWriter<'_> {
    /// Intern `text` into the package's name table.
    pub fn name(&mut self, text: &str) -> Name {
        self.names.add_text(text)
    }

    pub fn write_name(&mut self, text: &str) -> Result<()> {
        let mut name = self.name(text);
        self.serialize_name(&mut name)
    }

    /// Object references are stored as package indices.
    pub fn write_index(&mut self, mut index: PackageIndex) -> Result<()> {
        index.serialize(self)
    }

    pub fn int_property(&mut self, name: &str, mut value: i32) -> Result<()> {
        let name = self.name(name);
        write_property_with(self, name, PropertyType::Int, |ar| ar.serialize_i32(&mut value))
    }

    pub fn float_property(&mut self, name: &str, mut value: f32) -> Result<()> {
        let name = self.name(name);
        write_property_with(self, name, PropertyType::Float, |ar| ar.serialize_f32(&mut value))
    }

    pub fn bool_property(&mut self, name: &str, mut value: bool) -> Result<()> {
        let name = self.name(name);
        write_property_with(self, name, PropertyType::Bool, |ar| ar.serialize_bool(&mut value))
    }

    pub fn str_property(&mut self, name: &str, value: &str) -> Result<()> {
        let name = self.name(name);
        let mut value = value.to_string();
        write_property_with(self, name, PropertyType::Str, |ar| ar.serialize_string(&mut value))
    }

    pub fn name_property(&mut self, name: &str, value: &str) -> Result<()> {
        let name = self.name(name);
        let mut value = self.name(value);
        write_property_with(self, name, PropertyType::Name, |ar| ar.serialize_name(&mut value))
    }

    pub fn object_property(&mut self, name: &str, mut value: PackageIndex) -> Result<()> {
        let name = self.name(name);
        write_property_with(self, name, PropertyType::Object, |ar| value.serialize(ar))
    }

    pub fn bytes_property(&mut self, name: &str, value: &[u8]) -> Result<()> {
        let name = self.name(name);
        let mut value = value.to_vec();
        write_property_with(self, name, PropertyType::Bytes, |ar| ar.serialize(&mut value))
    }

    pub fn end_properties(&mut self) -> Result<()> {
        write_property_terminator(self)
    }
}

impl Archive for PayloadWriter<'_> {
    delegate_archive!(inner);
}

impl NameArchive for PayloadWriter<'_> {
    fn serialize_name(&mut self, name: &mut Name) -> Result<()> {
        self.names.add(*name);
        self.names.index.write_name(&mut self.inner, *name)
    }
}

/// Builds package files in memory.
pub struct PackageBuilder {
    names: LocalNames,
    imports: Vec<ObjectImport>,
    exports: Vec<ObjectExport>,
    payloads: Vec<Vec<u8>>,
    depends: DependsMap,
    version: u16,
    licensee_version: u16,
    package_flags: PackageFlags,
    folder_name: String,
    guid: Guid,
    engine_version: i32,
    cooked_content_version: i32,
    generations: Option<Vec<GenerationInfo>>,
    export_data_offset: Option<u64>,
    compression: Option<(CompressionFlags, u32)>,
    byte_swapped: bool,
}

/// Uncompressed file image plus the layout facts needed to compress it.
struct Image {
    bytes: Vec<u8>,
    summary: PackageFileSummary,
    summary_size: usize,
}

impl PackageBuilder {
    /// Builder with a private name table.
    pub fn new() -> Self {
        Self::with_name_table(Arc::new(NameTable::new()))
    }

    /// Builder whose names live in `table`.
    pub fn with_name_table(table: Arc<NameTable>) -> Self {
        Self {
            names: LocalNames::new(table),
            imports: Vec::new(),
            exports: Vec::new(),
            payloads: Vec::new(),
            depends: Vec::new(),
            version: VER_CURRENT,
            licensee_version: LICENSEE_VER_CURRENT,
            package_flags: PackageFlags::NONE,
            folder_name: "None".to_string(),
            guid: Guid::ZERO,
            engine_version: ENGINE_VERSION_CURRENT,
            cooked_content_version: COOKED_CONTENT_VERSION_CURRENT,
            generations: None,
            export_data_offset: None,
            compression: None,
            byte_swapped: false,
        }
    }

    pub fn name_table(&self) -> &Arc<NameTable> {
        &self.names.table
    }

    /// Local name table in index order.
    pub fn names(&self) -> &[Name] {
        &self.names.map
    }

    pub fn imports(&self) -> &[ObjectImport] {
        &self.imports
    }

    pub fn exports(&self) -> &[ObjectExport] {
        &self.exports
    }

    /// Write at an older supported version.
    pub fn set_version(&mut self, version: u16, licensee_version: u16) -> &mut Self {
        self.version = version;
        self.licensee_version = licensee_version;
        self
    }

    pub fn set_package_flags(&mut self, flags: PackageFlags) -> &mut Self {
        self.package_flags = flags;
        self
    }

    pub fn set_folder_name(&mut self, folder: impl Into<String>) -> &mut Self {
        self.folder_name = folder.into();
        self
    }

    pub fn set_guid(&mut self, guid: Guid) -> &mut Self {
        self.guid = guid;
        self
    }

    pub fn set_engine_version(&mut self, engine_version: i32, cooked_content_version: i32) -> &mut Self {
        self.engine_version = engine_version;
        self.cooked_content_version = cooked_content_version;
        self
    }

    /// Override the generation history (one generation of current counts by default).
    pub fn set_generations(&mut self, generations: Vec<GenerationInfo>) -> &mut Self {
        self.generations = Some(generations);
        self
    }

    /// Pad after the header so the first payload starts at `offset`.
    pub fn set_export_data_offset(&mut self, offset: u64) -> &mut Self {
        self.export_data_offset = Some(offset);
        self
    }

    /// Store everything past the summary in compressed chunks.
    pub fn set_compression(&mut self, flags: CompressionFlags, chunk_size: u32) -> &mut Self {
        self.compression = (!flags.is_none()).then_some((flags, chunk_size.max(1)));
        self
    }

    /// Write in the opposite byte order.
    pub fn set_byte_swapped(&mut self, swapped: bool) -> &mut Self {
        self.byte_swapped = swapped;
        self
    }

    /// Add an entry to the local name table.
    pub fn add_name(&mut self, text: &str) -> Name {
        self.names.add_text(text)
    }

    /// Register a name from the builder's table.
    pub fn add_name_entry(&mut self, name: Name) -> Name {
        self.names.add(name)
    }

    pub fn add_import(
        &mut self,
        class_package: &str,
        class_name: &str,
        outer: PackageIndex,
        object_name: &str,
    ) -> PackageIndex {
        let import = ObjectImport::new(
            self.names.add_text(class_package),
            self.names.add_text(class_name),
            outer,
            self.names.add_text(object_name),
        );
        self.add_import_record(import)
    }

    /// Add an import whose names come from the builder's table.
    pub fn add_import_record(&mut self, import: ObjectImport) -> PackageIndex {
        self.names.add(import.class_package);
        self.names.add(import.class_name);
        self.names.add(import.object_name);
        self.imports.push(ObjectImport::new(import.class_package, import.class_name, import.outer_index, import.object_name));
        PackageIndex::from_import(self.imports.len() - 1)
    }

    pub fn add_export(&mut self, spec: ExportSpec) -> PackageIndex {
        let object_name = self.names.add_text(&spec.object_name);
        let component_map: ComponentMap = spec
            .component_map
            .iter()
            .map(|(name, index)| (self.names.add_text(name), *index))
            .collect();
        let export = ObjectExport {
            class_index: spec.class_index,
            super_index: spec.super_index,
            outer_index: spec.outer_index,
            object_name,
            archetype_index: spec.archetype_index,
            object_flags: spec.object_flags.persistent(),
            component_map,
            export_flags: spec.export_flags,
            generation_net_object_count: spec.generation_net_object_count,
            package_guid: spec.package_guid,
            ..Default::default()
        };
        self.add_export_record(export, spec.payload)
    }

    /// Add an export whose names come from the builder's table.
    pub fn add_export_record(&mut self, mut export: ObjectExport, payload: Vec<u8>) -> PackageIndex {
        self.names.add(export.object_name);
        for (name, _) in &export.component_map {
            self.names.add(*name);
        }
        export.object = None;
        export.hash_next = None;
        self.exports.push(export);
        self.payloads.push(payload);
        PackageIndex::from_export(self.exports.len() - 1)
    }

    /// Replace the payload of an added export.
    pub fn set_payload(&mut self, export: PackageIndex, payload: Vec<u8>) -> Result<()> {
        let slot = export
            .to_export()
            .and_then(|i| self.payloads.get_mut(i))
            .ok_or_else(|| Error::other(format!("{export} is not an export of this builder")))?;
        *slot = payload;
        Ok(())
    }

    /// Encode payload bytes whose names go into this package's name table.
    pub fn encode_payload<F>(&mut self, write: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&mut PayloadWriter<'_>) -> Result<()>,
    {
        let mut writer = PayloadWriter { inner: self.writer(), names: &mut self.names };
        write(&mut writer)?;
        Ok(writer.inner.into_inner())
    }

    pub fn add_depends(&mut self, export: PackageIndex, dependency: PackageIndex) -> Result<()> {
        let index = export
            .to_export()
            .filter(|&i| i < self.exports.len())
            .ok_or_else(|| Error::other(format!("{export} is not an export of this builder")))?;
        if self.depends.len() <= index {
            self.depends.resize_with(index + 1, Vec::new);
        }
        self.depends[index].push(dependency);
        Ok(())
    }

    /// Produce the package file.
    pub fn build(&self) -> Result<Vec<u8>> {
        match self.compression {
            None => Ok(self.build_image(CompressionFlags::NONE, PackageFlags::NONE)?.bytes),
            Some((flags, chunk_size)) => {
                if self.version < VER_PACKAGE_COMPRESSION {
                    return Err(Error::other(format!(
                        "version {} predates package compression",
                        self.version
                    )));
                }
                let image = self.build_image(flags.persisted(), PackageFlags::STORE_COMPRESSED)?;
                self.compress_image(image, flags, chunk_size)
            }
        }
    }

    /// Produce the file as one compressed stream plus its uncompressed size.
    pub fn build_fully_compressed(&self, flags: CompressionFlags) -> Result<(Vec<u8>, u64)> {
        let image = self.build_image(CompressionFlags::NONE, PackageFlags::STORE_FULLY_COMPRESSED)?;
        let uncompressed_size = image.bytes.len() as u64;
        let mut data = image.bytes;
        let mut writer = self.writer();
        let chunk_size = self.compression.map_or(COMPRESSION_CHUNK_SIZE, |(_, size)| size);
        serialize_compressed_chunked(&mut writer, &mut data, flags, chunk_size)?;
        Ok((writer.into_inner(), uncompressed_size))
    }

    fn writer(&self) -> MemoryWriter {
        let mut writer = MemoryWriter::with_version(self.version, self.licensee_version);
        writer.state_mut().force_byte_swapping = self.byte_swapped;
        writer
    }

    fn build_image(&self, compression_flags: CompressionFlags, extra_flags: PackageFlags) -> Result<Image> {
        let export_count = to_i32(self.exports.len())?;
        let name_count = to_i32(self.names.map.len())?;
        let mut package_flags = self.package_flags;
        package_flags.insert(extra_flags);

        let mut summary = PackageFileSummary {
            file_version: self.version,
            licensee_version: self.licensee_version,
            folder_name: self.folder_name.clone(),
            package_flags,
            name_count,
            export_count,
            import_count: to_i32(self.imports.len())?,
            guid: self.guid,
            generations: self.generations.clone().unwrap_or_else(|| {
                vec![GenerationInfo { export_count, name_count, net_object_count: export_count }]
            }),
            engine_version: self.engine_version,
            cooked_content_version: self.cooked_content_version,
            compression_flags,
            ..Default::default()
        };

        let mut w = self.writer();
        summary.serialize(&mut w)?;
        let summary_size = w.len();

        summary.name_offset = to_i32(w.tell())?;
        let table = &self.names.table;
        for name in &self.names.map {
            let mut record = NameEntryRecord {
                text: table.entry_text(name.index()).unwrap_or_default(),
                flags: table.entry_flags(name.index()),
            };
            record.serialize(&mut w)?;
        }

        let mut imports = self.imports.clone();
        let mut exports = self.exports.clone();
        summary.import_offset = to_i32(w.tell())?;
        {
            let mut nw = NameMapWriter::new(&mut w, &self.names.map);
            for import in &mut imports {
                import.serialize(&mut nw)?;
            }
        }
        summary.export_offset = to_i32(w.tell())?;
        self.write_exports(&mut w, &mut exports)?;

        if self.version >= VER_DEPENDS_TABLE {
            summary.depends_offset = to_i32(w.tell())?;
            for i in 0..exports.len() {
                let mut list = self.depends.get(i).cloned().unwrap_or_default();
                serialize_depends(&mut w, &mut list)?;
            }
        }
        summary.total_header_size = to_i32(w.tell())?;

        if let Some(start) = self.export_data_offset {
            if start < w.tell() {
                return Err(Error::other(format!(
                    "export data offset {start} falls inside the {}-byte header",
                    w.tell()
                )));
            }
            let mut padding = vec![0u8; (start - w.tell()) as usize];
            w.serialize(&mut padding)?;
        }
        for (export, payload) in exports.iter_mut().zip(&self.payloads) {
            export.serial_offset = to_i32(w.tell())?;
            export.serial_size = to_i32(payload.len())?;
            let mut bytes = payload.clone();
            w.serialize(&mut bytes)?;
        }

        // Same field sizes as the first pass, so rewriting in place is safe
        w.seek(0)?;
        summary.serialize(&mut w)?;
        w.seek(summary.export_offset as u64)?;
        self.write_exports(&mut w, &mut exports)?;

        Ok(Image { bytes: w.into_inner(), summary, summary_size })
    }

    fn write_exports(&self, w: &mut MemoryWriter, exports: &mut [ObjectExport]) -> Result<()> {
        let mut nw = NameMapWriter::new(w, &self.names.map);
        for export in exports.iter_mut() {
            export.serialize(&mut nw)?;
        }
        Ok(())
    }

    fn compress_image(&self, image: Image, flags: CompressionFlags, chunk_size: u32) -> Result<Vec<u8>> {
        let Image { bytes, mut summary, summary_size } = image;
        let mut blobs = Vec::new();
        let mut chunks = Vec::new();
        for (i, piece) in bytes[summary_size..].chunks(chunk_size as usize).enumerate() {
            let mut data = piece.to_vec();
            let mut writer = self.writer();
            serialize_compressed_chunked(&mut writer, &mut data, flags, chunk_size)?;
            let blob = writer.into_inner();
            chunks.push(CompressedChunk {
                uncompressed_offset: to_i32(summary_size + i * chunk_size as usize)?,
                uncompressed_size: to_i32(piece.len())?,
                compressed_offset: 0,
                compressed_size: to_i32(blob.len())?,
            });
            blobs.push(blob);
        }
        summary.compressed_chunks = chunks;

        let mut measure = self.writer();
        summary.clone().serialize(&mut measure)?;
        let mut offset = measure.len();
        for chunk in &mut summary.compressed_chunks {
            chunk.compressed_offset = to_i32(offset)?;
            offset += chunk.compressed_size as usize;
        }

        let mut w = self.writer();
        summary.serialize(&mut w)?;
        for mut blob in blobs {
            w.serialize(&mut blob)?;
        }
        Ok(w.into_inner())
    }
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn to_i32<T: TryInto<i32> + Copy + std::fmt::Display>(value: T) -> Result<i32> {
    value
        .try_into()
        .map_err(|_| Error::other(format!("{value} does not fit a 32-bit package offset")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryReader;

    fn parse_summary(bytes: &[u8]) -> PackageFileSummary {
        let mut reader = MemoryReader::new(bytes.to_vec());
        let mut summary = PackageFileSummary::default();
        summary.serialize(&mut reader).unwrap();
        summary
    }

    #[test]
    fn test_empty_package_layout() {
        let bytes = PackageBuilder::new().build().unwrap();
        let summary = parse_summary(&bytes);
        assert_eq!(summary.name_count, 1);
        assert_eq!(summary.export_count, 0);
        assert_eq!(summary.import_count, 0);
        assert_eq!(summary.total_header_size as usize, bytes.len());
        assert_eq!(summary.generations.len(), 1);

        let mut reader = MemoryReader::new(bytes);
        reader.seek(summary.name_offset as u64).unwrap();
        let mut entry = NameEntryRecord::default();
        entry.serialize(&mut reader).unwrap();
        assert_eq!(entry.text, "None");
    }

    #[test]
    fn test_payload_at_fixed_offset() {
        let mut builder = PackageBuilder::new();
        let class = builder.add_import("Core", "Class", PackageIndex::NULL, "Object");
        builder.add_export(ExportSpec::new("Blob", class).payload(vec![7u8; 100]));
        builder.set_export_data_offset(500);
        let bytes = builder.build().unwrap();
        assert_eq!(bytes.len(), 600);
        assert!(bytes[500..].iter().all(|&b| b == 7));

        let summary = parse_summary(&bytes);
        assert!(summary.total_header_size <= 500);
    }

    #[test]
    fn test_offset_inside_header_rejected() {
        let mut builder = PackageBuilder::new();
        builder.set_export_data_offset(4);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_encode_payload_registers_names() {
        let mut builder = PackageBuilder::new();
        let before = builder.names().len();
        let payload = builder
            .encode_payload(|w| {
                w.int_property("Health", 100)?;
                w.name_property("Team", "Blue")?;
                w.end_properties()
            })
            .unwrap();
        assert!(!payload.is_empty());
        // Health, Team and Blue; None was already present
        assert_eq!(builder.names().len(), before + 3);
    }

    #[test]
    fn test_compressed_chunk_table() {
        let mut builder = PackageBuilder::new();
        let class = builder.add_import("Core", "Class", PackageIndex::NULL, "Object");
        for i in 0..4 {
            builder.add_export(ExportSpec::new(format!("Data{i}"), class).payload(vec![i as u8; 3000]));
        }
        builder.set_compression(CompressionFlags::ZLIB, 4096);
        let bytes = builder.build().unwrap();

        let summary = parse_summary(&bytes);
        assert!(summary.is_compressed());
        assert!(summary.package_flags.contains(PackageFlags::STORE_COMPRESSED));
        let chunks = &summary.compressed_chunks;
        assert!(chunks.len() >= 3);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].uncompressed_end(), pair[1].uncompressed_offset as u64);
            assert_eq!(pair[0].compressed_offset + pair[0].compressed_size, pair[1].compressed_offset);
        }
        let last = chunks.last().unwrap();
        assert_eq!((last.compressed_offset + last.compressed_size) as usize, bytes.len());
        assert!((last.uncompressed_end() as usize) > 12_000);
    }

    #[test]
    fn test_compression_needs_new_version() {
        let mut builder = PackageBuilder::new();
        builder.set_version(VER_DEPENDS_TABLE, 0).set_compression(CompressionFlags::ZLIB, 1024);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_old_version_and_swapped() {
        let mut builder = PackageBuilder::new();
        builder.set_version(VER_MIN_SUPPORTED, 3).set_byte_swapped(true);
        let bytes = builder.build().unwrap();
        assert_eq!(&bytes[..4], &PACKAGE_FILE_TAG.to_be_bytes());

        let summary = parse_summary(&bytes);
        assert_eq!(summary.file_version, VER_MIN_SUPPORTED);
        assert_eq!(summary.licensee_version, 3);
    }

    #[test]
    fn test_fully_compressed() {
        let mut builder = PackageBuilder::new();
        builder.add_name("Padding");
        let plain = builder.build().unwrap();
        let (packed, size) = builder.build_fully_compressed(CompressionFlags::ZSTD).unwrap();
        assert_eq!(size as usize, plain.len());

        let mut reader = MemoryReader::new(packed);
        let mut image = vec![0u8; size as usize];
        reader.serialize_compressed(&mut image, CompressionFlags::ZSTD).unwrap();
        let summary = parse_summary(&image);
        assert!(summary.package_flags.contains(PackageFlags::STORE_FULLY_COMPRESSED));
    }
}
