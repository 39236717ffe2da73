//! Package file summary (the header at offset 0).

use super::constants::*;
use super::upgrade::upgrade_summary;
use crate::stream::{serialize_vec, Archive, CompressionFlags};
use crate::util::{Error, Guid, Result};

/// Counts recorded for one historical save of the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationInfo {
    pub export_count: i32,
    pub name_count: i32,
    pub net_object_count: i32,
}

impl GenerationInfo {
    pub fn serialize<A: Archive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        ar.serialize_i32(&mut self.export_count)?;
        ar.serialize_i32(&mut self.name_count)?;
        if ar.version() >= VER_NET_OBJECT_COUNTS {
            ar.serialize_i32(&mut self.net_object_count)?;
        }
        Ok(())
    }
}

/// Maps one logical (uncompressed) range to its physical compressed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedChunk {
    pub uncompressed_offset: i32,
    pub uncompressed_size: i32,
    pub compressed_offset: i32,
    pub compressed_size: i32,
}

impl CompressedChunk {
    pub fn serialize<A: Archive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        ar.serialize_i32(&mut self.uncompressed_offset)?;
        ar.serialize_i32(&mut self.uncompressed_size)?;
        ar.serialize_i32(&mut self.compressed_offset)?;
        ar.serialize_i32(&mut self.compressed_size)
    }

    #[inline]
    pub fn uncompressed_end(&self) -> u64 {
        self.uncompressed_offset as u64 + self.uncompressed_size as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.uncompressed_offset < 0
            || self.uncompressed_size < 0
            || self.compressed_offset < 0
            || self.compressed_size < 0
        {
            return Err(Error::corrupt(format!("negative field in compressed chunk {self:?}")));
        }
        Ok(())
    }
}

/// The package header.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageFileSummary {
    pub tag: u32,
    pub file_version: u16,
    pub licensee_version: u16,
    /// Bytes from offset 0 to the end of the last table.
    pub total_header_size: i32,
    pub folder_name: String,
    pub package_flags: PackageFlags,
    pub name_count: i32,
    pub name_offset: i32,
    pub export_count: i32,
    pub export_offset: i32,
    pub import_count: i32,
    pub import_offset: i32,
    pub depends_offset: i32,
    pub guid: Guid,
    pub generations: Vec<GenerationInfo>,
    pub engine_version: i32,
    pub cooked_content_version: i32,
    pub compression_flags: CompressionFlags,
    pub compressed_chunks: Vec<CompressedChunk>,
}

impl Default for PackageFileSummary {
    fn default() -> Self {
        Self {
            tag: PACKAGE_FILE_TAG,
            file_version: VER_CURRENT,
            licensee_version: LICENSEE_VER_CURRENT,
            total_header_size: 0,
            folder_name: "None".to_string(),
            package_flags: PackageFlags::NONE,
            name_count: 0,
            name_offset: 0,
            export_count: 0,
            export_offset: 0,
            import_count: 0,
            import_offset: 0,
            depends_offset: 0,
            guid: Guid::ZERO,
            generations: Vec::new(),
            engine_version: ENGINE_VERSION_CURRENT,
            cooked_content_version: COOKED_CONTENT_VERSION_CURRENT,
            compression_flags: CompressionFlags::NONE,
            compressed_chunks: Vec::new(),
        }
    }
}

impl PackageFileSummary {
    /// Serialize in table order.
    ///
    /// On load a byte-swapped tag toggles `force_byte_swapping` on `ar`, the
    /// file version is copied into the archive state, versions outside the
    /// supported range are rejected before any gated field is read, and the
    /// upgrade table fills fields the file predates. Errors carry no path;
    /// callers attach one with [`Error::with_path`].
    pub fn serialize<A: Archive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        ar.serialize_u32(&mut self.tag)?;
        if ar.is_loading() {
            if self.tag == PACKAGE_FILE_TAG_SWAPPED {
                let swapping = ar.force_byte_swapping();
                ar.state_mut().force_byte_swapping = !swapping;
                self.tag = PACKAGE_FILE_TAG;
            } else if self.tag != PACKAGE_FILE_TAG {
                return Err(Error::BadMagic { path: String::new(), tag: self.tag });
            }
        }

        let mut packed = pack_file_version(self.file_version, self.licensee_version);
        ar.serialize_i32(&mut packed)?;
        if ar.is_loading() {
            self.file_version = file_engine_version(packed);
            self.licensee_version = file_licensee_version(packed);
            if self.file_version < VER_MIN_SUPPORTED || self.file_version > VER_CURRENT {
                return Err(Error::UnsupportedVersion {
                    path: String::new(),
                    version: self.file_version,
                    min: VER_MIN_SUPPORTED,
                    max: VER_CURRENT,
                });
            }
            let state = ar.state_mut();
            state.version = self.file_version;
            state.licensee_version = self.licensee_version;
        }
        let version = self.file_version;

        if version >= VER_HEADER_SIZE_AND_FOLDER {
            ar.serialize_i32(&mut self.total_header_size)?;
            ar.serialize_string(&mut self.folder_name)?;
        }
        ar.serialize_u32(&mut self.package_flags.0)?;
        ar.serialize_i32(&mut self.name_count)?;
        ar.serialize_i32(&mut self.name_offset)?;
        ar.serialize_i32(&mut self.export_count)?;
        ar.serialize_i32(&mut self.export_offset)?;
        ar.serialize_i32(&mut self.import_count)?;
        ar.serialize_i32(&mut self.import_offset)?;
        if version >= VER_DEPENDS_TABLE {
            ar.serialize_i32(&mut self.depends_offset)?;
        }
        ar.serialize_guid(&mut self.guid)?;
        serialize_vec(ar, &mut self.generations, |ar, g| g.serialize(ar))?;
        if version >= VER_ENGINE_AND_COOK_VERSION {
            ar.serialize_i32(&mut self.engine_version)?;
            ar.serialize_i32(&mut self.cooked_content_version)?;
        }
        if version >= VER_PACKAGE_COMPRESSION {
            ar.serialize_u32(&mut self.compression_flags.0)?;
            serialize_vec(ar, &mut self.compressed_chunks, |ar, c| c.serialize(ar))?;
        }

        if ar.is_loading() {
            self.validate()?;
            upgrade_summary(self, version);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let tables = [
            ("name", self.name_count, self.name_offset),
            ("export", self.export_count, self.export_offset),
            ("import", self.import_count, self.import_offset),
        ];
        for (table, count, offset) in tables {
            if count < 0 || offset < 0 {
                return Err(Error::corrupt(format!("{table} table count {count} offset {offset}")));
            }
        }
        if self.depends_offset < 0 || self.total_header_size < 0 {
            return Err(Error::corrupt("negative header size or depends offset"));
        }
        for chunk in &self.compressed_chunks {
            chunk.validate()?;
        }
        Ok(())
    }

    /// Whether table and export data must be read through the chunk table.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        !self.compression_flags.is_none() && !self.compressed_chunks.is_empty()
    }

    /// The most recent generation, if any.
    pub fn current_generation(&self) -> Option<&GenerationInfo> {
        self.generations.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryReader, MemoryWriter};

    fn sample() -> PackageFileSummary {
        PackageFileSummary {
            total_header_size: 321,
            folder_name: "Maps".into(),
            package_flags: PackageFlags::CONTAINS_MAP,
            name_count: 3,
            name_offset: 100,
            export_count: 2,
            export_offset: 200,
            import_count: 1,
            import_offset: 150,
            depends_offset: 300,
            guid: Guid::new(1, 2, 3, 4),
            generations: vec![GenerationInfo { export_count: 2, name_count: 3, net_object_count: 1 }],
            compression_flags: CompressionFlags::ZLIB,
            compressed_chunks: vec![CompressedChunk {
                uncompressed_offset: 100,
                uncompressed_size: 221,
                compressed_offset: 120,
                compressed_size: 80,
            }],
            ..Default::default()
        }
    }

    fn load(bytes: Vec<u8>) -> Result<(PackageFileSummary, MemoryReader)> {
        let mut reader = MemoryReader::new(bytes);
        let mut summary = PackageFileSummary::default();
        summary.serialize(&mut reader)?;
        Ok((summary, reader))
    }

    #[test]
    fn test_roundtrip_current() {
        let mut summary = sample();
        let mut writer = MemoryWriter::new();
        summary.serialize(&mut writer).unwrap();
        let (back, reader) = load(writer.into_inner()).unwrap();
        assert_eq!(back, summary);
        assert_eq!(reader.remaining(), 0);
        assert!(back.is_compressed());
    }

    #[test]
    fn test_bad_magic() {
        let mut writer = MemoryWriter::new();
        writer.serialize_u32(&mut 0xDEAD_BEEF).unwrap();
        let err = load(writer.into_inner()).unwrap_err().with_path("Broken.pkg");
        assert!(matches!(err, Error::BadMagic { ref path, tag: 0xDEAD_BEEF } if path == "Broken.pkg"));
    }

    #[test]
    fn test_version_bounds() {
        for version in [VER_MIN_SUPPORTED - 1, VER_CURRENT + 1] {
            let mut summary = PackageFileSummary { file_version: version, ..Default::default() };
            let mut writer = MemoryWriter::with_version(version, 0);
            summary.serialize(&mut writer).unwrap();
            let err = load(writer.into_inner()).unwrap_err();
            assert!(matches!(err, Error::UnsupportedVersion { version: v, .. } if v == version));
        }
    }

    #[test]
    fn test_byte_swapped_file() {
        let mut summary = sample();
        let mut writer = MemoryWriter::new();
        writer.state_mut().force_byte_swapping = true;
        summary.serialize(&mut writer).unwrap();

        let (back, reader) = load(writer.into_inner()).unwrap();
        assert_eq!(back, summary);
        assert!(reader.force_byte_swapping());
    }

    #[test]
    fn test_old_version_upgrade() {
        let mut summary = sample();
        summary.file_version = VER_MIN_SUPPORTED;
        let mut writer = MemoryWriter::with_version(VER_MIN_SUPPORTED, 0);
        summary.serialize(&mut writer).unwrap();

        let (back, reader) = load(writer.into_inner()).unwrap();
        assert_eq!(reader.version(), VER_MIN_SUPPORTED);
        assert_eq!(back.name_offset, 100);
        assert_eq!(back.depends_offset, 0);
        assert_eq!(back.folder_name, "None");
        assert!(back.compressed_chunks.is_empty());
        assert_eq!(back.compression_flags, CompressionFlags::NONE);
        assert_eq!(back.engine_version, 0);
        // Net object counts default to the export count
        assert_eq!(back.generations[0].net_object_count, 2);
    }

    #[test]
    fn test_negative_counts_rejected() {
        let mut summary = PackageFileSummary { export_count: -1, ..Default::default() };
        let mut writer = MemoryWriter::new();
        summary.serialize(&mut writer).unwrap();
        assert!(matches!(load(writer.into_inner()), Err(Error::CorruptData(_))));
    }
}
