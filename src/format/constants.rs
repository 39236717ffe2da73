//! Package format constants and version helpers.

/// Tag at the start of every package and every compressed block.
pub const PACKAGE_FILE_TAG: u32 = 0x9E2A_83C1;

/// Tag as read from a file written with the opposite byte order.
pub const PACKAGE_FILE_TAG_SWAPPED: u32 = 0xC183_2A9E;

/// File extension used to locate packages by name.
pub const PACKAGE_EXTENSION: &str = "pkg";

/// Oldest version this crate can load.
pub const VER_MIN_SUPPORTED: u16 = 100;

/// Summary gained the total header size and folder name.
pub const VER_HEADER_SIZE_AND_FOLDER: u16 = 101;

/// Summary gained the depends table offset.
pub const VER_DEPENDS_TABLE: u16 = 102;

/// Generations gained net object counts; exports gained per-generation counts and a GUID.
pub const VER_NET_OBJECT_COUNTS: u16 = 103;

/// Summary gained engine and cooked content versions.
pub const VER_ENGINE_AND_COOK_VERSION: u16 = 104;

/// Summary gained compression flags and the compressed chunk table.
pub const VER_PACKAGE_COMPRESSION: u16 = 105;

/// Exports gained the component map.
pub const VER_COMPONENT_MAP: u16 = 106;

/// Version written by this crate.
pub const VER_CURRENT: u16 = VER_COMPONENT_MAP;

/// Licensee version written by this crate.
pub const LICENSEE_VER_CURRENT: u16 = 0;

/// Engine build stamped into saved summaries.
pub const ENGINE_VERSION_CURRENT: i32 = 4200;

/// Cooker version stamped into saved summaries.
pub const COOKED_CONTENT_VERSION_CURRENT: i32 = 1;

/// Uncompressed size of one compression chunk.
pub const COMPRESSION_CHUNK_SIZE: u32 = 131_072;

/// Buckets in a linker's export hash.
pub const EXPORT_HASH_BUCKETS: usize = 256;

/// Marks an export that is a top-level package folded into this file.
pub const EXPORT_FORCED: u32 = 0x0000_0001;

/// Pack engine (low) and licensee (high) versions into one field.
#[inline]
pub const fn pack_file_version(engine: u16, licensee: u16) -> i32 {
    ((licensee as u32) << 16 | engine as u32) as i32
}

/// Engine half of a packed file version.
#[inline]
pub const fn file_engine_version(packed: i32) -> u16 {
    (packed as u32 & 0xFFFF) as u16
}

/// Licensee half of a packed file version.
#[inline]
pub const fn file_licensee_version(packed: i32) -> u16 {
    (packed as u32 >> 16) as u16
}

/// Package-level flags stored in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PackageFlags(pub u32);

impl PackageFlags {
    pub const NONE: Self = Self(0);
    /// Safe to load without user interaction.
    pub const ALLOW_DOWNLOAD: Self = Self(0x0000_0001);
    /// Needed by clients as well as servers.
    pub const CLIENT_OPTIONAL: Self = Self(0x0000_0002);
    /// Contains map data.
    pub const CONTAINS_MAP: Self = Self(0x0000_0004);
    /// Body past the summary is stored in compressed chunks.
    pub const STORE_COMPRESSED: Self = Self(0x0200_0000);
    /// Whole file is one compressed stream.
    pub const STORE_FULLY_COMPRESSED: Self = Self(0x0400_0000);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}
