//! Name interning.
//!
//! A [`Name`] is a pair of (entry index, instance number). The string part
//! lives once in a [`NameTable`]; `"Mesh_3"` and `"Mesh_4"` share the entry
//! `Mesh` and differ only in number. Equality needs both halves equal, and
//! lookups are case-insensitive.
//!
//! Packages store names as indices into their own local table. While loading,
//! each local entry is interned into the process-wide table and every name
//! reference in the file is decoded through that per-linker map
//! (see [`crate::format::NameMapReader`]).

mod table;

pub use table::*;

use crate::stream::Archive;
use crate::util::Result;

/// Interned name with an instance number.
///
/// `number` is stored as suffix + 1; 0 means the name has no suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Name {
    index: u32,
    number: u32,
}

impl Name {
    pub const NONE: Name = Name { index: 0, number: 0 };

    #[inline]
    pub const fn new(index: u32, number: u32) -> Self {
        Self { index, number }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Internal number (suffix + 1, or 0).
    #[inline]
    pub const fn number(self) -> u32 {
        self.number
    }

    /// Displayed numeric suffix, if any.
    #[inline]
    pub const fn suffix(self) -> Option<u32> {
        if self.number == 0 {
            None
        } else {
            Some(self.number - 1)
        }
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.index == 0
    }

    #[inline]
    pub const fn with_number(self, number: u32) -> Self {
        Self { index: self.index, number }
    }

    /// Same entry, ignoring the number.
    #[inline]
    pub const fn base(self) -> Self {
        Self { index: self.index, number: 0 }
    }
}

/// Archive that knows how to encode names for its target.
pub trait NameArchive: Archive {
    fn serialize_name(&mut self, name: &mut Name) -> Result<()>;
}
