//! Object flags.

use std::ops::{BitOr, BitOrAssign};

/// Per-object flag word. The low 32 bits are persisted in export records;
/// the high bits only exist while loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectFlags(pub u64);

impl ObjectFlags {
    pub const NONE: Self = Self(0);
    /// Visible outside its package.
    pub const PUBLIC: Self = Self(0x0000_0001);
    /// Kept even when nothing references it.
    pub const STANDALONE: Self = Self(0x0000_0002);
    /// Defined by code rather than data.
    pub const NATIVE: Self = Self(0x0000_0004);
    /// Default object of a class.
    pub const CLASS_DEFAULT: Self = Self(0x0000_0008);

    /// Serial data has not been read yet.
    pub const NEED_LOAD: Self = Self(1 << 32);
    /// Read but the post-load hook has not run.
    pub const NEED_POST_LOAD: Self = Self(1 << 33);
    /// Created by the current async loading pass.
    pub const ASYNC_LOADING: Self = Self(1 << 34);

    const PERSISTENT_MASK: u64 = 0xFFFF_FFFF;

    /// Flags owned by the load machinery.
    pub const LOAD_CONTEXT_FLAGS: Self = Self(Self::NEED_LOAD.0 | Self::NEED_POST_LOAD.0 | Self::ASYNC_LOADING.0);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Only the bits stored on disk.
    #[inline]
    pub const fn persistent(self) -> Self {
        Self(self.0 & Self::PERSISTENT_MASK)
    }
}

impl BitOr for ObjectFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ObjectFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
