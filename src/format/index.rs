//! Package index: signed reference into one linker's tables.

use std::fmt;

use crate::stream::Archive;
use crate::util::Result;

/// `0` is the root package, `i > 0` is export `i - 1`, `i < 0` is import `-i - 1`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PackageIndex(i32);

impl PackageIndex {
    /// Root package, also used as "no reference".
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn from_export(index: usize) -> Self {
        Self(index as i32 + 1)
    }

    #[inline]
    pub const fn from_import(index: usize) -> Self {
        Self(-(index as i32) - 1)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_export(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_import(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn to_export(self) -> Option<usize> {
        if self.0 > 0 {
            Some(self.0 as usize - 1)
        } else {
            None
        }
    }

    #[inline]
    pub const fn to_import(self) -> Option<usize> {
        if self.0 < 0 {
            Some((-(self.0 as i64) - 1) as usize)
        } else {
            None
        }
    }

    pub fn serialize<A: Archive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        ar.serialize_i32(&mut self.0)
    }
}

impl fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.to_export(), self.to_import()) {
            (Some(i), _) => write!(f, "Export({i})"),
            (_, Some(i)) => write!(f, "Import({i})"),
            _ => write!(f, "Root"),
        }
    }
}
