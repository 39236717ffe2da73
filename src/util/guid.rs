//! 128-bit package GUID.

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Globally unique package identifier, stored as four 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Guid {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

impl Guid {
    pub const ZERO: Guid = Guid { a: 0, b: 0, c: 0, d: 0 };

    pub const fn new(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self { a, b, c, d }
    }

    /// Derive a GUID from arbitrary bytes (first 16 bytes of a SHA-256 digest).
    pub fn from_content(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(data);
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&digest[i * 4..i * 4 + 4]);
            *word = u32::from_le_bytes(bytes);
        }
        bytemuck::cast(words)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}{:08X}{:08X}{:08X}", self.a, self.b, self.c, self.d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let guid = Guid::new(1, 0xABCDEF, 0, 0xFFFF_FFFF);
        assert_eq!(guid.to_string(), "0000000100ABCDEF00000000FFFFFFFF");
    }

    #[test]
    fn test_from_content_is_stable() {
        let a = Guid::from_content(b"package");
        let b = Guid::from_content(b"package");
        assert_eq!(a, b);
        assert!(!a.is_zero());
        assert_ne!(a, Guid::from_content(b"other"));
    }
}
