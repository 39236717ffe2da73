//! The `Archive` capability interface and its typed helpers.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::compression::{self, CompressionFlags};
use crate::format::{LICENSEE_VER_CURRENT, VER_CURRENT};
use crate::util::{Error, Guid, Result};

/// Upper bound on serialized string lengths (in characters).
pub const MAX_STRING_LEN: i32 = 1 << 20;

/// Mode flags queried by everything that serializes through an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveState {
    pub loading: bool,
    pub saving: bool,
    /// Data outlives the process (files), so it has a fixed byte order.
    pub persistent: bool,
    pub transacting: bool,
    pub force_byte_swapping: bool,
    /// Engine part of the file version being read or written.
    pub version: u16,
    pub licensee_version: u16,
}

impl ArchiveState {
    /// Persistent loading state at the current version.
    pub fn loading() -> Self {
        Self {
            loading: true,
            saving: false,
            persistent: true,
            transacting: false,
            force_byte_swapping: false,
            version: VER_CURRENT,
            licensee_version: LICENSEE_VER_CURRENT,
        }
    }

    /// Persistent saving state at the current version.
    pub fn saving() -> Self {
        Self { loading: false, saving: true, ..Self::loading() }
    }
}

/// Byte order of multi-byte primitives on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireOrder {
    Little,
    Big,
}

impl WireOrder {
    #[inline]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    #[inline]
    pub const fn flip(self) -> Self {
        match self {
            Self::Little => Self::Big,
            Self::Big => Self::Little,
        }
    }

    /// Persistent streams are little-endian, in-memory streams are native;
    /// `force_byte_swapping` flips either.
    #[inline]
    pub fn for_state(state: &ArchiveState) -> Self {
        let base = if state.persistent { Self::Little } else { Self::native() };
        if state.force_byte_swapping {
            base.flip()
        } else {
            base
        }
    }
}

macro_rules! typed_serialize {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $size:expr, $read:ident, $write:ident) => {
        $(#[$meta])*
        fn $name(&mut self, value: &mut $ty) -> Result<()> {
            let mut buf = [0u8; $size];
            let order = self.wire_order();
            if self.is_loading() {
                self.serialize(&mut buf)?;
                *value = match order {
                    WireOrder::Little => LittleEndian::$read(&buf),
                    WireOrder::Big => BigEndian::$read(&buf),
                };
                Ok(())
            } else {
                match order {
                    WireOrder::Little => LittleEndian::$write(&mut buf, *value),
                    WireOrder::Big => BigEndian::$write(&mut buf, *value),
                }
                self.serialize(&mut buf)
            }
        }
    };
}

/// Sequential, bidirectional byte cursor.
///
/// A loading archive fills the buffers handed to [`Archive::serialize`]; a
/// saving archive consumes them. Every typed helper is built on that single
/// primitive, so reads mirror writes exactly.
pub trait Archive {
    fn state(&self) -> &ArchiveState;
    fn state_mut(&mut self) -> &mut ArchiveState;

    /// Move `data.len()` bytes between the stream and `data`.
    fn serialize(&mut self, data: &mut [u8]) -> Result<()>;

    /// Current position.
    fn tell(&self) -> u64;

    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Total addressable size (logical size for compressed files).
    fn total_size(&self) -> u64;

    /// Start reading `[offset, offset+size)` in the background without moving
    /// the position. Returns `true` once the range is available.
    fn precache(&mut self, _offset: u64, _size: u64) -> Result<bool> {
        Ok(true)
    }

    #[inline]
    fn is_loading(&self) -> bool {
        self.state().loading
    }

    #[inline]
    fn is_saving(&self) -> bool {
        self.state().saving
    }

    #[inline]
    fn is_persistent(&self) -> bool {
        self.state().persistent
    }

    #[inline]
    fn is_transacting(&self) -> bool {
        self.state().transacting
    }

    #[inline]
    fn force_byte_swapping(&self) -> bool {
        self.state().force_byte_swapping
    }

    #[inline]
    fn version(&self) -> u16 {
        self.state().version
    }

    #[inline]
    fn wire_order(&self) -> WireOrder {
        WireOrder::for_state(self.state())
    }

    /// Bytes left between the position and the end of the stream.
    #[inline]
    fn remaining(&self) -> u64 {
        self.total_size().saturating_sub(self.tell())
    }

    fn serialize_u8(&mut self, value: &mut u8) -> Result<()> {
        let mut buf = [*value];
        self.serialize(&mut buf)?;
        *value = buf[0];
        Ok(())
    }

    fn serialize_i8(&mut self, value: &mut i8) -> Result<()> {
        let mut byte = *value as u8;
        self.serialize_u8(&mut byte)?;
        *value = byte as i8;
        Ok(())
    }

    typed_serialize!(serialize_u16, u16, 2, read_u16, write_u16);
    typed_serialize!(serialize_i16, i16, 2, read_i16, write_i16);
    typed_serialize!(serialize_u32, u32, 4, read_u32, write_u32);
    typed_serialize!(serialize_i32, i32, 4, read_i32, write_i32);
    typed_serialize!(serialize_u64, u64, 8, read_u64, write_u64);
    typed_serialize!(serialize_i64, i64, 8, read_i64, write_i64);
    typed_serialize!(serialize_f32, f32, 4, read_f32, write_f32);
    typed_serialize!(serialize_f64, f64, 8, read_f64, write_f64);

    /// Booleans are stored as 32-bit integers.
    fn serialize_bool(&mut self, value: &mut bool) -> Result<()> {
        let mut word = u32::from(*value);
        self.serialize_u32(&mut word)?;
        if self.is_loading() {
            *value = word != 0;
        }
        Ok(())
    }

    fn serialize_guid(&mut self, guid: &mut Guid) -> Result<()> {
        self.serialize_u32(&mut guid.a)?;
        self.serialize_u32(&mut guid.b)?;
        self.serialize_u32(&mut guid.c)?;
        self.serialize_u32(&mut guid.d)
    }

    /// Array length prefix. Rejects negative counts and counts that cannot
    /// fit in the rest of the stream.
    fn serialize_count(&mut self, count: &mut usize) -> Result<()> {
        if self.is_loading() {
            let mut raw = 0i32;
            self.serialize_i32(&mut raw)?;
            if raw < 0 {
                return Err(Error::corrupt(format!("negative array count {raw}")));
            }
            if raw as u64 > self.remaining() {
                return Err(Error::corrupt(format!(
                    "array count {raw} exceeds remaining {} bytes",
                    self.remaining()
                )));
            }
            *count = raw as usize;
            Ok(())
        } else {
            let mut raw = i32::try_from(*count)
                .map_err(|_| Error::corrupt(format!("array count {count} too large")))?;
            self.serialize_i32(&mut raw)
        }
    }

    /// Length-prefixed string. Positive length: Latin-1 bytes, negative: UTF-16
    /// units; both include a NUL terminator. Empty strings are length 0.
    fn serialize_string(&mut self, value: &mut String) -> Result<()> {
        if self.is_loading() {
            let mut len = 0i32;
            self.serialize_i32(&mut len)?;
            if len == 0 {
                value.clear();
                return Ok(());
            }
            if len > MAX_STRING_LEN || len < -MAX_STRING_LEN {
                return Err(Error::corrupt(format!("string length {len} out of range")));
            }
            if len > 0 {
                let mut bytes = vec![0u8; len as usize];
                self.serialize(&mut bytes)?;
                if bytes.pop() != Some(0) {
                    return Err(Error::corrupt("string is not NUL-terminated"));
                }
                *value = bytes.iter().map(|&b| b as char).collect();
            } else {
                let mut units = vec![0u16; (-len) as usize];
                for unit in units.iter_mut() {
                    self.serialize_u16(unit)?;
                }
                if units.pop() != Some(0) {
                    return Err(Error::corrupt("string is not NUL-terminated"));
                }
                *value = String::from_utf16(&units)
                    .map_err(|e| Error::corrupt(format!("invalid UTF-16 string: {e}")))?;
            }
            Ok(())
        } else {
            if value.is_empty() {
                return self.serialize_i32(&mut 0);
            }
            if value.chars().all(|c| (c as u32) < 0x100) {
                let mut bytes: Vec<u8> = value.chars().map(|c| c as u8).collect();
                bytes.push(0);
                let mut len = string_len(bytes.len())?;
                self.serialize_i32(&mut len)?;
                self.serialize(&mut bytes)
            } else {
                let mut units: Vec<u16> = value.encode_utf16().collect();
                units.push(0);
                let mut len = -string_len(units.len())?;
                self.serialize_i32(&mut len)?;
                for unit in units.iter_mut() {
                    self.serialize_u16(unit)?;
                }
                Ok(())
            }
        }
    }

    /// Bulk payload through the chunked compressed-block format.
    fn serialize_compressed(&mut self, data: &mut [u8], flags: CompressionFlags) -> Result<()> {
        compression::serialize_compressed(self, data, flags)
    }
}

fn string_len(len: usize) -> Result<i32> {
    i32::try_from(len)
        .ok()
        .filter(|&l| l <= MAX_STRING_LEN)
        .ok_or_else(|| Error::corrupt(format!("string of {len} characters too long")))
}

/// Serialize a length-prefixed array, one element at a time.
pub fn serialize_vec<A, T, F>(ar: &mut A, items: &mut Vec<T>, mut each: F) -> Result<()>
where
    A: Archive + ?Sized,
    T: Default,
    F: FnMut(&mut A, &mut T) -> Result<()>,
{
    let mut count = items.len();
    ar.serialize_count(&mut count)?;
    if ar.is_loading() {
        items.clear();
        items.reserve(count);
        for _ in 0..count {
            let mut item = T::default();
            each(ar, &mut item)?;
            items.push(item);
        }
    } else {
        for item in items.iter_mut() {
            each(ar, item)?;
        }
    }
    Ok(())
}

impl<A: Archive + ?Sized> Archive for Box<A> {
    #[inline]
    fn state(&self) -> &ArchiveState {
        (**self).state()
    }

    #[inline]
    fn state_mut(&mut self) -> &mut ArchiveState {
        (**self).state_mut()
    }

    #[inline]
    fn serialize(&mut self, data: &mut [u8]) -> Result<()> {
        (**self).serialize(data)
    }

    #[inline]
    fn tell(&self) -> u64 {
        (**self).tell()
    }

    #[inline]
    fn seek(&mut self, pos: u64) -> Result<()> {
        (**self).seek(pos)
    }

    #[inline]
    fn total_size(&self) -> u64 {
        (**self).total_size()
    }

    #[inline]
    fn precache(&mut self, offset: u64, size: u64) -> Result<bool> {
        (**self).precache(offset, size)
    }
}

impl<A: Archive + ?Sized> Archive for &mut A {
    #[inline]
    fn state(&self) -> &ArchiveState {
        (**self).state()
    }

    #[inline]
    fn state_mut(&mut self) -> &mut ArchiveState {
        (**self).state_mut()
    }

    #[inline]
    fn serialize(&mut self, data: &mut [u8]) -> Result<()> {
        (**self).serialize(data)
    }

    #[inline]
    fn tell(&self) -> u64 {
        (**self).tell()
    }

    #[inline]
    fn seek(&mut self, pos: u64) -> Result<()> {
        (**self).seek(pos)
    }

    #[inline]
    fn total_size(&self) -> u64 {
        (**self).total_size()
    }

    #[inline]
    fn precache(&mut self, offset: u64, size: u64) -> Result<bool> {
        (**self).precache(offset, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryReader, MemoryWriter};

    fn roundtrip<F>(swap: bool, write: F) -> MemoryReader
    where
        F: FnOnce(&mut MemoryWriter),
    {
        let mut writer = MemoryWriter::new();
        writer.state_mut().force_byte_swapping = swap;
        write(&mut writer);
        let mut reader = MemoryReader::new(writer.into_inner());
        reader.state_mut().force_byte_swapping = swap;
        reader
    }

    #[test]
    fn test_primitives_roundtrip_both_orders() {
        for swap in [false, true] {
            let mut reader = roundtrip(swap, |w| {
                w.serialize_u16(&mut 0xBEEF).unwrap();
                w.serialize_i32(&mut -123_456).unwrap();
                w.serialize_u64(&mut 0x0123_4567_89AB_CDEF).unwrap();
                w.serialize_f32(&mut f32::from_bits(0x7FC0_0001)).unwrap();
                w.serialize_f64(&mut -0.0).unwrap();
                w.serialize_bool(&mut true).unwrap();
                w.serialize_i8(&mut -5).unwrap();
            });

            let (mut a, mut b, mut c) = (0u16, 0i32, 0u64);
            let (mut d, mut e, mut f, mut g) = (0f32, 0f64, false, 0i8);
            reader.serialize_u16(&mut a).unwrap();
            reader.serialize_i32(&mut b).unwrap();
            reader.serialize_u64(&mut c).unwrap();
            reader.serialize_f32(&mut d).unwrap();
            reader.serialize_f64(&mut e).unwrap();
            reader.serialize_bool(&mut f).unwrap();
            reader.serialize_i8(&mut g).unwrap();

            assert_eq!(a, 0xBEEF);
            assert_eq!(b, -123_456);
            assert_eq!(c, 0x0123_4567_89AB_CDEF);
            // NaN payload must survive bit-for-bit
            assert_eq!(d.to_bits(), 0x7FC0_0001);
            assert_eq!(e.to_bits(), (-0.0f64).to_bits());
            assert!(f);
            assert_eq!(g, -5);
        }
    }

    #[test]
    fn test_persistent_is_little_endian() {
        let mut writer = MemoryWriter::new();
        writer.serialize_u32(&mut 0x1122_3344).unwrap();
        assert_eq!(writer.data(), &[0x44, 0x33, 0x22, 0x11]);

        let mut swapped = MemoryWriter::new();
        swapped.state_mut().force_byte_swapping = true;
        swapped.serialize_u32(&mut 0x1122_3344).unwrap();
        assert_eq!(swapped.data(), &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_wire_order_rules() {
        let mut state = ArchiveState::loading();
        assert_eq!(WireOrder::for_state(&state), WireOrder::Little);
        state.force_byte_swapping = true;
        assert_eq!(WireOrder::for_state(&state), WireOrder::Big);
        state.persistent = false;
        assert_eq!(WireOrder::for_state(&state), WireOrder::native().flip());
    }

    #[test]
    fn test_strings() {
        let mut reader = roundtrip(false, |w| {
            w.serialize_string(&mut "Hello".to_string()).unwrap();
            w.serialize_string(&mut String::new()).unwrap();
            w.serialize_string(&mut "caf\u{e9}".to_string()).unwrap();
            w.serialize_string(&mut "\u{65e5}\u{672c}".to_string()).unwrap();
        });
        let mut s = String::new();
        reader.serialize_string(&mut s).unwrap();
        assert_eq!(s, "Hello");
        reader.serialize_string(&mut s).unwrap();
        assert_eq!(s, "");
        reader.serialize_string(&mut s).unwrap();
        assert_eq!(s, "caf\u{e9}");
        reader.serialize_string(&mut s).unwrap();
        assert_eq!(s, "\u{65e5}\u{672c}");
    }

    #[test]
    fn test_string_layout() {
        let mut writer = MemoryWriter::new();
        writer.serialize_string(&mut "ab".to_string()).unwrap();
        assert_eq!(writer.data(), &[3, 0, 0, 0, b'a', b'b', 0]);

        let mut writer = MemoryWriter::new();
        writer.serialize_string(&mut "\u{3b1}".to_string()).unwrap();
        // -2 units: alpha + NUL
        assert_eq!(writer.data(), &[0xFE, 0xFF, 0xFF, 0xFF, 0xB1, 0x03, 0, 0]);
    }

    #[test]
    fn test_string_missing_terminator() {
        let mut s = String::new();
        let mut reader = MemoryReader::new(vec![3, 0, 0, 0, b'a', b'b', b'c']);
        assert!(matches!(reader.serialize_string(&mut s), Err(Error::CorruptData(_))));

        let mut reader = MemoryReader::new(vec![0xFE, 0xFF, 0xFF, 0xFF, 0xB1, 0x03, 0x42, 0]);
        assert!(matches!(reader.serialize_string(&mut s), Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_bad_counts() {
        let mut writer = MemoryWriter::new();
        writer.serialize_i32(&mut -1).unwrap();
        let mut reader = MemoryReader::new(writer.into_inner());
        let mut count = 0usize;
        assert!(matches!(reader.serialize_count(&mut count), Err(Error::CorruptData(_))));

        let mut writer = MemoryWriter::new();
        writer.serialize_i32(&mut 1000).unwrap();
        let mut reader = MemoryReader::new(writer.into_inner());
        assert!(reader.serialize_count(&mut count).is_err());
    }

    #[test]
    fn test_serialize_vec() {
        let mut values = vec![3i32, 1, 4, 1, 5];
        let mut writer = MemoryWriter::new();
        serialize_vec(&mut writer, &mut values, |ar, v| ar.serialize_i32(v)).unwrap();

        let mut reader = MemoryReader::new(writer.into_inner());
        let mut back: Vec<i32> = Vec::new();
        serialize_vec(&mut reader, &mut back, |ar, v| ar.serialize_i32(v)).unwrap();
        assert_eq!(back, values);
    }
}
