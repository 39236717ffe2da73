//! Bulk data: large flat payloads stored inline in an export, optionally
//! through the compressed-block format.

use bytemuck::Pod;

use crate::stream::{inflate_limit, Archive, CompressionFlags};
use crate::util::{Error, Result};

/// Array of fixed-size elements held as raw bytes.
///
/// ```text
/// flags: u32 | element_count: i32 | element_size: i32 | byte_size: i32
/// data (raw, or one compressed block when flags select a codec)
/// ```
///
/// Elements are stored in memory order; callers own their byte order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkData {
    pub flags: CompressionFlags,
    element_size: usize,
    data: Vec<u8>,
}

impl BulkData {
    pub fn new(flags: CompressionFlags) -> Self {
        Self { flags, element_size: 1, data: Vec::new() }
    }

    pub fn from_slice<T: Pod>(values: &[T], flags: CompressionFlags) -> Self {
        Self {
            flags,
            element_size: std::mem::size_of::<T>(),
            data: bytemuck::cast_slice(values).to_vec(),
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn element_count(&self) -> usize {
        if self.element_size == 0 {
            0
        } else {
            self.data.len() / self.element_size
        }
    }

    /// Copy out as typed elements.
    pub fn to_vec<T: Pod>(&self) -> Result<Vec<T>> {
        if std::mem::size_of::<T>() != self.element_size {
            return Err(Error::corrupt(format!(
                "bulk data of {}-byte elements read as {}-byte elements",
                self.element_size,
                std::mem::size_of::<T>()
            )));
        }
        Ok(bytemuck::pod_collect_to_vec(&self.data))
    }

    /// Borrow as typed elements; fails when the buffer is misaligned for `T`.
    pub fn as_slice<T: Pod>(&self) -> Result<&[T]> {
        bytemuck::try_cast_slice(&self.data).map_err(|e| Error::corrupt(format!("bulk data cast: {e}")))
    }

    pub fn serialize<A: Archive + ?Sized>(&mut self, ar: &mut A) -> Result<()> {
        let mut flags = self.flags.persisted().bits();
        let mut element_count = to_i32(self.element_count())?;
        let mut element_size = to_i32(self.element_size)?;
        let mut byte_size = to_i32(self.data.len())?;
        ar.serialize_u32(&mut flags)?;
        ar.serialize_i32(&mut element_count)?;
        ar.serialize_i32(&mut element_size)?;
        ar.serialize_i32(&mut byte_size)?;

        if ar.is_loading() {
            if element_count < 0 || element_size < 0 || byte_size < 0 {
                return Err(Error::corrupt("negative bulk data size"));
            }
            if element_count as i64 * element_size as i64 != byte_size as i64 {
                return Err(Error::corrupt(format!(
                    "bulk data of {element_count} x {element_size} bytes claims {byte_size} bytes"
                )));
            }
            let flags = CompressionFlags(flags);
            let limit = if flags.is_none() { ar.remaining() } else { inflate_limit(ar.remaining()) };
            if byte_size as u64 > limit {
                return Err(Error::UnexpectedEof(ar.tell() + byte_size as u64));
            }
            self.flags = flags;
            self.element_size = element_size as usize;
            self.data = vec![0u8; byte_size as usize];
        }
        let flags = self.flags;
        ar.serialize_compressed(&mut self.data, flags)
    }
}

fn to_i32(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::corrupt(format!("bulk data size {value} too large")))
}
