//! Codecs and the chunked compressed-block format.
//!
//! A compressed block is laid out as:
//!
//! ```text
//! +---------------------------+
//! | tag: i32 | chunk_size: i32|  header (tag may be byte-swapped)
//! +---------------------------+
//! | compressed | uncompressed |  totals
//! +---------------------------+
//! | compressed | uncompressed |  one pair per chunk
//! | ...                       |
//! +---------------------------+
//! | chunk payloads ...        |
//! +---------------------------+
//! ```

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use super::archive::Archive;
use crate::format::{COMPRESSION_CHUNK_SIZE, PACKAGE_FILE_TAG, PACKAGE_FILE_TAG_SWAPPED};
use crate::util::{Error, Result};

/// Codec selection bits plus compression-only modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompressionFlags(pub u32);

impl CompressionFlags {
    pub const NONE: Self = Self(0x00);
    pub const ZLIB: Self = Self(0x01);
    /// Recognized for compatibility; no codec is available for it.
    pub const LZO: Self = Self(0x02);
    pub const BIAS_MEMORY: Self = Self(0x04);
    pub const BIAS_SPEED: Self = Self(0x08);
    pub const ZSTD: Self = Self(0x10);

    const CODEC_MASK: u32 = 0x01 | 0x02 | 0x10;
    const MODIFIER_MASK: u32 = 0x04 | 0x08;

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 & Self::CODEC_MASK == 0
    }

    /// The selected codec, `None` for uncompressed.
    pub fn codec(self) -> Result<Option<Codec>> {
        if self.0 & !(Self::CODEC_MASK | Self::MODIFIER_MASK) != 0 {
            return Err(Error::UnknownCodec(self.0));
        }
        match self.0 & Self::CODEC_MASK {
            0 => Ok(None),
            0x01 => Ok(Some(Codec::Zlib)),
            0x10 => Ok(Some(Codec::Zstd)),
            _ => Err(Error::UnknownCodec(self.0)),
        }
    }

    /// Flags as persisted: modifiers only steer compression.
    #[inline]
    pub const fn persisted(self) -> Self {
        Self(self.0 & !Self::MODIFIER_MASK)
    }
}

/// Supported codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Zlib,
    Zstd,
}

/// Compress a buffer with the codec selected by `flags`.
pub fn compress_memory(flags: CompressionFlags, src: &[u8]) -> Result<Vec<u8>> {
    match flags.codec()? {
        None => Ok(src.to_vec()),
        Some(Codec::Zlib) => {
            let level = if flags.contains(CompressionFlags::BIAS_SPEED) {
                Compression::fast()
            } else if flags.contains(CompressionFlags::BIAS_MEMORY) {
                Compression::best()
            } else {
                Compression::default()
            };
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(src.len() / 2), level);
            encoder.write_all(src)?;
            encoder.finish().map_err(|e| Error::compression(format!("zlib: {e}")))
        }
        Some(Codec::Zstd) => {
            let level = if flags.contains(CompressionFlags::BIAS_SPEED) {
                1
            } else if flags.contains(CompressionFlags::BIAS_MEMORY) {
                19
            } else {
                3
            };
            zstd::bulk::compress(src, level).map_err(|e| Error::compression(format!("zstd: {e}")))
        }
    }
}

/// Decompress `src` into `dest`, which must be exactly the uncompressed size.
pub fn uncompress_memory(flags: CompressionFlags, src: &[u8], dest: &mut [u8]) -> Result<()> {
    match flags.codec()? {
        None => {
            if src.len() != dest.len() {
                return Err(Error::BufferTooSmall { needed: src.len(), available: dest.len() });
            }
            dest.copy_from_slice(src);
            Ok(())
        }
        Some(Codec::Zlib) => {
            let mut decoder = ZlibDecoder::new(src);
            let mut filled = 0;
            while filled < dest.len() {
                let n = decoder
                    .read(&mut dest[filled..])
                    .map_err(|e| Error::compression(format!("zlib: {e}")))?;
                if n == 0 {
                    return Err(Error::compression(format!(
                        "zlib: stream ended after {filled} of {} bytes",
                        dest.len()
                    )));
                }
                filled += n;
            }
            let mut extra = Vec::new();
            decoder
                .read_to_end(&mut extra)
                .map_err(|e| Error::compression(format!("zlib: {e}")))?;
            if !extra.is_empty() {
                return Err(Error::BufferTooSmall {
                    needed: dest.len() + extra.len(),
                    available: dest.len(),
                });
            }
            Ok(())
        }
        Some(Codec::Zstd) => {
            let written = zstd::bulk::decompress_to_buffer(src, dest)
                .map_err(|e| Error::compression(format!("zstd: {e}")))?;
            if written != dest.len() {
                return Err(Error::compression(format!(
                    "zstd: produced {written} of {} bytes",
                    dest.len()
                )));
            }
            Ok(())
        }
    }
}

/// Largest uncompressed size accepted per compressed byte when a size read
/// from a file decides an allocation.
pub const MAX_INFLATE_RATIO: u64 = 1 << 15;

/// Upper bound on what `compressed` bytes may inflate to.
#[inline]
pub fn inflate_limit(compressed: u64) -> u64 {
    compressed.saturating_mul(MAX_INFLATE_RATIO)
}

/// Compressed-block helper behind [`Archive::serialize_compressed`].
pub fn serialize_compressed<A: Archive + ?Sized>(
    ar: &mut A,
    data: &mut [u8],
    flags: CompressionFlags,
) -> Result<()> {
    serialize_compressed_chunked(ar, data, flags, COMPRESSION_CHUNK_SIZE)
}

/// Same as [`serialize_compressed`] with an explicit chunk size used when saving.
pub fn serialize_compressed_chunked<A: Archive + ?Sized>(
    ar: &mut A,
    data: &mut [u8],
    flags: CompressionFlags,
    chunk_size: u32,
) -> Result<()> {
    if flags.is_none() {
        flags.codec()?;
        return ar.serialize(data);
    }
    if ar.is_loading() {
        load_compressed(ar, data, flags)
    } else {
        save_compressed(ar, data, flags, chunk_size.max(1))
    }
}

fn load_compressed<A: Archive + ?Sized>(
    ar: &mut A,
    data: &mut [u8],
    flags: CompressionFlags,
) -> Result<()> {
    let was_swapping = ar.force_byte_swapping();

    let mut tag = 0u32;
    let mut chunk_size = 0i32;
    ar.serialize_u32(&mut tag)?;
    if tag == PACKAGE_FILE_TAG_SWAPPED {
        ar.state_mut().force_byte_swapping = !was_swapping;
    } else if tag != PACKAGE_FILE_TAG {
        return Err(Error::compression(format!("bad compressed block tag {tag:#010x}")));
    }
    // Swapping is already toggled, so the rest of the block reads in order
    ar.serialize_i32(&mut chunk_size)?;

    let result = load_chunks(ar, data, flags, chunk_size);
    ar.state_mut().force_byte_swapping = was_swapping;
    result
}

fn load_chunks<A: Archive + ?Sized>(
    ar: &mut A,
    data: &mut [u8],
    flags: CompressionFlags,
    chunk_size: i32,
) -> Result<()> {
    if chunk_size <= 0 {
        return Err(Error::compression(format!("invalid chunk size {chunk_size}")));
    }
    let (mut total_compressed, mut total_uncompressed) = (0i32, 0i32);
    ar.serialize_i32(&mut total_compressed)?;
    ar.serialize_i32(&mut total_uncompressed)?;
    if total_compressed < 0 || total_compressed as u64 > ar.remaining() {
        return Err(Error::compression(format!(
            "block claims {total_compressed} compressed bytes, {} remain",
            ar.remaining()
        )));
    }
    if total_uncompressed < 0 || total_uncompressed as usize != data.len() {
        return Err(Error::BufferTooSmall {
            needed: total_uncompressed.max(0) as usize,
            available: data.len(),
        });
    }

    let chunk_size = chunk_size as usize;
    let chunk_count = data.len().div_ceil(chunk_size);
    let mut infos = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        let (mut compressed, mut uncompressed) = (0i32, 0i32);
        ar.serialize_i32(&mut compressed)?;
        ar.serialize_i32(&mut uncompressed)?;
        if compressed < 0 || uncompressed < 0 {
            return Err(Error::compression("negative chunk size"));
        }
        infos.push((compressed as usize, uncompressed as usize));
    }

    let mut offset = 0usize;
    let mut scratch = Vec::new();
    for (compressed, uncompressed) in infos {
        let end = offset + uncompressed;
        if end > data.len() {
            return Err(Error::BufferTooSmall { needed: end, available: data.len() });
        }
        if compressed as u64 > ar.remaining() {
            return Err(Error::compression(format!("chunk of {compressed} bytes, {} remain", ar.remaining())));
        }
        scratch.resize(compressed, 0);
        ar.serialize(&mut scratch)?;
        uncompress_memory(flags, &scratch, &mut data[offset..end])?;
        offset = end;
    }
    if offset != data.len() {
        return Err(Error::compression(format!("chunks cover {offset} of {} bytes", data.len())));
    }
    Ok(())
}

fn save_compressed<A: Archive + ?Sized>(
    ar: &mut A,
    data: &mut [u8],
    flags: CompressionFlags,
    chunk_size: u32,
) -> Result<()> {
    let compressed: Vec<Vec<u8>> = data
        .chunks(chunk_size as usize)
        .map(|chunk| compress_memory(flags, chunk))
        .collect::<Result<_>>()?;

    let mut total_compressed = to_i32(compressed.iter().map(Vec::len).sum())?;
    let mut total_uncompressed = to_i32(data.len())?;

    let mut tag = PACKAGE_FILE_TAG;
    let mut chunk_size_field = to_i32(chunk_size as usize)?;
    ar.serialize_u32(&mut tag)?;
    ar.serialize_i32(&mut chunk_size_field)?;
    ar.serialize_i32(&mut total_compressed)?;
    ar.serialize_i32(&mut total_uncompressed)?;
    for (payload, chunk) in compressed.iter().zip(data.chunks(chunk_size as usize)) {
        ar.serialize_i32(&mut to_i32(payload.len())?)?;
        ar.serialize_i32(&mut to_i32(chunk.len())?)?;
    }
    for mut payload in compressed {
        ar.serialize(&mut payload)?;
    }
    Ok(())
}

fn to_i32(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::compression(format!("size {value} exceeds 32 bits")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryReader, MemoryWriter};

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 7) % 251) as u8 ^ (i / 1000) as u8).collect()
    }

    #[test]
    fn test_memory_roundtrip_all_codecs() {
        let data = sample(10_000);
        for flags in [
            CompressionFlags::ZLIB,
            CompressionFlags::ZLIB.union(CompressionFlags::BIAS_SPEED),
            CompressionFlags::ZSTD,
            CompressionFlags::ZSTD.union(CompressionFlags::BIAS_MEMORY),
        ] {
            let compressed = compress_memory(flags, &data).unwrap();
            // Compressed should be smaller
            assert!(compressed.len() < data.len());
            let mut back = vec![0u8; data.len()];
            uncompress_memory(flags, &compressed, &mut back).unwrap();
            assert_eq!(back, data);
        }
    }

    #[test]
    fn test_destination_too_small() {
        let data = sample(1000);
        let compressed = compress_memory(CompressionFlags::ZLIB, &data).unwrap();
        let mut small = vec![0u8; 999];
        let err = uncompress_memory(CompressionFlags::ZLIB, &compressed, &mut small).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { needed: 1000, available: 999 }));
    }

    #[test]
    fn test_unknown_codec() {
        assert!(matches!(CompressionFlags::LZO.codec(), Err(Error::UnknownCodec(0x02))));
        assert!(matches!(CompressionFlags(0x100).codec(), Err(Error::UnknownCodec(_))));
        assert!(compress_memory(CompressionFlags::LZO, b"abc").is_err());
    }

    #[test]
    fn test_block_roundtrip_multiple_chunks() {
        let mut data = sample(5000);
        let mut writer = MemoryWriter::new();
        serialize_compressed_chunked(&mut writer, &mut data, CompressionFlags::ZLIB, 1024).unwrap();

        let mut reader = MemoryReader::new(writer.into_inner());
        let mut back = vec![0u8; 5000];
        reader.serialize_compressed(&mut back, CompressionFlags::ZLIB).unwrap();
        assert_eq!(back, data);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_block_swapped_header() {
        let mut data = sample(3000);
        let mut writer = MemoryWriter::new();
        writer.state_mut().force_byte_swapping = true;
        writer.serialize_compressed(&mut data, CompressionFlags::ZSTD).unwrap();

        // Reader does not know the block is swapped; the tag tells it
        let mut reader = MemoryReader::new(writer.into_inner());
        let mut back = vec![0u8; 3000];
        reader.serialize_compressed(&mut back, CompressionFlags::ZSTD).unwrap();
        assert_eq!(back, data);
        assert!(!reader.force_byte_swapping());
    }

    #[test]
    fn test_block_length_mismatch() {
        let mut data = sample(100);
        let mut writer = MemoryWriter::new();
        writer.serialize_compressed(&mut data, CompressionFlags::ZLIB).unwrap();
        let mut reader = MemoryReader::new(writer.into_inner());
        let mut back = vec![0u8; 50];
        assert!(matches!(
            reader.serialize_compressed(&mut back, CompressionFlags::ZLIB),
            Err(Error::BufferTooSmall { needed: 100, available: 50 })
        ));
    }

    #[test]
    fn test_empty_block() {
        let mut writer = MemoryWriter::new();
        writer.serialize_compressed(&mut [], CompressionFlags::ZLIB).unwrap();
        let mut reader = MemoryReader::new(writer.into_inner());
        reader.serialize_compressed(&mut [], CompressionFlags::ZLIB).unwrap();
        assert_eq!(reader.remaining(), 0);
    }

    fn block_header(fields: [i32; 5]) -> MemoryReader {
        let mut writer = MemoryWriter::new();
        let mut tag = PACKAGE_FILE_TAG;
        writer.serialize_u32(&mut tag).unwrap();
        for mut field in fields {
            writer.serialize_i32(&mut field).unwrap();
        }
        MemoryReader::new(writer.into_inner())
    }

    #[test]
    fn test_block_sizes_bounded_by_stream() {
        // Totals larger than the stream
        let mut reader = block_header([1024, 1_000_000_000, 100, 4, 100]);
        let mut back = vec![0u8; 100];
        assert!(matches!(
            reader.serialize_compressed(&mut back, CompressionFlags::ZLIB),
            Err(Error::Compression(_))
        ));

        // One chunk claiming far more than is left
        let mut reader = block_header([1024, 0, 100, 2_000_000_000, 100]);
        assert!(matches!(
            reader.serialize_compressed(&mut back, CompressionFlags::ZLIB),
            Err(Error::Compression(_))
        ));
    }

    #[test]
    fn test_inflate_limit_saturates() {
        assert_eq!(inflate_limit(2), 2 * MAX_INFLATE_RATIO);
        assert_eq!(inflate_limit(u64::MAX), u64::MAX);
    }
}
