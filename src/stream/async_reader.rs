//! Double-buffered precaching package reader.
//!
//! Two buffers (current and next) each hold one contiguous logical range and
//! an optional in-flight [`Completion`]. For compressed packages a buffer
//! holds exactly one decompressed chunk, and a request for chunk `i` also
//! starts chunk `i + 1` in the other buffer. Logical offsets below the first
//! chunk are the uncompressed header and are read raw.

use std::sync::Arc;

use super::archive::{Archive, ArchiveState};
use super::completion::{dispatch, Completion};
use super::compression::{inflate_limit, CompressionFlags};
use super::memory::MemoryReader;
use super::source::ByteSource;
use crate::format::CompressedChunk;
use crate::util::{Error, IoMode, Result};

const CURRENT: usize = 0;
const NEXT: usize = 1;

#[derive(Default)]
struct PrecacheBuffer {
    start: u64,
    end: u64,
    data: Vec<u8>,
    pending: Option<Completion<Vec<u8>>>,
}

impl PrecacheBuffer {
    #[inline]
    fn contains(&self, pos: u64) -> bool {
        self.start <= pos && pos < self.end
    }

    #[inline]
    fn is_ready(&self) -> bool {
        self.pending.is_none()
    }

    /// Collect a finished read. Returns whether the buffer is usable.
    fn poll(&mut self) -> Result<bool> {
        let Some(pending) = &self.pending else {
            return Ok(true);
        };
        match pending.try_take() {
            None => Ok(false),
            Some(result) => {
                self.pending = None;
                self.finish(result)
            }
        }
    }

    fn wait(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            self.finish(pending.wait())?;
        }
        Ok(())
    }

    fn finish(&mut self, result: Result<Vec<u8>>) -> Result<bool> {
        match result {
            Ok(data) if data.len() as u64 == self.end - self.start => {
                self.data = data;
                Ok(true)
            }
            Ok(data) => {
                let expected = self.end - self.start;
                self.clear();
                Err(Error::corrupt(format!("read returned {} of {expected} bytes", data.len())))
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    Ready,
    Pending,
    Missing,
}

/// Loading archive over a [`ByteSource`] with background precaching and
/// compressed-chunk address translation.
pub struct AsyncReader {
    source: Arc<dyn ByteSource>,
    mode: IoMode,
    min_read_size: u64,
    buffers: [PrecacheBuffer; 2],
    chunks: Vec<CompressedChunk>,
    compression: CompressionFlags,
    pos: u64,
    chunks_decompressed: u64,
    state: ArchiveState,
}

impl AsyncReader {
    pub fn new(source: Arc<dyn ByteSource>, mode: IoMode, min_read_size: u64) -> Self {
        Self {
            source,
            mode,
            min_read_size,
            buffers: Default::default(),
            chunks: Vec::new(),
            compression: CompressionFlags::NONE,
            pos: 0,
            chunks_decompressed: 0,
            state: ArchiveState::loading(),
        }
    }

    /// Route every logical offset at or past the first chunk through `chunks`.
    pub fn set_compression(&mut self, flags: CompressionFlags, chunks: Vec<CompressedChunk>) -> Result<()> {
        flags.codec()?;
        let mut expected_start = None;
        let file_len = self.source.len();
        for chunk in &chunks {
            chunk.validate()?;
            let compressed_end = chunk.compressed_offset as u64 + chunk.compressed_size as u64;
            if compressed_end > file_len {
                return Err(Error::corrupt(format!(
                    "compressed chunk ends at {compressed_end}, file is {file_len} bytes"
                )));
            }
            if chunk.uncompressed_size as u64 > inflate_limit(chunk.compressed_size as u64) {
                return Err(Error::corrupt(format!(
                    "compressed chunk of {} bytes claims {} uncompressed",
                    chunk.compressed_size, chunk.uncompressed_size
                )));
            }
            if let Some(start) = expected_start {
                if chunk.uncompressed_offset as u64 != start {
                    return Err(Error::corrupt("compressed chunks are not contiguous"));
                }
            }
            expected_start = Some(chunk.uncompressed_end());
        }
        self.compression = flags;
        self.chunks = chunks;

        // Raw header bytes past the compressed region start are physical, not logical
        let limit = self.compressed_start();
        for buffer in &mut self.buffers {
            if buffer.pending.is_some() {
                let _ = buffer.wait();
            }
            if buffer.end > limit {
                if buffer.start >= limit {
                    buffer.clear();
                } else {
                    buffer.end = limit;
                    buffer.data.truncate((limit - buffer.start) as usize);
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        !self.chunks.is_empty()
    }

    #[inline]
    pub fn compression(&self) -> CompressionFlags {
        self.compression
    }

    /// How many chunk decompressions have been started.
    #[inline]
    pub fn chunks_decompressed(&self) -> u64 {
        self.chunks_decompressed
    }

    /// Whether no background read is outstanding.
    pub fn is_idle(&self) -> bool {
        self.buffers.iter().all(PrecacheBuffer::is_ready)
    }

    fn compressed_start(&self) -> u64 {
        self.chunks.first().map_or(u64::MAX, |c| c.uncompressed_offset as u64)
    }

    fn find_chunk(&self, offset: u64) -> Option<usize> {
        let index = self.chunks.partition_point(|c| c.uncompressed_end() <= offset);
        (index < self.chunks.len() && self.chunks[index].uncompressed_offset as u64 <= offset)
            .then_some(index)
    }

    fn request_raw(&mut self, slot: usize, offset: u64, size: u64) {
        let limit = self.compressed_start().min(self.source.len());
        let end = offset.saturating_add(size.max(self.min_read_size)).min(limit);
        let source = self.source.clone();
        let pending = dispatch(self.mode, move || {
            let mut data = vec![0u8; (end - offset) as usize];
            source.read_at(offset, &mut data)?;
            Ok(data)
        });
        self.buffers[slot] = PrecacheBuffer { start: offset, end, data: Vec::new(), pending: Some(pending) };
    }

    fn request_chunk(&mut self, slot: usize, index: usize) {
        let chunk = self.chunks[index];
        let (source, flags) = (self.source.clone(), self.compression);
        let pending = dispatch(self.mode, move || decompress_chunk(source.as_ref(), chunk, flags));
        self.chunks_decompressed += 1;
        self.buffers[slot] = PrecacheBuffer {
            start: chunk.uncompressed_offset as u64,
            end: chunk.uncompressed_end(),
            data: Vec::new(),
            pending: Some(pending),
        };
    }

    fn coverage(&self, offset: u64, end: u64) -> Coverage {
        let current = &self.buffers[CURRENT];
        if !current.contains(offset) {
            return Coverage::Missing;
        }
        let state = |ready: bool| if ready { Coverage::Ready } else { Coverage::Pending };
        if end <= current.end {
            return state(current.is_ready());
        }
        if !self.is_compressed() || offset < self.compressed_start() {
            return Coverage::Missing;
        }
        let next = &self.buffers[NEXT];
        if next.start == current.end && next.end > next.start {
            if end <= next.end {
                return state(current.is_ready() && next.is_ready());
            }
            // Larger than two chunks: the rest is stitched in by serialize
            return state(current.is_ready());
        }
        Coverage::Missing
    }

    fn ready_slot(&mut self, pos: u64) -> Result<Option<usize>> {
        for slot in [CURRENT, NEXT] {
            if self.buffers[slot].contains(pos) && self.buffers[slot].poll()? {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn wait_slot(&mut self, pos: u64) -> Result<usize> {
        for slot in [CURRENT, NEXT] {
            if self.buffers[slot].contains(pos) {
                self.buffers[slot].wait()?;
                return Ok(slot);
            }
        }
        Err(Error::corrupt(format!("no precache buffer covers offset {pos}")))
    }
}

fn decompress_chunk(source: &dyn ByteSource, chunk: CompressedChunk, flags: CompressionFlags) -> Result<Vec<u8>> {
    let mut compressed = vec![0u8; chunk.compressed_size as usize];
    source.read_at(chunk.compressed_offset as u64, &mut compressed)?;
    let mut reader = MemoryReader::new(compressed);
    let mut data = vec![0u8; chunk.uncompressed_size as usize];
    reader.serialize_compressed(&mut data, flags)?;
    Ok(data)
}

impl Archive for AsyncReader {
    #[inline]
    fn state(&self) -> &ArchiveState {
        &self.state
    }

    #[inline]
    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn serialize(&mut self, data: &mut [u8]) -> Result<()> {
        if !self.state.loading {
            return Err(Error::other("package reader cannot save"));
        }
        let total = self.total_size();
        let mut done = 0usize;
        while done < data.len() {
            let want = (data.len() - done) as u64;
            if self.pos + want > total {
                return Err(Error::UnexpectedEof(self.pos + want));
            }
            let slot = match self.ready_slot(self.pos)? {
                Some(slot) => slot,
                None => {
                    self.precache(self.pos, want)?;
                    self.wait_slot(self.pos)?
                }
            };
            let buffer = &self.buffers[slot];
            let n = want.min(buffer.end - self.pos) as usize;
            let from = (self.pos - buffer.start) as usize;
            data[done..done + n].copy_from_slice(&buffer.data[from..from + n]);
            done += n;
            self.pos += n as u64;
        }
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.total_size() {
            return Err(Error::UnexpectedEof(pos));
        }
        self.pos = pos;
        Ok(())
    }

    fn total_size(&self) -> u64 {
        self.chunks.last().map_or(self.source.len(), |c| c.uncompressed_end())
    }

    fn precache(&mut self, offset: u64, size: u64) -> Result<bool> {
        let end = offset.saturating_add(size).min(self.total_size());
        if end <= offset {
            return Ok(true);
        }
        self.buffers[CURRENT].poll()?;
        self.buffers[NEXT].poll()?;

        match self.coverage(offset, end) {
            Coverage::Ready => return Ok(true),
            Coverage::Pending => return Ok(false),
            Coverage::Missing => {}
        }

        if self.is_compressed() && offset >= self.compressed_start() {
            self.buffers.swap(CURRENT, NEXT);
            if self.coverage(offset, end) == Coverage::Missing {
                let index = self
                    .find_chunk(offset)
                    .ok_or_else(|| Error::corrupt(format!("offset {offset} is outside every chunk")))?;
                if !self.buffers[CURRENT].contains(offset) {
                    self.request_chunk(CURRENT, index);
                }
                let next_start = self.buffers[CURRENT].end;
                if index + 1 < self.chunks.len() && self.buffers[NEXT].start != next_start {
                    self.request_chunk(NEXT, index + 1);
                }
            }
        } else {
            self.request_raw(CURRENT, offset, end - offset);
        }

        self.buffers[CURRENT].poll()?;
        self.buffers[NEXT].poll()?;
        Ok(self.coverage(offset, end) == Coverage::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{serialize_compressed_chunked, MemorySource, MemoryWriter};

    fn raw_reader(data: Vec<u8>, mode: IoMode, min_read: u64) -> AsyncReader {
        AsyncReader::new(Arc::new(MemorySource::new(data)), mode, min_read)
    }

    /// Header of `header_len` raw bytes, then `body` split into compressed chunks.
    fn compressed_file(header_len: usize, body: &[u8], chunk: usize) -> (Vec<u8>, Vec<CompressedChunk>) {
        let mut file = vec![0xAAu8; header_len];
        let mut chunks = Vec::new();
        for (i, piece) in body.chunks(chunk).enumerate() {
            let mut writer = MemoryWriter::new();
            let mut piece = piece.to_vec();
            serialize_compressed_chunked(&mut writer, &mut piece, CompressionFlags::ZLIB, 1024).unwrap();
            let bytes = writer.into_inner();
            chunks.push(CompressedChunk {
                uncompressed_offset: (header_len + i * chunk) as i32,
                uncompressed_size: piece.len() as i32,
                compressed_offset: file.len() as i32,
                compressed_size: bytes.len() as i32,
            });
            file.extend_from_slice(&bytes);
        }
        (file, chunks)
    }

    #[test]
    fn test_raw_precache_and_read() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let mut reader = raw_reader(data.clone(), IoMode::Inline, 0);
        assert!(reader.precache(100, 50).unwrap());
        // Position does not move
        assert_eq!(reader.tell(), 0);
        reader.seek(100).unwrap();
        let mut buf = [0u8; 50];
        reader.serialize(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[100..150]);
    }

    #[test]
    fn test_read_without_precache_and_eof() {
        let mut reader = raw_reader(vec![7u8; 10], IoMode::Inline, 4);
        let mut buf = [0u8; 10];
        reader.serialize(&mut buf).unwrap();
        assert_eq!(buf, [7u8; 10]);
        let mut one = [0u8; 1];
        assert!(matches!(reader.serialize(&mut one), Err(Error::UnexpectedEof(11))));
    }

    #[test]
    fn test_background_precache_completes() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 13) as u8).collect();
        let mut reader = raw_reader(data.clone(), IoMode::Background, 1024);
        while !reader.precache(5000, 100).unwrap() {
            std::thread::yield_now();
        }
        reader.seek(5000).unwrap();
        let mut buf = vec![0u8; 100];
        reader.serialize(&mut buf).unwrap();
        assert_eq!(buf, &data[5000..5100]);
    }

    #[test]
    fn test_compressed_random_access() {
        let body: Vec<u8> = (0..40_000u32).map(|i| (i * 31 % 97) as u8).collect();
        let (file, chunks) = compressed_file(64, &body, 8192);
        let mut reader = raw_reader(file, IoMode::Inline, 0);

        // Header is raw
        let mut head = [0u8; 4];
        reader.serialize(&mut head).unwrap();
        assert_eq!(head, [0xAA; 4]);

        reader.set_compression(CompressionFlags::ZLIB, chunks).unwrap();
        assert_eq!(reader.total_size(), 64 + 40_000);

        // Straddles chunks 1..=3
        let start = 64 + 8000;
        reader.seek(start).unwrap();
        let mut buf = vec![0u8; 20_000];
        reader.serialize(&mut buf).unwrap();
        assert_eq!(buf, &body[8000..28_000]);

        reader.seek(64 + 39_990).unwrap();
        let mut tail = [0u8; 10];
        reader.serialize(&mut tail).unwrap();
        assert_eq!(&tail[..], &body[39_990..]);
    }

    #[test]
    fn test_sequential_reads_reuse_chunk() {
        let body = vec![5u8; 16_384];
        let (file, chunks) = compressed_file(16, &body, 8192);
        let mut reader = raw_reader(file, IoMode::Inline, 0);
        reader.set_compression(CompressionFlags::ZLIB, chunks).unwrap();

        reader.seek(16).unwrap();
        let mut word = [0u8; 4];
        for _ in 0..100 {
            reader.serialize(&mut word).unwrap();
        }
        // Chunk 0 plus the read-ahead of chunk 1
        assert_eq!(reader.chunks_decompressed(), 2);
    }

    #[test]
    fn test_rejects_gapped_chunks() {
        let mut reader = raw_reader(vec![0u8; 100], IoMode::Inline, 0);
        let chunks = vec![
            CompressedChunk { uncompressed_offset: 10, uncompressed_size: 10, compressed_offset: 10, compressed_size: 5 },
            CompressedChunk { uncompressed_offset: 30, uncompressed_size: 10, compressed_offset: 15, compressed_size: 5 },
        ];
        assert!(reader.set_compression(CompressionFlags::ZLIB, chunks).is_err());
    }

    #[test]
    fn test_rejects_chunks_beyond_source() {
        let chunk = |compressed_size, uncompressed_size| CompressedChunk {
            uncompressed_offset: 10,
            uncompressed_size,
            compressed_offset: 10,
            compressed_size,
        };
        let mut reader = raw_reader(vec![0u8; 100], IoMode::Inline, 0);
        assert!(matches!(
            reader.set_compression(CompressionFlags::ZLIB, vec![chunk(500, 10)]),
            Err(Error::CorruptData(_))
        ));
        assert!(matches!(
            reader.set_compression(CompressionFlags::ZLIB, vec![chunk(4, i32::MAX)]),
            Err(Error::CorruptData(_))
        ));
        assert!(!reader.is_compressed());
        reader.set_compression(CompressionFlags::ZLIB, vec![chunk(50, 4000)]).unwrap();
    }
}
