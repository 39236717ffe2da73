//! Memory-backed archives.

use super::archive::{Archive, ArchiveState};
use crate::util::{Error, Result};

/// Loading archive over an owned byte buffer.
///
/// `base_offset` shifts reported positions, so a reader over one export's
/// bytes reports the same offsets as the file it was cut from.
#[derive(Debug)]
pub struct MemoryReader {
    data: Vec<u8>,
    pos: usize,
    base_offset: u64,
    state: ArchiveState,
}

impl MemoryReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_base_offset(data, 0)
    }

    pub fn with_base_offset(data: Vec<u8>, base_offset: u64) -> Self {
        Self { data, pos: 0, base_offset, state: ArchiveState::loading() }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Bytes between the position and the end of the buffer.
    pub fn rest(&self) -> &[u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Archive for MemoryReader {
    #[inline]
    fn state(&self) -> &ArchiveState {
        &self.state
    }

    #[inline]
    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn serialize(&mut self, data: &mut [u8]) -> Result<()> {
        let end = self.pos + data.len();
        if end > self.data.len() {
            return Err(Error::UnexpectedEof(self.base_offset + end as u64));
        }
        data.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.base_offset + self.pos as u64
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        let local = pos
            .checked_sub(self.base_offset)
            .filter(|&p| p <= self.data.len() as u64)
            .ok_or(Error::UnexpectedEof(pos))?;
        self.pos = local as usize;
        Ok(())
    }

    #[inline]
    fn total_size(&self) -> u64 {
        self.base_offset + self.data.len() as u64
    }
}

/// Saving archive into a growable buffer. Seeking back overwrites in place.
pub struct MemoryWriter {
    data: Vec<u8>,
    pos: usize,
    state: ArchiveState,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self { data: Vec::new(), pos: 0, state: ArchiveState::saving() }
    }

    /// Writer at an explicit file version.
    pub fn with_version(version: u16, licensee_version: u16) -> Self {
        let mut writer = Self::new();
        writer.state.version = version;
        writer.state.licensee_version = licensee_version;
        writer
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive for MemoryWriter {
    #[inline]
    fn state(&self) -> &ArchiveState {
        &self.state
    }

    #[inline]
    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn serialize(&mut self, data: &mut [u8]) -> Result<()> {
        let end = self.pos + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        let pos = usize::try_from(pos).map_err(|_| Error::UnexpectedEof(pos))?;
        if pos > self.data.len() {
            self.data.resize(pos, 0);
        }
        self.pos = pos;
        Ok(())
    }

    #[inline]
    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }
}
