//! Byte-counting archives built by delegation.

use super::archive::{Archive, ArchiveState};
use crate::util::Result;

/// Forwards everything to an inner archive and counts the bytes that pass
/// through `serialize`.
pub struct CountingArchive<A> {
    inner: A,
    bytes: u64,
}

impl<A: Archive> CountingArchive<A> {
    pub fn new(inner: A) -> Self {
        Self { inner, bytes: 0 }
    }

    /// Bytes serialized since creation.
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[inline]
    pub fn inner(&self) -> &A {
        &self.inner
    }

    #[inline]
    pub fn inner_mut(&mut self) -> &mut A {
        &mut self.inner
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Archive> Archive for CountingArchive<A> {
    #[inline]
    fn state(&self) -> &ArchiveState {
        self.inner.state()
    }

    #[inline]
    fn state_mut(&mut self) -> &mut ArchiveState {
        self.inner.state_mut()
    }

    fn serialize(&mut self, data: &mut [u8]) -> Result<()> {
        self.inner.serialize(data)?;
        self.bytes += data.len() as u64;
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.inner.tell()
    }

    #[inline]
    fn seek(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(pos)
    }

    #[inline]
    fn total_size(&self) -> u64 {
        self.inner.total_size()
    }

    #[inline]
    fn precache(&mut self, offset: u64, size: u64) -> Result<bool> {
        self.inner.precache(offset, size)
    }
}

/// Saving sink that discards data and only tracks size.
pub struct NullWriter {
    pos: u64,
    size: u64,
    state: ArchiveState,
}

impl NullWriter {
    pub fn new() -> Self {
        Self { pos: 0, size: 0, state: ArchiveState::saving() }
    }
}

impl Default for NullWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive for NullWriter {
    #[inline]
    fn state(&self) -> &ArchiveState {
        &self.state
    }

    #[inline]
    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn serialize(&mut self, data: &mut [u8]) -> Result<()> {
        self.pos += data.len() as u64;
        self.size = self.size.max(self.pos);
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = pos;
        self.size = self.size.max(pos);
        Ok(())
    }

    #[inline]
    fn total_size(&self) -> u64 {
        self.size
    }
}
