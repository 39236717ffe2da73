//! Serialization streams.
//!
//! Everything that reads or writes package bytes goes through the [`Archive`]
//! capability interface: one `serialize` primitive, a position, mode flags, and
//! a non-blocking `precache` hook. Backends:
//!
//! ```text
//! MemoryReader / MemoryWriter   owned buffers
//! CountingArchive<A>            delegates to A, counts bytes
//! NullWriter                    measures size only
//! AsyncReader                   ByteSource + double-buffered precache
//!                               + compressed chunk translation
//! ```
//!
//! Wire order: persistent streams are little-endian, flipped when
//! `force_byte_swapping` is set (see [`WireOrder::for_state`]).

mod archive;
mod async_reader;
mod completion;
mod compression;
mod counting;
mod memory;
mod source;

pub use archive::*;
pub use async_reader::*;
pub use completion::*;
pub use compression::*;
pub use counting::*;
pub use memory::*;
pub use source::*;

/// Implement every required [`Archive`] method by forwarding to `self.$field`.
macro_rules! delegate_archive {
    ($field:tt) => {
        #[inline]
        fn state(&self) -> &$crate::stream::ArchiveState {
            self.$field.state()
        }

        #[inline]
        fn state_mut(&mut self) -> &mut $crate::stream::ArchiveState {
            self.$field.state_mut()
        }

        #[inline]
        fn serialize(&mut self, data: &mut [u8]) -> $crate::util::Result<()> {
            self.$field.serialize(data)
        }

        #[inline]
        fn tell(&self) -> u64 {
            self.$field.tell()
        }

        #[inline]
        fn seek(&mut self, pos: u64) -> $crate::util::Result<()> {
            self.$field.seek(pos)
        }

        #[inline]
        fn total_size(&self) -> u64 {
            self.$field.total_size()
        }

        #[inline]
        fn precache(&mut self, offset: u64, size: u64) -> $crate::util::Result<bool> {
            self.$field.precache(offset, size)
        }
    };
}

pub(crate) use delegate_archive;
