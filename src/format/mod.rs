//! Package binary format.
//!
//! ```text
//! offset 0          PackageFileSummary (tag, versions, table counts/offsets,
//!                                       generations, compressed chunks)
//! name_offset       NameEntryRecord * name_count
//! import_offset     ObjectImport   * import_count
//! export_offset     ObjectExport   * export_count
//! depends_offset    Vec<PackageIndex> * export_count
//! ...               export payloads at serial_offset / serial_size
//! ```
//!
//! Import and export records encode names as `(local index, number)` through
//! [`NameMapReader`] / [`NameMapWriter`]. Files older than [`VER_CURRENT`]
//! are brought up to date by the [`UPGRADES`] table after parsing.

mod builder;
mod constants;
mod index;
mod name_map;
mod summary;
mod tables;
mod upgrade;

pub use builder::*;
pub use constants::*;
pub use index::*;
pub use name_map::*;
pub use summary::*;
pub use tables::*;
pub use upgrade::*;
