//! # pkglinker
//!
//! Versioned binary object packages: the on-disk format, a resumable linker
//! that turns package tables into objects, and a time-sliced async loader.
//!
//! ## Modules
//!
//! - [`util`] - Errors, configuration, time budget, GUIDs
//! - [`stream`] - Archive capability interface and its backends
//! - [`names`] - Process-wide name interning
//! - [`format`] - Package summary, tables, constants, builder
//! - [`object`] - Object table, flags, class serializers, bulk data
//! - [`linker`] - Linker state machine, import/export resolution, saving
//! - [`async_loading`] - Budgeted multi-package load orchestration
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pkglinker::prelude::*;
//!
//! let fs = Arc::new(DirectoryFileSystem::new(["content".into()]));
//! let mut cx = LoadContext::new(fs, LoaderConfig::default());
//!
//! let mut loader = AsyncLoader::new();
//! loader.load_package_async("Engine", None);
//! while loader.process(&mut cx, Some(Duration::from_millis(5))) == LoadStatus::NotFinished {
//!     // render a frame
//! }
//! ```

pub mod util;
pub mod stream;
pub mod names;
pub mod format;
pub mod object;
pub mod linker;
pub mod async_loading;

// Re-export commonly used types
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::async_loading::{AsyncLoader, LoadStatus};
    pub use crate::format::{ExportSpec, PackageBuilder, PackageIndex};
    pub use crate::linker::{Linker, LinkerId, LinkerState, LoadContext};
    pub use crate::names::{Name, NameTable};
    pub use crate::object::{ClassSerializer, ObjectFlags, ObjectId, ObjectStore, PropertyBag, PropertyValue};
    pub use crate::stream::{Archive, CompressionFlags, DirectoryFileSystem, FileSystem, MemoryFileSystem};
    pub use crate::util::{Error, LoaderConfig, Result, TimeBudget};
    pub use std::time::Duration;
}
