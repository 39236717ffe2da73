//! Utility types shared across the crate.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`LoaderConfig`] - Serde-backed settings
//! - [`TimeBudget`] - Soft per-tick time budget
//! - [`Guid`] - 128-bit package identifier

mod error;
mod config;
mod budget;
mod guid;

pub use error::*;
pub use config::*;
pub use budget::*;
pub use guid::*;
