//! Error types for package loading and saving.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for package operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// No file could be located for a package name
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// Summary tag is neither the package tag nor its byte-swapped form
    #[error("{path}: bad package tag {tag:#010x}")]
    BadMagic { path: String, tag: u32 },

    /// File version outside the supported range
    #[error("{path}: unsupported package version {version} (supported {min}..={max})")]
    UnsupportedVersion { path: String, version: u16, min: u16, max: u16 },

    /// An import could not be resolved, even through a redirector
    #[error("Missing import {path}: {reason}")]
    MissingImport { path: String, reason: String },

    /// Export serial range is invalid or was not consumed exactly
    #[error("{path}: corrupt export {export}: {reason}")]
    CorruptExport { path: String, export: String, reason: String },

    /// The class of an export cannot be resolved
    #[error("{path}: export {export} has unresolved class {class}")]
    UnresolvedClass { path: String, export: String, class: String },

    /// Content hash did not match the registered digest
    #[error("{path}: content verification failed")]
    VerificationFailed { path: String },

    /// Codec failure while compressing or decompressing
    #[error("Compression failed: {0}")]
    Compression(String),

    /// Compression flags do not select a supported codec
    #[error("Unknown compression codec in flags {0:#x}")]
    UnknownCodec(u32),

    /// Destination buffer too small for decompressed data
    #[error("Buffer too small: needed {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Read past the end of the stream
    #[error("Unexpected end of stream at position {0}")]
    UnexpectedEof(u64),

    /// Structurally invalid data (bad counts, bad name index, ...)
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// Package index outside the import/export tables
    #[error("Package index {index} out of range ({imports} imports, {exports} exports)")]
    BadPackageIndex { index: i32, imports: usize, exports: usize },

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Configuration parse error
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a corrupt data error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptData(msg.into())
    }

    /// Create a compression error.
    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    /// Attach a package path to errors raised before the path was known.
    pub fn with_path(self, path: &str) -> Self {
        match self {
            Self::BadMagic { path: p, tag } if p.is_empty() => {
                Self::BadMagic { path: path.to_string(), tag }
            }
            Self::UnsupportedVersion { path: p, version, min, max } if p.is_empty() => {
                Self::UnsupportedVersion { path: path.to_string(), version, min, max }
            }
            other => other,
        }
    }

    /// Whether this error invalidates the whole loader that raised it.
    pub fn is_fatal_for_loader(&self) -> bool {
        matches!(
            self,
            Self::BadMagic { .. }
                | Self::UnsupportedVersion { .. }
                | Self::CorruptExport { .. }
                | Self::UnresolvedClass { .. }
                | Self::UnexpectedEof(_)
                | Self::CorruptData(_)
                | Self::BadPackageIndex { .. }
                | Self::Compression(_)
                | Self::UnknownCodec(_)
                | Self::BufferTooSmall { .. }
                | Self::Io(_)
        )
    }
}

/// Result type alias for package operations.
pub type Result<T> = std::result::Result<T, Error>;
