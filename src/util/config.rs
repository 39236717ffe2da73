//! Loader and saver configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Error, Result};
use crate::stream::CompressionFlags;

/// How precache requests beneath the package reader are serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IoMode {
    /// Requests complete synchronously inside `precache`.
    #[default]
    Inline,
    /// Requests are dispatched to the rayon pool and polled.
    Background,
}

/// A one-time import fixup applied while the import table is fixed up.
///
/// Any import whose class (and optionally class package) matches `old_class`
/// in a file no newer than `max_version` is retargeted to `new_class`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRename {
    pub old_class: String,
    pub new_class: String,
    /// Restrict to imports whose class package matches, if set.
    #[serde(default)]
    pub class_package: Option<String>,
    /// New class package, if the class moved between packages.
    #[serde(default)]
    pub new_class_package: Option<String>,
    /// Newest file version the rename applies to.
    #[serde(default = "ImportRename::any_version")]
    pub max_version: u16,
}

impl ImportRename {
    fn any_version() -> u16 {
        u16::MAX
    }
}

/// Settings consumed by linkers, the async reader and the saver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    // Reading
    pub header_precache_size: u64,
    pub min_read_size: u64,
    pub io_mode: IoMode,

    // Time slicing
    pub time_check_granularity: u32,

    // Linker steps
    pub load_depends_table: bool,
    pub find_existing_exports: bool,
    pub import_renames: Vec<ImportRename>,
    /// Codec of files stored as one compressed stream.
    pub full_compression: CompressionFlags,

    // Saving
    pub compression_chunk_size: u32,
    pub save_compression: CompressionFlags,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            header_precache_size: 128 * 1024,
            min_read_size: 32 * 1024,
            io_mode: IoMode::Inline,
            time_check_granularity: 1,
            load_depends_table: true,
            find_existing_exports: true,
            import_renames: Vec::new(),
            full_compression: CompressionFlags::ZLIB,
            compression_chunk_size: crate::format::COMPRESSION_CHUNK_SIZE,
            save_compression: CompressionFlags::NONE,
        }
    }
}

impl LoaderConfig {
    /// Parse a configuration from JSON, filling unspecified fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.compression_chunk_size == 0 {
            return Err(Error::other("compression_chunk_size must be nonzero"));
        }
        if self.time_check_granularity == 0 {
            return Err(Error::other("time_check_granularity must be nonzero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = LoaderConfig::from_json_str("{}").unwrap();
        assert_eq!(config.header_precache_size, 128 * 1024);
        assert_eq!(config.io_mode, IoMode::Inline);
        assert!(config.load_depends_table);
        assert!(config.import_renames.is_empty());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "io_mode": "background",
            "min_read_size": 0,
            "import_renames": [{ "old_class": "SoundCueLocalized", "new_class": "SoundCue" }]
        }"#;
        let config = LoaderConfig::from_json_str(json).unwrap();
        assert_eq!(config.io_mode, IoMode::Background);
        assert_eq!(config.min_read_size, 0);
        assert_eq!(config.import_renames[0].max_version, u16::MAX);
        assert!(config.import_renames[0].class_package.is_none());
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let result = LoaderConfig::from_json_str(r#"{ "compression_chunk_size": 0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = LoaderConfig::default();
        config.save_compression = CompressionFlags::ZLIB;
        let json = config.to_json().unwrap();
        let back = LoaderConfig::from_json_str(&json).unwrap();
        assert_eq!(back.save_compression, CompressionFlags::ZLIB);
    }
}
