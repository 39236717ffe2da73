//! Byte sources and the file-system seam beneath the package reader.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};

use crate::format::PACKAGE_EXTENSION;
use crate::util::{Error, Result};

/// Random-access source of raw bytes.
pub trait ByteSource: Send + Sync {
    fn len(&self) -> u64;

    /// Fill `buf` from `offset`. Reading past the end is an error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Directory lookup used only to decide how to open a package.
pub trait ContentsTable: Send + Sync {
    fn file_size(&self, path: &Path) -> Option<u64>;

    /// Size after decompression, for files stored as one compressed stream.
    fn uncompressed_file_size(&self, path: &Path) -> Option<u64>;

    fn start_sector(&self, path: &Path) -> Option<u64>;
}

/// File-system layer consumed by linkers.
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn ByteSource>>;

    /// Map a package name to the file holding it.
    fn resolve(&self, package_name: &str) -> Option<PathBuf>;

    fn contents(&self) -> Option<&dyn ContentsTable> {
        None
    }
}

/// Byte source over shared memory.
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    #[inline]
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len() as u64;
        if end > self.len() {
            return Err(Error::UnexpectedEof(end));
        }
        buf.copy_from_slice(&self.data[offset as usize..end as usize]);
        Ok(())
    }
}

/// Disk file source, memory-mapped or buffered.
pub struct FileSource {
    inner: FileInner,
    size: u64,
}

enum FileInner {
    /// Memory-mapped file (preferred for large files)
    Mmap(Mmap),
    /// Buffered file access (fallback)
    File(Mutex<File>),
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        let size = file.metadata()?.len();

        let inner = if use_mmap && size > 0 {
            // Safety: file is opened read-only
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            FileInner::Mmap(mmap)
        } else {
            FileInner::File(Mutex::new(file))
        };
        Ok(Self { inner, size })
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        matches!(self.inner, FileInner::Mmap(_))
    }
}

impl ByteSource for FileSource {
    #[inline]
    fn len(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len() as u64;
        if end > self.size {
            return Err(Error::UnexpectedEof(end));
        }
        match &self.inner {
            FileInner::Mmap(mmap) => {
                buf.copy_from_slice(&mmap[offset as usize..end as usize]);
            }
            FileInner::File(file) => {
                let mut f = file.lock();
                f.seek(SeekFrom::Start(offset))?;
                f.read_exact(buf)?;
            }
        }
        Ok(())
    }
}

/// In-memory file system, also acting as its own contents table.
#[derive(Default)]
pub struct MemoryFileSystem {
    files: RwLock<HashMap<PathBuf, Arc<[u8]>>>,
    uncompressed_sizes: RwLock<HashMap<PathBuf, u64>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.files.write().insert(path.into(), data.into());
    }

    /// Insert a package under `<name>.pkg`.
    pub fn insert_package(&self, name: &str, data: Vec<u8>) -> PathBuf {
        let path = PathBuf::from(format!("{name}.{PACKAGE_EXTENSION}"));
        self.insert(path.clone(), data);
        path
    }

    /// Insert a package stored as one compressed stream.
    pub fn insert_fully_compressed(&self, name: &str, data: Vec<u8>, uncompressed_size: u64) {
        let path = self.insert_package(name, data);
        self.uncompressed_sizes.write().insert(path, uncompressed_size);
    }

    pub fn get(&self, path: &Path) -> Option<Arc<[u8]>> {
        self.files.read().get(path).cloned()
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &Path) -> Result<Arc<dyn ByteSource>> {
        let data = self.get(path).ok_or_else(|| Error::FileNotFound(path.to_path_buf()))?;
        Ok(Arc::new(MemorySource { data }))
    }

    fn resolve(&self, package_name: &str) -> Option<PathBuf> {
        self.files
            .read()
            .keys()
            .find(|path| stem_matches(path, package_name))
            .cloned()
    }

    fn contents(&self) -> Option<&dyn ContentsTable> {
        Some(self)
    }
}

impl ContentsTable for MemoryFileSystem {
    fn file_size(&self, path: &Path) -> Option<u64> {
        self.files.read().get(path).map(|d| d.len() as u64)
    }

    fn uncompressed_file_size(&self, path: &Path) -> Option<u64> {
        self.uncompressed_sizes.read().get(path).copied()
    }

    fn start_sector(&self, _path: &Path) -> Option<u64> {
        None
    }
}

/// Packages found by name under a list of root directories.
pub struct DirectoryFileSystem {
    roots: Vec<PathBuf>,
    use_mmap: bool,
}

impl DirectoryFileSystem {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self { roots: roots.into_iter().collect(), use_mmap: cfg!(feature = "mmap") }
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl FileSystem for DirectoryFileSystem {
    fn open(&self, path: &Path) -> Result<Arc<dyn ByteSource>> {
        Ok(Arc::new(FileSource::open(path, self.use_mmap)?))
    }

    fn resolve(&self, package_name: &str) -> Option<PathBuf> {
        for root in &self.roots {
            let direct = root.join(format!("{package_name}.{PACKAGE_EXTENSION}"));
            if direct.is_file() {
                return Some(direct);
            }
            let Ok(entries) = std::fs::read_dir(root) else {
                continue;
            };
            let found = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .find(|p| p.is_file() && stem_matches(p, package_name));
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

fn stem_matches(path: &Path, package_name: &str) -> bool {
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(PACKAGE_EXTENSION));
    let stem_ok = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case(package_name));
    ext_ok && stem_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_source_bounds() {
        let src = MemorySource::new(vec![1u8, 2, 3, 4]);
        let mut buf = [0u8; 2];
        src.read_at(2, &mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
        assert!(matches!(src.read_at(3, &mut buf), Err(Error::UnexpectedEof(5))));
    }

    #[test]
    fn test_memory_fs_resolve_case_insensitive() {
        let fs = MemoryFileSystem::new();
        fs.insert_package("Engine", vec![0; 8]);
        let path = fs.resolve("engine").unwrap();
        assert_eq!(path, PathBuf::from("Engine.pkg"));
        assert_eq!(fs.contents().unwrap().file_size(&path), Some(8));
        assert!(fs.resolve("Other").is_none());
    }

    #[test]
    fn test_file_source_modes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();

        for use_mmap in [true, false] {
            let src = FileSource::open(tmp.path(), use_mmap).unwrap();
            assert_eq!(src.is_mapped(), use_mmap);
            let mut buf = [0u8; 3];
            src.read_at(4, &mut buf).unwrap();
            assert_eq!(&buf, b"456");
            assert!(src.read_at(9, &mut buf).is_err());
        }
    }

    #[test]
    fn test_missing_file() {
        let err = FileSource::open("/definitely/not/here.pkg", true).err().unwrap();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn test_directory_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Textures.pkg"), b"x").unwrap();
        let fs = DirectoryFileSystem::new([dir.path().to_path_buf()]);
        assert!(fs.resolve("Textures").is_some());
        assert!(fs.resolve("TEXTURES").is_some());
        assert!(fs.resolve("Meshes").is_none());
    }
}
