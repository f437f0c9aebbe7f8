//! Memory-mapped directory for efficient access to large columnstores
//!
//! This module is only compiled with the "native" feature.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use super::{Directory, DirectoryWriter, FileStreamingWriter, OwnedBytes, StreamingWriter};

/// Memory-mapped directory for index files
///
/// Reads map the file and hand out zero-copy `OwnedBytes` views; the OS
/// page cache does the caching. Writes use regular buffered file IO.
#[derive(Debug, Clone)]
pub struct MmapDirectory {
    root: PathBuf,
}

impl MmapDirectory {
    /// Create a new MmapDirectory rooted at the given path
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the root directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Directory for MmapDirectory {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        self.resolve(path).try_exists()
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(self.resolve(path))?.len())
    }

    fn open_read(&self, path: &Path) -> io::Result<OwnedBytes> {
        let file = std::fs::File::open(self.resolve(path))?;
        if file.metadata()?.len() == 0 {
            // Zero-length files cannot be mapped on every platform
            return Ok(OwnedBytes::empty());
        }
        // Safety: index files are write-once; nothing truncates a committed file
        // while it is mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(OwnedBytes::from_shared(Arc::new(mmap)))
    }

    fn list_files(&self, prefix: &Path) -> io::Result<Vec<PathBuf>> {
        let full_path = self.resolve(prefix);
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&full_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                files.push(relative.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

impl DirectoryWriter for MmapDirectory {
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let full_path = self.resolve(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full_path, data)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(self.resolve(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(self.resolve(from), self.resolve(to))
    }

    fn sync(&self) -> io::Result<()> {
        let dir = std::fs::File::open(&self.root)?;
        dir.sync_all()
    }

    fn streaming_writer(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>> {
        let full_path = self.resolve(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&full_path)?;
        Ok(Box::new(FileStreamingWriter::new(file)))
    }
}
