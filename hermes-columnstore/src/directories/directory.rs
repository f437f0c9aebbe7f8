//! Directory abstraction for columnstore IO
//!
//! All operations are synchronous: the columnstore is read and written by
//! single-threaded algorithms and concurrency is the caller's concern.
//! Readers get cheap, independently positioned views over immutable bytes.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
#[cfg(feature = "native")]
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owned bytes with cheap cloning (Arc-backed)
///
/// The backing storage is either a heap buffer or a memory map; both are
/// immutable once wrapped, so clones may be read from any thread.
#[derive(Clone)]
pub struct OwnedBytes {
    data: Arc<dyn AsRef<[u8]> + Send + Sync>,
    range: Range<usize>,
}

impl std::fmt::Debug for OwnedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedBytes")
            .field("range", &self.range)
            .finish()
    }
}

impl OwnedBytes {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: Arc::new(data),
            range: 0..len,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Wrap any shared immutable buffer (e.g. a memory map).
    pub fn from_shared(data: Arc<dyn AsRef<[u8]> + Send + Sync>) -> Self {
        let len = (*data).as_ref().len();
        Self {
            data,
            range: 0..len,
        }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        debug_assert!(range.start <= range.end && range.end <= self.len());
        let start = self.range.start + range.start;
        let end = self.range.start + range.end;
        Self {
            data: Arc::clone(&self.data),
            range: start..end,
        }
    }

    /// Bounds-checked variant of [`slice`](Self::slice).
    pub fn try_slice(&self, range: Range<usize>) -> io::Result<Self> {
        if range.start > range.end || range.end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Range {:?} out of bounds (len: {})", range, self.len()),
            ));
        }
        Ok(self.slice(range))
    }

    pub fn as_slice(&self) -> &[u8] {
        &(*self.data).as_ref()[self.range.clone()]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl AsRef<[u8]> for OwnedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::Deref for OwnedBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

/// Seekable input stream over immutable file bytes.
///
/// `dup()` yields an independent cursor over the same bytes, so any number
/// of readers can walk one file concurrently without locking.
#[derive(Debug, Clone)]
pub struct IndexInput {
    data: OwnedBytes,
    pos: usize,
}

impl IndexInput {
    pub fn new(data: OwnedBytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    pub fn file_pointer(&self) -> u64 {
        self.pos as u64
    }

    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }

    /// Independent cursor at the same position.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Independent cursor at the start of the stream.
    pub fn reopen(&self) -> Self {
        Self::new(self.data.clone())
    }

    /// Zero-copy view of a byte range of the whole stream.
    pub fn slice(&self, range: Range<u64>) -> io::Result<OwnedBytes> {
        self.data.try_slice(range.start as usize..range.end as usize)
    }

    /// CRC32 of a byte range of the whole stream.
    pub fn checksum(&self, range: Range<u64>) -> io::Result<u32> {
        Ok(crc32fast::hash(self.slice(range)?.as_slice()))
    }

    /// Bytes backing this stream.
    pub fn bytes(&self) -> &OwnedBytes {
        &self.data
    }
}

impl Read for IndexInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data.as_slice()[self.pos.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for IndexInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(d) => self.data.len() as i64 + d,
            SeekFrom::Current(d) => self.pos as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}

/// Directory trait for reading index files
pub trait Directory: Send + Sync + 'static {
    /// Check if a file exists
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Get file size
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Open a file for reading (whole-file zero-copy view)
    fn open_read(&self, path: &Path) -> io::Result<OwnedBytes>;

    /// Open a seekable input stream
    fn open_input(&self, path: &Path) -> io::Result<IndexInput> {
        Ok(IndexInput::new(self.open_read(path)?))
    }

    /// List files in directory
    fn list_files(&self, prefix: &Path) -> io::Result<Vec<PathBuf>>;
}

/// A writer for incrementally writing data to a directory file.
///
/// File-backed directories write directly to disk; memory directories
/// collect to Vec and publish the file on `finish()`.
pub trait StreamingWriter: io::Write + Send {
    /// Finalize the write, making data available for reading.
    fn finish(self: Box<Self>) -> io::Result<()>;

    /// Bytes written so far.
    fn bytes_written(&self) -> u64;
}

type FileMap = Arc<RwLock<HashMap<PathBuf, Arc<Vec<u8>>>>>;

/// StreamingWriter backed by Vec<u8>, used by RamDirectory.
struct BufferedStreamingWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    files: FileMap,
}

impl io::Write for BufferedStreamingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StreamingWriter for BufferedStreamingWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.files.write().insert(self.path, Arc::new(self.buffer));
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buffer.len() as u64
    }
}

/// StreamingWriter backed by std::fs::File for filesystem directories.
#[cfg(feature = "native")]
pub(crate) struct FileStreamingWriter {
    file: io::BufWriter<std::fs::File>,
    written: u64,
}

#[cfg(feature = "native")]
impl FileStreamingWriter {
    pub(crate) fn new(file: std::fs::File) -> Self {
        Self {
            file: io::BufWriter::new(file),
            written: 0,
        }
    }
}

#[cfg(feature = "native")]
impl io::Write for FileStreamingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(feature = "native")]
impl StreamingWriter for FileStreamingWriter {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

/// Directory trait for writing index files
pub trait DirectoryWriter: Directory {
    /// Create/overwrite a file with data
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Delete a file
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Atomic rename
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Sync all pending writes
    fn sync(&self) -> io::Result<()>;

    /// Create a streaming writer for incremental file writes.
    /// Call finish() on the returned writer to finalize.
    fn streaming_writer(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>>;
}

/// In-memory directory for testing and small indexes
#[derive(Debug, Default, Clone)]
pub struct RamDirectory {
    files: FileMap,
}

impl RamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
        )
    }
}

impl Directory for RamDirectory {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.read().contains_key(path))
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.files
            .read()
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }

    fn open_read(&self, path: &Path) -> io::Result<OwnedBytes> {
        let files = self.files.read();
        let data = files.get(path).ok_or_else(|| Self::not_found(path))?;
        Ok(OwnedBytes::from_shared(Arc::clone(data) as _))
    }

    fn list_files(&self, prefix: &Path) -> io::Result<Vec<PathBuf>> {
        let files = self.files.read();
        let mut paths: Vec<PathBuf> = files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl DirectoryWriter for RamDirectory {
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.files
            .write()
            .insert(path.to_path_buf(), Arc::new(data.to_vec()));
        Ok(())
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.files.write().remove(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.write();
        if let Some(data) = files.remove(from) {
            files.insert(to.to_path_buf(), data);
        }
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    fn streaming_writer(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>> {
        Ok(Box::new(BufferedStreamingWriter {
            path: path.to_path_buf(),
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }
}
