//! Columnstore writer
//!
//! Columns buffer their document ids in a [`SparseBitmapWriter`] and their
//! values in one contiguous byte buffer. Nothing touches the directory
//! until [`ColumnstoreWriter::commit`], which classifies each column, cuts
//! its values into pages and writes the whole `.cs` file in one pass.

use std::io::{self, Write};
use std::sync::Arc;

use super::format::{
    ColumnHeader, ColumnId, ColumnProperties, ColumnShape, PageEntry, write_headers_and_footer,
};
use crate::DocId;
use crate::compression::{CompressionLevel, Compressor};
use crate::config::ColumnstoreConfig;
use crate::directories::{DirectoryWriter, StreamingWriter};
use crate::doc_limits::INVALID;
use crate::encryption::Cipher;
use crate::error::{Error, Result};
use crate::segment::{FlushState, SegmentFiles, SegmentMeta};
use crate::structures::bitpacking::{bits_needed, bitpack_write};
use crate::structures::sparse_bitmap::{SparseBitmapWriter, write_index};

/// Outcome of a column finalizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    /// Keep the column under this name
    Named(String),
    /// Keep the column without a name
    Unnamed,
    /// Do not write the column
    Dropped,
}

/// Called once at commit with a buffer for the column's header payload.
pub type ColumnFinalizer = Box<dyn FnOnce(&mut Vec<u8>) -> Finalized + Send>;

/// Per-column write options
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    /// Registry name of the page compressor; the configured default if unset
    pub compression: Option<String>,
    pub level: CompressionLevel,
    /// Encrypt value pages with the configured cipher
    pub encryption: bool,
}

impl ColumnInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, name: &str) -> Self {
        self.compression = Some(name.to_string());
        self
    }

    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encryption = true;
        self
    }
}

/// Sink for one document's value
pub struct ValueOutput<'a> {
    values: &'a mut Vec<u8>,
}

impl Write for ValueOutput<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.values.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.values.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Buffers the documents and values of one column
pub struct ColumnWriter {
    id: ColumnId,
    compression: String,
    compressor: Arc<dyn Compressor>,
    level: CompressionLevel,
    encrypt: bool,
    finalizer: Option<ColumnFinalizer>,
    docs: SparseBitmapWriter<Vec<u8>>,
    min_doc: DocId,
    /// Values in document order
    values: Vec<u8>,
    /// Start of each value in `values`
    offsets: Vec<u64>,
    /// Document of the latest `prepare`, until `reset` or the next one
    pending: Option<DocId>,
}

impl ColumnWriter {
    pub fn id(&self) -> ColumnId {
        self.id
    }

    /// Documents with a value
    pub fn count(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn last_doc(&self) -> DocId {
        self.docs.last()
    }

    /// Start the value of `doc`; ids must be strictly increasing.
    ///
    /// Writing nothing to the output stores an empty value, which is still
    /// distinct from an absent one.
    pub fn prepare(&mut self, doc: DocId) -> Result<ValueOutput<'_>> {
        if !self.docs.push_back(doc)? {
            return Err(Error::InvalidDocId(doc));
        }
        if self.min_doc == INVALID {
            self.min_doc = doc;
        }
        self.offsets.push(self.values.len() as u64);
        self.pending = Some(doc);
        Ok(ValueOutput {
            values: &mut self.values,
        })
    }

    /// Undo the latest `prepare`, dropping its document and value.
    ///
    /// Returns `false` when there is nothing to undo.
    pub fn reset(&mut self) -> bool {
        let Some(doc) = self.pending.take() else {
            return false;
        };
        if !self.docs.erase(doc) {
            return false;
        }
        if let Some(start) = self.offsets.pop() {
            self.values.truncate(start as usize);
        }
        if self.offsets.is_empty() {
            self.min_doc = INVALID;
        }
        true
    }

    /// Shape implied by the buffered values
    fn shape(&self) -> ColumnShape {
        if self.values.is_empty() {
            return ColumnShape::Mask;
        }
        let end = |i: usize| {
            self.offsets
                .get(i + 1)
                .copied()
                .unwrap_or(self.values.len() as u64)
        };
        let stride = end(0) - self.offsets[0];
        let uniform = (1..self.offsets.len()).all(|i| end(i) - self.offsets[i] == stride);
        match u32::try_from(stride) {
            Ok(stride) if uniform => ColumnShape::Fixed { stride },
            _ => ColumnShape::Sparse,
        }
    }
}

/// Writes the columnstore file of one segment
pub struct ColumnstoreWriter<D: DirectoryWriter> {
    directory: Arc<D>,
    config: ColumnstoreConfig,
    segment: Option<SegmentMeta>,
    columns: Vec<ColumnWriter>,
}

impl<D: DirectoryWriter> ColumnstoreWriter<D> {
    pub fn new(directory: Arc<D>, config: ColumnstoreConfig) -> Self {
        Self {
            directory,
            config,
            segment: None,
            columns: Vec::new(),
        }
    }

    pub fn config(&self) -> &ColumnstoreConfig {
        &self.config
    }

    /// Begin writing `segment`, discarding any unfinished session.
    pub fn prepare(&mut self, segment: &SegmentMeta) {
        if !self.columns.is_empty() {
            log::debug!(
                "Columnstore prepare discards {} buffered columns",
                self.columns.len()
            );
        }
        self.columns.clear();
        self.segment = Some(segment.clone());
    }

    /// Register a column. Ids are assigned in registration order.
    pub fn push_column(
        &mut self,
        info: ColumnInfo,
        finalizer: ColumnFinalizer,
    ) -> Result<(ColumnId, &mut ColumnWriter)> {
        if self.segment.is_none() {
            return Err(Error::Config(
                "push_column() called before prepare()".to_string(),
            ));
        }
        let id = self.columns.len() as ColumnId;
        let compression = info
            .compression
            .unwrap_or_else(|| self.config.options.default_compression.clone());
        let compressor = self.config.compressors.get(&compression).ok_or_else(|| {
            Error::Config(format!(
                "Unknown compression '{}' for column {} (registered: {:?})",
                compression,
                id,
                self.config.compressors.names()
            ))
        })?;
        let encrypt = info.encryption && self.config.cipher.is_some();
        if info.encryption && !encrypt {
            log::warn!(
                "Column {} requests encryption but no cipher is configured, writing it in the clear",
                id
            );
        }

        self.columns.push(ColumnWriter {
            id,
            compression,
            compressor,
            level: info.level,
            encrypt,
            finalizer: Some(finalizer),
            docs: SparseBitmapWriter::new(Vec::new()),
            min_doc: INVALID,
            values: Vec::new(),
            offsets: Vec::new(),
            pending: None,
        });
        let column = &mut self.columns[id as usize];
        Ok((id, column))
    }

    pub fn column_mut(&mut self, id: ColumnId) -> Result<&mut ColumnWriter> {
        self.columns
            .get_mut(id as usize)
            .ok_or(Error::ColumnNotFound(id))
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Discard all buffered columns and end the session.
    pub fn rollback(&mut self) {
        self.columns.clear();
        self.segment = None;
    }

    /// Write every non-empty column to `<segment>.cs`.
    ///
    /// Returns `Ok(false)`, creating no file, when every column is empty or
    /// dropped by its finalizer.
    pub fn commit(&mut self, state: &FlushState) -> Result<bool> {
        let segment = self
            .segment
            .take()
            .ok_or_else(|| Error::Config("commit() called before prepare()".to_string()))?;
        let columns = std::mem::take(&mut self.columns);
        let registered = columns.len();

        let mut kept = Vec::with_capacity(registered);
        for mut column in columns {
            if column.count() == 0 {
                log::debug!("Column {} has no values, dropping", column.id);
                continue;
            }
            if column.last_doc() > state.docs_count {
                return Err(Error::InvalidDocId(column.last_doc()));
            }
            let mut payload = Vec::new();
            let name = match column.finalizer.take().map(|f| f(&mut payload)) {
                Some(Finalized::Named(name)) => Some(name),
                Some(Finalized::Unnamed) | None => None,
                Some(Finalized::Dropped) => {
                    log::debug!("Column {} dropped by its finalizer", column.id);
                    continue;
                }
            };
            kept.push((column, name, payload));
        }

        if kept.is_empty() {
            log::debug!(
                "Columnstore commit for segment {}: all {} columns empty, nothing written",
                segment.id.to_hex(),
                registered
            );
            return Ok(false);
        }

        let path = SegmentFiles::new(segment.id).columnstore;
        let mut out = self.directory.streaming_writer(&path)?;
        let written = kept.len();
        if let Err(e) = self.write_columns(&mut out, kept, state) {
            drop(out);
            if let Err(del) = self.directory.delete(&path) {
                log::warn!("Failed to remove partial {}: {}", path.display(), del);
            }
            return Err(e);
        }
        let bytes = out.bytes_written();
        out.finish()?;
        self.directory.sync()?;

        log::debug!(
            "Columnstore commit for segment {}: {} of {} columns, {} bytes",
            segment.id.to_hex(),
            written,
            registered,
            bytes
        );
        Ok(true)
    }

    fn write_columns(
        &self,
        out: &mut Box<dyn StreamingWriter>,
        columns: Vec<(ColumnWriter, Option<String>, Vec<u8>)>,
        state: &FlushState,
    ) -> Result<()> {
        let mut headers = Vec::with_capacity(columns.len());
        for (column, name, payload) in columns {
            headers.push(self.write_column(out, column, name, payload, state)?);
        }
        let headers_offset = out.bytes_written();
        write_headers_and_footer(out, headers_offset, &headers)?;
        Ok(())
    }

    fn write_column(
        &self,
        out: &mut Box<dyn StreamingWriter>,
        mut column: ColumnWriter,
        name: Option<String>,
        payload: Vec<u8>,
        state: &FlushState,
    ) -> Result<ColumnHeader> {
        let count = column.count();
        let min_doc = column.min_doc;
        let max_doc = column.last_doc();

        let mut shape = column.shape();
        let contiguous = (max_doc - min_doc) as u64 + 1 == count as u64;
        if self.config.options.consolidation && contiguous {
            match shape {
                ColumnShape::Mask => shape = ColumnShape::DenseFixed { stride: 0 },
                ColumnShape::Fixed { stride } => shape = ColumnShape::DenseFixed { stride },
                _ => {}
            }
        }

        // Presence bitmap and skip index
        let docs_offset = out.bytes_written();
        let (mut docs_len, mut docs_index, mut index_len) = (0, 0, 0);
        if !matches!(shape, ColumnShape::DenseFixed { .. }) {
            column.docs.set_universe(state.docs_count);
            column.docs.finish()?;
            let index = column.docs.index().to_vec();
            let bitmap = std::mem::replace(&mut column.docs, SparseBitmapWriter::new(Vec::new()))
                .into_inner();
            out.write_all(&bitmap)?;
            docs_len = bitmap.len() as u64;
            if index.len() > 1 {
                docs_index = out.bytes_written();
                index_len = index.len() as u32;
                write_index(&index, out)?;
            }
        }

        // Value pages
        let cipher = if column.encrypt {
            self.config.cipher.as_deref()
        } else {
            None
        };
        let values_per_page = self.config.values_per_page();
        let (pages_offset, page_count) = if shape.stride() == 0 && shape != ColumnShape::Sparse {
            (0, 0)
        } else {
            write_pages(out, &column, values_per_page, cipher)?
        };

        // Offset table
        let (mut offsets_offset, mut offsets_bits) = (0, 0);
        if shape == ColumnShape::Sparse {
            let mut offsets = std::mem::take(&mut column.offsets);
            offsets.push(column.values.len() as u64);
            offsets_bits = bits_needed(column.values.len() as u64);
            let mut packed = Vec::new();
            bitpack_write(&offsets, offsets_bits, &mut packed);
            offsets_offset = out.bytes_written();
            out.write_all(&packed)?;
        }

        let mut props = ColumnProperties::NORMAL;
        if cipher.is_some() && page_count > 0 {
            props.insert(ColumnProperties::ENCRYPT);
        }
        if name.is_none() {
            props.insert(ColumnProperties::NO_NAME);
        }

        log::debug!(
            "Column {} ({}): {} docs in [{}, {}], {:?}, {} pages",
            column.id,
            name.as_deref().unwrap_or("<unnamed>"),
            count,
            min_doc,
            max_doc,
            shape,
            page_count
        );

        Ok(ColumnHeader {
            id: column.id,
            shape,
            props,
            name,
            docs_count: count as u64,
            min_doc,
            max_doc,
            docs_offset,
            docs_len,
            docs_index,
            index_len,
            pages_offset,
            page_count,
            values_per_page,
            offsets_offset,
            offsets_bits,
            compression: column.compression,
            payload,
        })
    }
}

/// Write the column's values in pages followed by the page table.
/// Returns (page table offset, page count).
fn write_pages(
    out: &mut Box<dyn StreamingWriter>,
    column: &ColumnWriter,
    values_per_page: u32,
    cipher: Option<&dyn Cipher>,
) -> Result<(u64, u32)> {
    let count = column.offsets.len();
    let per_page = values_per_page as usize;
    let mut entries = Vec::with_capacity(count.div_ceil(per_page));

    for first in (0..count).step_by(per_page) {
        let end_value = (first + per_page).min(count);
        let start = column.offsets[first] as usize;
        let end = column
            .offsets
            .get(end_value)
            .map_or(column.values.len(), |&o| o as usize);
        let raw = &column.values[start..end];
        let raw_len = u32::try_from(raw.len()).map_err(|_| {
            Error::Config(format!(
                "Column {}: page of {} bytes exceeds the 4GiB page limit",
                column.id,
                raw.len()
            ))
        })?;

        let compressed = column
            .compressor
            .compress(raw, column.level)
            .map_err(|e| Error::Compression(format!("column {}: {}", column.id, e)))?;
        // Keep compressed pages only when they save at least 1/8
        let (mut stored, is_compressed) = if compressed.len() * 8 < raw.len() * 7 {
            (compressed, true)
        } else {
            (raw.to_vec(), false)
        };

        let offset = out.bytes_written();
        if let Some(cipher) = cipher {
            cipher
                .encrypt(offset, &mut stored)
                .map_err(|e| Error::Encryption(format!("column {}: {}", column.id, e)))?;
        }
        out.write_all(&stored)?;
        entries.push(PageEntry {
            offset,
            stored_len: stored.len() as u32,
            raw_len,
            compressed: is_compressed,
        });
    }

    let pages_offset = out.bytes_written();
    for entry in &entries {
        entry.write_to(out)?;
    }
    Ok((pages_offset, entries.len() as u32))
}
