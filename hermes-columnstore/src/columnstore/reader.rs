//! Columnstore reader
//!
//! Opening validates every column header against the segment and the
//! file bounds; after that, reading never fails except on page decode.

use rustc_hash::FxHashMap;
use std::io;
use std::ops::Range;
use std::sync::Arc;

use super::format::{
    COLUMNSTORE_FOOTER_SIZE, ColumnHeader, ColumnId, ColumnShape, PAGE_ENTRY_SIZE, PageEntry,
    read_footer, read_headers,
};
use super::iterator::{ColumnIterator, DenseRange, DocIterator};
use crate::compression::Compressor;
use crate::config::ColumnstoreConfig;
use crate::directories::{Directory, OwnedBytes};
use crate::doc_limits::INVALID;
use crate::encryption::Cipher;
use crate::error::{Error, Result, corruption};
use crate::query::DocSet;
use crate::segment::{SegmentFiles, SegmentMeta};
use crate::structures::bit_block::{BLOCK_HEADER_SIZE, BlockHeader};
use crate::structures::bitpacking::{bitpack_read, packed_len};
use crate::structures::sparse_bitmap::{
    BitmapIteratorOptions, SKIP_ENTRY_SIZE, SkipEntry, SparseBitmapIterator, read_index,
};

/// How an iterator will be consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnHint {
    /// Random seeks; the skip index is used
    #[default]
    Normal,
    /// One sequential pass (merges); the skip index is not loaded
    Consolidation,
    /// Presence only; payloads are never decoded
    Mask,
}

/// Read-only value storage of one column, shared by its iterators
pub(crate) struct ColumnValues {
    file: OwnedBytes,
    pub(crate) shape: ColumnShape,
    pub(crate) count: u32,
    pub(crate) values_per_page: u32,
    pages: Vec<PageEntry>,
    offsets: OwnedBytes,
    offsets_bits: u8,
    compressor: Option<Arc<dyn Compressor>>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl ColumnValues {
    /// Whether values carry any bytes
    pub(crate) fn has_payload(&self) -> bool {
        !self.pages.is_empty()
    }

    /// Decrypt and decompress one page.
    pub(crate) fn load_page(&self, page: usize) -> Result<OwnedBytes> {
        let entry = self
            .pages
            .get(page)
            .ok_or_else(|| corruption(format!("page {} out of range", page)))?;
        let start = entry.offset as usize;
        let stored = self
            .file
            .try_slice(start..start + entry.stored_len as usize)
            .map_err(|e| corruption(format!("page {}: {}", page, e)))?;

        let stored = match &self.cipher {
            Some(cipher) => {
                let mut buf = stored.to_vec();
                cipher
                    .decrypt(entry.offset, &mut buf)
                    .map_err(|e| Error::Encryption(format!("page {}: {}", page, e)))?;
                OwnedBytes::new(buf)
            }
            None => stored,
        };

        let raw = if entry.compressed {
            let compressor = self
                .compressor
                .as_ref()
                .ok_or_else(|| corruption(format!("page {} compressed without compressor", page)))?;
            let raw = compressor
                .decompress(&stored, entry.raw_len as usize)
                .map_err(|e| Error::Compression(format!("page {}: {}", page, e)))?;
            OwnedBytes::new(raw)
        } else {
            stored
        };

        if raw.len() != entry.raw_len as usize {
            return Err(corruption(format!(
                "page {} decoded to {} bytes, expected {}",
                page,
                raw.len(),
                entry.raw_len
            )));
        }
        Ok(raw)
    }

    /// Byte range of value `ordinal` inside its decoded page.
    pub(crate) fn value_range(&self, ordinal: u32, page_len: usize) -> Result<Range<usize>> {
        let page_first = ordinal - ordinal % self.values_per_page;
        let range = match self.shape {
            ColumnShape::Mask => 0..0,
            ColumnShape::Fixed { stride } | ColumnShape::DenseFixed { stride } => {
                let start = (ordinal - page_first) as usize * stride as usize;
                start..start + stride as usize
            }
            ColumnShape::Sparse => {
                let base = self.offset(page_first);
                let start = self.offset(ordinal);
                let end = self.offset(ordinal + 1);
                match (start.checked_sub(base), end.checked_sub(base)) {
                    (Some(s), Some(e)) if s <= e => s as usize..e as usize,
                    _ => {
                        return Err(corruption(format!(
                            "offset table out of order at value {}",
                            ordinal
                        )));
                    }
                }
            }
        };
        if range.end > page_len {
            return Err(corruption(format!(
                "value {} ends at {} past its page of {} bytes",
                ordinal, range.end, page_len
            )));
        }
        Ok(range)
    }

    #[inline]
    fn offset(&self, index: u32) -> u64 {
        bitpack_read(&self.offsets, self.offsets_bits, index as usize)
    }
}

/// One column of an opened columnstore
#[derive(Clone)]
pub struct ColumnReader {
    header: ColumnHeader,
    bitmap: OwnedBytes,
    index: Option<Arc<[SkipEntry]>>,
    values: Arc<ColumnValues>,
}

impl ColumnReader {
    pub fn id(&self) -> ColumnId {
        self.header.id
    }

    pub fn name(&self) -> Option<&str> {
        self.header.name.as_deref()
    }

    /// Number of documents with a value
    pub fn size(&self) -> u64 {
        self.header.docs_count
    }

    /// Header payload written by the column finalizer
    pub fn payload(&self) -> &[u8] {
        &self.header.payload
    }

    pub fn header(&self) -> &ColumnHeader {
        &self.header
    }

    pub fn shape(&self) -> ColumnShape {
        self.header.shape
    }

    /// New independent iterator over `(doc, payload)` pairs.
    pub fn iterator(&self, hint: ColumnHint) -> ColumnIterator {
        let count = self.values.count;
        let docs = match self.header.shape {
            ColumnShape::DenseFixed { .. } => {
                DocIterator::Dense(DenseRange::new(self.header.min_doc, self.header.max_doc))
            }
            _ => {
                let index = match hint {
                    ColumnHint::Consolidation => None,
                    ColumnHint::Normal | ColumnHint::Mask => self.index.clone(),
                };
                DocIterator::Bitmap(SparseBitmapIterator::new(
                    self.bitmap.clone(),
                    BitmapIteratorOptions {
                        index,
                        count: Some(count),
                        use_index_for_cost: false,
                    },
                ))
            }
        };
        ColumnIterator::new(docs, Arc::clone(&self.values), hint == ColumnHint::Mask)
    }
}

impl std::fmt::Debug for ColumnReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnReader")
            .field("id", &self.header.id)
            .field("name", &self.header.name)
            .field("shape", &self.header.shape)
            .field("docs_count", &self.header.docs_count)
            .finish()
    }
}

/// Opened columnstore of one segment
#[derive(Debug, Default)]
pub struct ColumnstoreReader {
    /// Sorted by id
    columns: Vec<ColumnReader>,
    by_name: FxHashMap<String, usize>,
}

impl ColumnstoreReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the columnstore of `segment`, `None` if it has none.
    pub fn open(
        directory: &dyn Directory,
        segment: &SegmentMeta,
        config: &ColumnstoreConfig,
    ) -> Result<Option<Self>> {
        let mut reader = Self::new();
        Ok(reader
            .prepare(directory, segment, config)?
            .then_some(reader))
    }

    /// Load the columnstore of `segment`, replacing any loaded one.
    ///
    /// Returns `Ok(false)` when the segment has no columnstore file.
    pub fn prepare(
        &mut self,
        directory: &dyn Directory,
        segment: &SegmentMeta,
        config: &ColumnstoreConfig,
    ) -> Result<bool> {
        self.columns.clear();
        self.by_name.clear();

        let path = SegmentFiles::new(segment.id).columnstore;
        if !directory.exists(&path)? {
            log::debug!("No columnstore for segment {}", segment.id.to_hex());
            return Ok(false);
        }
        let file = directory.open_read(&path)?;

        let (headers_offset, column_count) =
            read_footer(&file).map_err(|e| corrupt_io("footer", e))?;
        let headers_end = file.len() - COLUMNSTORE_FOOTER_SIZE;
        let headers = read_headers(&file[headers_offset as usize..headers_end], column_count)
            .map_err(|e| corrupt_io("column headers", e))?;

        let mut columns = Vec::with_capacity(headers.len());
        for header in headers {
            if columns
                .last()
                .is_some_and(|prev: &ColumnReader| prev.id() >= header.id)
            {
                return Err(corruption(format!(
                    "column {} out of order in {}",
                    header.id,
                    path.display()
                )));
            }
            columns.push(open_column(&file, headers_offset, header, segment, config)?);
        }

        let mut by_name = FxHashMap::default();
        for (i, column) in columns.iter().enumerate() {
            if let Some(name) = column.name() {
                by_name.entry(name.to_string()).or_insert(i);
            }
        }

        log::debug!(
            "Opened columnstore {}: {} columns, {} bytes",
            path.display(),
            columns.len(),
            file.len()
        );
        self.columns = columns;
        self.by_name = by_name;
        Ok(true)
    }

    /// Number of columns
    pub fn size(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnReader] {
        &self.columns
    }

    pub fn column(&self, id: ColumnId) -> Option<&ColumnReader> {
        self.columns
            .binary_search_by_key(&id, |c| c.id())
            .ok()
            .map(|i| &self.columns[i])
    }

    pub fn header(&self, id: ColumnId) -> Option<&ColumnHeader> {
        self.column(id).map(ColumnReader::header)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnReader> {
        self.by_name.get(name).map(|&i| &self.columns[i])
    }
}

fn corrupt_io(what: &str, e: io::Error) -> Error {
    corruption(format!("{}: {}", what, e))
}

/// Bounds-checked view of `len` bytes at `offset`, below `limit`.
fn section(file: &OwnedBytes, offset: u64, len: u64, limit: u64, what: &str) -> Result<OwnedBytes> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(file.slice(offset as usize..end as usize)),
        _ => Err(corruption(format!(
            "{} [{}, +{}) exceeds column data ({} bytes)",
            what, offset, len, limit
        ))),
    }
}

fn open_column(
    file: &OwnedBytes,
    data_end: u64,
    header: ColumnHeader,
    segment: &SegmentMeta,
    config: &ColumnstoreConfig,
) -> Result<ColumnReader> {
    let id = header.id;
    let count = header.docs_count;

    if count == 0 || count > segment.docs_count as u64 {
        return Err(corruption(format!(
            "column {}: {} docs in a segment of {}",
            id, count, segment.docs_count
        )));
    }
    if header.min_doc == INVALID
        || header.min_doc > header.max_doc
        || header.max_doc > segment.docs_count
        || ((header.max_doc - header.min_doc) as u64) + 1 < count
    {
        return Err(corruption(format!(
            "column {}: doc range [{}, {}] invalid for {} docs in a segment of {}",
            id, header.min_doc, header.max_doc, count, segment.docs_count
        )));
    }

    let compressor = if header.page_count > 0 {
        let compressor = config.compressors.get(&header.compression).ok_or_else(|| {
            Error::Config(format!(
                "column {}: unknown compression '{}'",
                id, header.compression
            ))
        })?;
        Some(compressor)
    } else {
        None
    };
    let cipher = if header.is_encrypted() {
        let cipher = config.cipher.clone().ok_or_else(|| {
            Error::Config(format!("column {} is encrypted but no cipher is configured", id))
        })?;
        log::debug!("Column {} decrypts with {}", id, cipher.name());
        Some(cipher)
    } else {
        None
    };

    // Presence
    let bitmap = section(file, header.docs_offset, header.docs_len, data_end, "bitmap")?;
    let index = if header.docs_index != 0 {
        let bytes = section(
            file,
            header.docs_index,
            header.index_len as u64 * SKIP_ENTRY_SIZE as u64,
            data_end,
            "skip index",
        )?;
        let entries = read_index(&bytes).map_err(|e| corrupt_io("skip index", e))?;
        Some(Arc::<[SkipEntry]>::from(entries))
    } else {
        None
    };

    let present = match (&header.shape, &index) {
        (ColumnShape::DenseFixed { .. }, _) => {
            if !bitmap.is_empty() || index.is_some() {
                return Err(corruption(format!(
                    "column {}: dense column with a bitmap",
                    id
                )));
            }
            (header.max_doc - header.min_doc) as u64 + 1
        }
        (_, Some(index)) => {
            let it = SparseBitmapIterator::new(
                bitmap.clone(),
                BitmapIteratorOptions::with_index(Arc::clone(index)),
            );
            it.cost()
        }
        (_, None) => {
            let block = BlockHeader::parse(&bitmap).map_err(|e| corrupt_io("bitmap", e))?;
            if bitmap.len() != BLOCK_HEADER_SIZE + block.payload_len() {
                return Err(corruption(format!(
                    "column {}: single-block bitmap of {} bytes",
                    id,
                    bitmap.len()
                )));
            }
            block.cardinality as u64
        }
    };
    if present != count {
        return Err(corruption(format!(
            "column {}: bitmap holds {} docs, header says {}",
            id, present, count
        )));
    }

    // Values
    let expected_pages = match header.shape {
        ColumnShape::Mask | ColumnShape::DenseFixed { stride: 0 } => 0,
        _ if header.values_per_page == 0 => {
            return Err(corruption(format!("column {}: zero values per page", id)));
        }
        _ => count.div_ceil(header.values_per_page as u64),
    };
    if header.page_count as u64 != expected_pages {
        return Err(corruption(format!(
            "column {}: {} pages, expected {}",
            id, header.page_count, expected_pages
        )));
    }
    let table = section(
        file,
        header.pages_offset,
        header.page_count as u64 * PAGE_ENTRY_SIZE as u64,
        data_end,
        "page table",
    )?;
    let mut pages = Vec::with_capacity(header.page_count as usize);
    let mut cursor = table.as_slice();
    for page in 0..header.page_count {
        let entry = PageEntry::read_from(&mut cursor).map_err(|e| corrupt_io("page table", e))?;
        section(file, entry.offset, entry.stored_len as u64, data_end, "page")?;
        if !entry.compressed && cipher.is_none() && entry.stored_len != entry.raw_len {
            return Err(corruption(format!(
                "column {}: raw page {} stores {} of {} bytes",
                id, page, entry.stored_len, entry.raw_len
            )));
        }
        let stride = header.shape.stride() as u64;
        if stride > 0 {
            let first = page as u64 * header.values_per_page as u64;
            let values = (count - first).min(header.values_per_page as u64);
            if entry.raw_len as u64 != values * stride {
                return Err(corruption(format!(
                    "column {}: page {} holds {} bytes for {} values of {}",
                    id, page, entry.raw_len, values, stride
                )));
            }
        }
        pages.push(entry);
    }

    let offsets = if header.shape == ColumnShape::Sparse {
        let len = packed_len(count as usize + 1, header.offsets_bits);
        section(file, header.offsets_offset, len as u64, data_end, "offset table")?
    } else {
        OwnedBytes::empty()
    };

    let values = ColumnValues {
        file: file.clone(),
        shape: header.shape,
        count: count as u32,
        values_per_page: header.values_per_page.max(1),
        pages,
        offsets,
        offsets_bits: header.offsets_bits,
        compressor,
        cipher,
    };
    Ok(ColumnReader {
        header,
        bitmap,
        index,
        values: Arc::new(values),
    })
}
