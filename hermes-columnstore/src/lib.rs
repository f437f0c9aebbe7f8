//! Hermes columnstore - per-document value storage for hermes segments
//!
//! This crate provides the storage/codec core that filters, scorers and
//! merges read document values from:
//! - Sparse presence bitmaps: 65536-doc blocks encoded as all/sparse/dense
//!   with a block-level skip index for O(log blocks) seeks
//! - A columnstore writer that classifies each column (mask, fixed-width,
//!   variable-width, dense fixed) and writes paged, optionally compressed
//!   and encrypted payloads
//! - A columnstore reader producing independent, `Send + Sync` iterators
//!   over `(doc, payload)` pairs

pub mod columnstore;
pub mod compression;
pub mod config;
pub mod directories;
pub mod encryption;
pub mod error;
pub mod query;
pub mod segment;
pub mod structures;

// Re-exports from columnstore
pub use columnstore::{
    ColumnFinalizer, ColumnHeader, ColumnHint, ColumnId, ColumnInfo, ColumnIterator,
    ColumnProperties, ColumnReader, ColumnShape, ColumnType, ColumnWriter, ColumnstoreReader,
    ColumnstoreWriter, Finalized, ValueOutput,
};

// Re-exports from structures
pub use structures::{
    BLOCK_SIZE, BitmapIteratorOptions, BlockEncoding, SkipEntry, SparseBitmapIterator,
    SparseBitmapWriter,
};

// Re-exports from directories
#[cfg(feature = "native")]
pub use directories::MmapDirectory;
pub use directories::{
    Directory, DirectoryWriter, IndexInput, OwnedBytes, RamDirectory, StreamingWriter,
};

// Re-exports from other modules
pub use compression::{CompressionLevel, CompressionRegistry, Compressor};
pub use config::{ColumnstoreConfig, ColumnstoreOptions};
pub use encryption::Cipher;
pub use error::{Error, Result};
pub use query::DocSet;
pub use segment::{FlushState, SegmentFiles, SegmentId, SegmentMeta};

pub type DocId = u32;
pub type Score = f32;

/// Document id limits shared by bitmaps and columns.
pub mod doc_limits {
    use crate::DocId;

    /// Reserved id; the value of an iterator before its first advance.
    pub const INVALID: DocId = 0;

    /// First valid document id.
    pub const MIN: DocId = 1;

    /// End-of-stream sentinel.
    pub const TERMINATED: DocId = DocId::MAX;
}

pub use doc_limits::TERMINATED;
