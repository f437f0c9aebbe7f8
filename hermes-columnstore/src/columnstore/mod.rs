//! Columnstore: per-document values of a segment, one column per field
//!
//! Each column stores which documents have a value (a sparse presence
//! bitmap with skip index) and the values themselves, addressed by the
//! document's ordinal in the bitmap:
//!
//! | Shape        | Addressing                           | Bitmap |
//! |--------------|--------------------------------------|--------|
//! | `Mask`       | none, values are empty               | yes    |
//! | `Fixed`      | `ordinal * stride`                   | yes    |
//! | `Sparse`     | bitpacked offset table               | yes    |
//! | `DenseFixed` | `(doc - min_doc) * stride`           | no     |
//!
//! `DenseFixed` is only produced in consolidation mode, for columns whose
//! documents form one contiguous range.

mod format;
mod iterator;
mod reader;
mod writer;

pub use format::{
    COLUMNSTORE_FOOTER_SIZE, COLUMNSTORE_MAGIC, COLUMNSTORE_VERSION, ColumnHeader, ColumnId,
    ColumnProperties, ColumnShape, ColumnType, PageEntry,
};
pub use iterator::ColumnIterator;
pub use reader::{ColumnHint, ColumnReader, ColumnstoreReader};
pub use writer::{
    ColumnFinalizer, ColumnInfo, ColumnWriter, ColumnstoreWriter, Finalized, ValueOutput,
};

#[cfg(test)]
mod tests;
