//! Column value iterator

use std::sync::Arc;

use super::reader::ColumnValues;
use crate::directories::OwnedBytes;
use crate::doc_limits::{INVALID, TERMINATED};
use crate::error::Result;
use crate::query::DocSet;
use crate::structures::sparse_bitmap::SparseBitmapIterator;
use crate::DocId;

/// Every id in `[first, last]`, for columns stored without a bitmap
#[derive(Debug, Clone)]
pub(crate) struct DenseRange {
    first: DocId,
    last: DocId,
    doc: DocId,
}

impl DenseRange {
    pub(crate) fn new(first: DocId, last: DocId) -> Self {
        debug_assert!(first != INVALID && first <= last && last != TERMINATED);
        Self {
            first,
            last,
            doc: INVALID,
        }
    }

    fn count(&self) -> u32 {
        self.last - self.first + 1
    }

    fn ordinal(&self) -> u32 {
        match self.doc {
            INVALID => 0,
            TERMINATED => self.count(),
            doc => doc - self.first,
        }
    }
}

impl DocSet for DenseRange {
    fn doc(&self) -> DocId {
        self.doc
    }

    fn advance(&mut self) -> DocId {
        self.doc = match self.doc {
            INVALID => self.first,
            TERMINATED => TERMINATED,
            doc if doc >= self.last => TERMINATED,
            doc => doc + 1,
        };
        self.doc
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if self.doc == TERMINATED || target <= self.doc {
            return self.doc;
        }
        self.doc = if target > self.last {
            TERMINATED
        } else {
            target.max(self.first)
        };
        self.doc
    }

    fn size_hint(&self) -> u32 {
        self.count()
    }
}

/// Source of document ids and ordinals
#[derive(Debug, Clone)]
pub(crate) enum DocIterator {
    Bitmap(SparseBitmapIterator),
    Dense(DenseRange),
}

impl DocIterator {
    #[inline]
    fn ordinal(&self) -> u32 {
        match self {
            Self::Bitmap(it) => it.ordinal(),
            Self::Dense(it) => it.ordinal(),
        }
    }
}

/// Iterator over the `(doc, payload)` pairs of one column.
///
/// Each iterator decodes pages on its own and caches the current one, so
/// iterators over one column never contend with each other.
#[derive(Clone)]
pub struct ColumnIterator {
    docs: DocIterator,
    values: Arc<ColumnValues>,
    /// Payloads are never decoded
    mask: bool,
    page: Option<(usize, OwnedBytes)>,
}

impl ColumnIterator {
    pub(crate) fn new(docs: DocIterator, values: Arc<ColumnValues>, mask: bool) -> Self {
        Self {
            docs,
            values,
            mask,
            page: None,
        }
    }

    /// Rank of the current document within the column
    #[inline]
    pub fn ordinal(&self) -> u32 {
        self.docs.ordinal()
    }

    /// Value of the current document.
    ///
    /// Empty before the first advance, at EOF, for presence-only columns
    /// and for iterators created with [`ColumnHint::Mask`](super::ColumnHint::Mask).
    pub fn payload(&mut self) -> Result<&[u8]> {
        let doc = self.doc();
        if doc == INVALID || doc == TERMINATED || self.mask || !self.values.has_payload() {
            return Ok(&[]);
        }

        let ordinal = self.ordinal();
        let page = (ordinal / self.values.values_per_page) as usize;
        if !matches!(self.page, Some((cached, _)) if cached == page) {
            let bytes = self.values.load_page(page)?;
            self.page = Some((page, bytes));
        }
        match &self.page {
            Some((_, bytes)) => {
                let range = self.values.value_range(ordinal, bytes.len())?;
                Ok(&bytes.as_slice()[range])
            }
            None => Ok(&[]),
        }
    }
}

impl DocSet for ColumnIterator {
    #[inline]
    fn doc(&self) -> DocId {
        match &self.docs {
            DocIterator::Bitmap(it) => it.doc(),
            DocIterator::Dense(it) => it.doc(),
        }
    }

    #[inline]
    fn advance(&mut self) -> DocId {
        match &mut self.docs {
            DocIterator::Bitmap(it) => it.advance(),
            DocIterator::Dense(it) => it.advance(),
        }
    }

    fn seek(&mut self, target: DocId) -> DocId {
        match &mut self.docs {
            DocIterator::Bitmap(it) => it.seek(target),
            DocIterator::Dense(it) => it.seek(target),
        }
    }

    fn size_hint(&self) -> u32 {
        self.values.count
    }
}
