//! DocSet trait for document iteration.
//!
//! `DocSet` is the base abstraction for forward-only cursors over sorted
//! document IDs. Presence bitmaps and column value iterators implement it.

use crate::doc_limits::TERMINATED;
use crate::{DocId, Score};

/// Score reported by iterators that carry no relevance ranking.
pub const NO_SCORE: Score = 0.0;

/// Forward-only cursor over sorted document IDs.
///
/// A fresh cursor is positioned *before* its first document and reports
/// [`INVALID`](crate::doc_limits::INVALID). Once exhausted it reports
/// [`TERMINATED`] forever.
pub trait DocSet: Send + Sync {
    /// Current document ID, `INVALID` before the first advance, or
    /// [`TERMINATED`] if exhausted.
    fn doc(&self) -> DocId;

    /// Advance to the next document. Returns the new doc ID or [`TERMINATED`].
    fn advance(&mut self) -> DocId;

    /// Seek to the first document >= `target`. Returns doc ID or [`TERMINATED`].
    ///
    /// Never moves backwards: a target at or before the current document
    /// leaves the cursor where it is.
    fn seek(&mut self, target: DocId) -> DocId {
        let mut doc = self.doc();
        while doc < target {
            doc = self.advance();
        }
        doc
    }

    /// Advance and report whether a document was reached.
    fn next(&mut self) -> bool {
        self.advance() != TERMINATED
    }

    /// Estimated number of documents in the whole set, independent of the
    /// cursor position.
    fn size_hint(&self) -> u32;

    /// Cardinality estimate for the whole set (0 when unknown).
    fn cost(&self) -> u64 {
        self.size_hint() as u64
    }

    /// Relevance score of the current document.
    fn score(&self) -> Score {
        NO_SCORE
    }
}

impl DocSet for Box<dyn DocSet + '_> {
    #[inline]
    fn doc(&self) -> DocId {
        (**self).doc()
    }
    #[inline]
    fn advance(&mut self) -> DocId {
        (**self).advance()
    }
    #[inline]
    fn seek(&mut self, target: DocId) -> DocId {
        (**self).seek(target)
    }
    #[inline]
    fn next(&mut self) -> bool {
        (**self).next()
    }
    #[inline]
    fn size_hint(&self) -> u32 {
        (**self).size_hint()
    }
    #[inline]
    fn cost(&self) -> u64 {
        (**self).cost()
    }
    #[inline]
    fn score(&self) -> Score {
        (**self).score()
    }
}
