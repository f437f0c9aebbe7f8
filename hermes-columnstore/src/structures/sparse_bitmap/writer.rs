//! Streaming writer for sparse presence bitmaps

use std::io::Write;

use super::SkipEntry;
use crate::DocId;
use crate::doc_limits::{INVALID, TERMINATED};
use crate::error::Result;
use crate::structures::bit_block::{
    BLOCK_HEADER_SIZE, BLOCK_SIZE, BLOCK_WORDS, block_of, encode_block, offset_in_block,
};

/// Writes a strictly increasing set of document ids block by block.
///
/// Only the current block is buffered (as a 65536-bit bitset); it is
/// encoded and written to the sink once an id from a later block arrives,
/// so every block is encoded exactly once.
pub struct SparseBitmapWriter<W: Write> {
    out: W,
    words: Box<[u64]>,
    /// Block number of the buffered ids
    block: u32,
    /// Ids buffered in `words`
    block_count: u32,
    /// Ids in already flushed blocks
    flushed: u32,
    /// Last id of the last flushed block
    flushed_last: DocId,
    last: DocId,
    /// Largest admissible id, when the document universe is known
    max_doc: Option<DocId>,
    bytes_written: u64,
    index: Vec<SkipEntry>,
    finished: bool,
}

impl<W: Write> SparseBitmapWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            words: vec![0u64; BLOCK_WORDS].into_boxed_slice(),
            block: 0,
            block_count: 0,
            flushed: 0,
            flushed_last: INVALID,
            last: INVALID,
            max_doc: None,
            bytes_written: 0,
            index: Vec::new(),
            finished: false,
        }
    }

    /// Writer for ids in `MIN..=max_doc`.
    ///
    /// The last block only spans up to `max_doc`, so a fully populated tail
    /// still encodes as `All`.
    pub fn with_universe(out: W, max_doc: DocId) -> Self {
        let mut writer = Self::new(out);
        writer.max_doc = Some(max_doc);
        writer
    }

    /// Append `doc`.
    ///
    /// Returns `Ok(false)` without changing the bitmap if `doc` is reserved,
    /// not greater than the last id, outside the universe, or the writer
    /// is already finished.
    pub fn push_back(&mut self, doc: DocId) -> Result<bool> {
        if self.finished
            || doc == INVALID
            || doc == TERMINATED
            || doc <= self.last
            || self.max_doc.is_some_and(|max| doc > max)
        {
            return Ok(false);
        }

        let block = block_of(doc);
        if block != self.block {
            self.flush_block()?;
            self.block = block;
        }

        let offset = offset_in_block(doc) as usize;
        self.words[offset / 64] |= 1u64 << (offset % 64);
        self.block_count += 1;
        self.last = doc;
        Ok(true)
    }

    /// Remove `doc` if it is still buffered in the current block.
    ///
    /// Returns `false` when `doc` is absent or its block was already
    /// written out.
    pub fn erase(&mut self, doc: DocId) -> bool {
        if self.finished
            || doc == INVALID
            || doc == TERMINATED
            || self.block_count == 0
            || block_of(doc) != self.block
        {
            return false;
        }

        let offset = offset_in_block(doc) as usize;
        let bit = 1u64 << (offset % 64);
        if self.words[offset / 64] & bit == 0 {
            return false;
        }
        self.words[offset / 64] &= !bit;
        self.block_count -= 1;

        if doc == self.last {
            self.last = self.buffered_last().unwrap_or(self.flushed_last);
        }
        true
    }

    /// Bound the universe to `MIN..=max_doc` before the last block is
    /// written, so a full tail encodes as `All`.
    ///
    /// Returns `false` if an id above `max_doc` was already pushed or the
    /// writer is finished.
    pub fn set_universe(&mut self, max_doc: DocId) -> bool {
        if self.finished || self.last > max_doc {
            return false;
        }
        self.max_doc = Some(max_doc);
        true
    }

    /// Flush the trailing block and seal the skip index.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.flush_block()?;
        if self.index.is_empty() {
            self.index.push(SkipEntry::EMPTY);
        }
        self.out.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Skip index, one entry per written block. Complete after `finish()`.
    pub fn index(&self) -> &[SkipEntry] {
        &self.index
    }

    /// Ids pushed and not erased
    pub fn count(&self) -> u32 {
        self.flushed + self.block_count
    }

    /// Last id present, `INVALID` when none
    pub fn last(&self) -> DocId {
        self.last
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn span(&self, block: u32) -> u32 {
        match self.max_doc {
            Some(max) if block_of(max) == block => offset_in_block(max) + 1,
            _ => BLOCK_SIZE,
        }
    }

    fn buffered_last(&self) -> Option<DocId> {
        let base = self.block << 16;
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| base + i as u32 * 64 + 63 - w.leading_zeros())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block_count == 0 {
            return Ok(());
        }

        let span = self.span(self.block);
        let offset = self.bytes_written;
        let encoding = encode_block(
            self.block as u16,
            &self.words,
            self.block_count,
            span,
            &mut self.out,
        )?;
        self.index.push(SkipEntry {
            block: self.block as u16,
            cumulative: self.flushed,
            offset: offset as u32,
            encoding,
        });

        self.bytes_written +=
            (BLOCK_HEADER_SIZE + encoding.payload_len(self.block_count, span)) as u64;
        self.flushed += self.block_count;
        self.flushed_last = self.last;
        self.block_count = 0;
        self.words.fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::bit_block::BlockEncoding;

    #[test]
    fn test_rejects_invalid_ids() {
        let mut writer = SparseBitmapWriter::new(Vec::new());
        assert!(!writer.push_back(INVALID).unwrap());
        assert!(!writer.push_back(TERMINATED).unwrap());
        assert!(writer.push_back(10).unwrap());
        assert!(!writer.push_back(10).unwrap());
        assert!(!writer.push_back(5).unwrap());
        assert!(writer.push_back(11).unwrap());
        assert_eq!(writer.count(), 2);
    }

    #[test]
    fn test_empty_bitmap() {
        let mut writer = SparseBitmapWriter::new(Vec::new());
        writer.finish().unwrap();
        assert_eq!(writer.index(), &[SkipEntry::EMPTY]);
        assert_eq!(writer.bytes_written(), 0);
        assert!(writer.into_inner().is_empty());
    }

    #[test]
    fn test_blocks_and_index() {
        let mut writer = SparseBitmapWriter::new(Vec::new());
        for doc in [1u32, 2, 3] {
            writer.push_back(doc).unwrap();
        }
        // Dense block 2
        for doc in (2 * BLOCK_SIZE..3 * BLOCK_SIZE).step_by(2) {
            writer.push_back(doc).unwrap();
        }
        writer.push_back(5 * BLOCK_SIZE + 7).unwrap();
        writer.finish().unwrap();

        let index = writer.index().to_vec();
        assert_eq!(index.len(), 3);
        assert_eq!(
            index[0],
            SkipEntry {
                block: 0,
                cumulative: 0,
                offset: 0,
                encoding: BlockEncoding::Sparse
            }
        );
        assert_eq!(
            index[1],
            SkipEntry {
                block: 2,
                cumulative: 3,
                offset: 12,
                encoding: BlockEncoding::Dense
            }
        );
        assert_eq!(
            index[2],
            SkipEntry {
                block: 5,
                cumulative: 3 + BLOCK_SIZE / 2,
                offset: 12 + 6 + 8192,
                encoding: BlockEncoding::Sparse
            }
        );
        assert_eq!(writer.count(), 4 + BLOCK_SIZE / 2);
        assert_eq!(writer.bytes_written(), 12 + 6 + 8192 + 8);
        assert_eq!(writer.into_inner().len(), 12 + 6 + 8192 + 8);
    }

    #[test]
    fn test_erase_current_block() {
        let mut writer = SparseBitmapWriter::new(Vec::new());
        writer.push_back(40).unwrap();
        writer.push_back(42).unwrap();
        assert!(writer.erase(42));
        assert!(!writer.erase(42));
        assert_eq!(writer.last(), 40);
        // The erased slot can be reused
        assert!(writer.push_back(41).unwrap());
        assert_eq!(writer.count(), 2);
    }

    #[test]
    fn test_erase_after_flush() {
        let mut writer = SparseBitmapWriter::new(Vec::new());
        writer.push_back(42).unwrap();
        writer.push_back(70000).unwrap();
        assert!(!writer.erase(42));
        assert!(writer.erase(70000));
        // Falls back to the last flushed id
        assert_eq!(writer.last(), 42);
        assert!(!writer.push_back(42).unwrap());
        writer.finish().unwrap();
        assert_eq!(writer.count(), 1);
        assert_eq!(writer.index().len(), 1);
    }

    #[test]
    fn test_universe_tail() {
        let max_doc = BLOCK_SIZE + 99;
        let mut writer = SparseBitmapWriter::with_universe(Vec::new(), max_doc);
        for doc in BLOCK_SIZE..=max_doc {
            assert!(writer.push_back(doc).unwrap());
        }
        assert!(!writer.push_back(max_doc + 1).unwrap());
        writer.finish().unwrap();
        assert_eq!(writer.index()[0].encoding, BlockEncoding::All);
        assert_eq!(writer.bytes_written(), BLOCK_HEADER_SIZE as u64);
    }

    #[test]
    fn test_late_universe() {
        let mut writer = SparseBitmapWriter::new(Vec::new());
        for doc in 1..=10 {
            writer.push_back(doc).unwrap();
        }
        assert!(!writer.set_universe(9));
        assert!(writer.set_universe(10));
        writer.finish().unwrap();
        // Span 11 with doc 0 absent: one dense word beats ten offsets
        assert_eq!(writer.index()[0].encoding, BlockEncoding::Dense);
        assert_eq!(writer.bytes_written(), BLOCK_HEADER_SIZE as u64 + 8);
        assert!(!writer.set_universe(20));
    }

    #[test]
    fn test_push_after_finish() {
        let mut writer = SparseBitmapWriter::new(Vec::new());
        writer.push_back(1).unwrap();
        writer.finish().unwrap();
        assert!(!writer.push_back(2).unwrap());
        assert!(!writer.erase(1));
    }
}
