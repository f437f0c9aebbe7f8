//! Forward iterator over a sparse presence bitmap

use std::sync::Arc;

use super::SkipEntry;
use crate::directories::OwnedBytes;
use crate::doc_limits::{INVALID, TERMINATED};
use crate::query::DocSet;
use crate::structures::bit_block::{
    BLOCK_HEADER_SIZE, BlockCursor, BlockHeader, BlockView, block_of, offset_in_block,
};
use crate::DocId;

/// Construction options for [`SparseBitmapIterator`]
#[derive(Debug, Clone, Default)]
pub struct BitmapIteratorOptions {
    /// Skip index written alongside the bitmap; enables O(log blocks) seeks
    pub index: Option<Arc<[SkipEntry]>>,
    /// Known number of present ids, reported as the cost
    pub count: Option<u32>,
    /// Derive the cost from the skip index when `count` is not given
    pub use_index_for_cost: bool,
}

impl BitmapIteratorOptions {
    pub fn with_index(index: Arc<[SkipEntry]>) -> Self {
        Self {
            index: Some(index),
            count: None,
            use_index_for_cost: true,
        }
    }
}

/// Iterator over the ids of a bitmap, tracking each id's ordinal.
///
/// Only the current block is decoded. Seeks jump through the skip index
/// when one is supplied and otherwise walk block headers forward from the
/// current block. Clones are independent cursors over the same bytes.
#[derive(Debug, Clone)]
pub struct SparseBitmapIterator {
    data: OwnedBytes,
    index: Option<Arc<[SkipEntry]>>,
    /// Present ids in the whole bitmap, when derivable from the index
    total: Option<u32>,
    cost: u32,

    header: Option<BlockHeader>,
    /// Byte range of the current block's payload
    payload_start: usize,
    payload_end: usize,
    /// Skip entry of the current block
    entry: usize,
    /// Ids in blocks before the current one
    block_ordinal: u32,

    cursor: BlockCursor,
    doc: DocId,
    ordinal: u32,
}

impl SparseBitmapIterator {
    pub fn new(data: OwnedBytes, options: BitmapIteratorOptions) -> Self {
        let BitmapIteratorOptions {
            index,
            count,
            use_index_for_cost,
        } = options;

        let total = index.as_deref().and_then(|entries| total_from_index(&data, entries));
        let cost = match count {
            Some(count) => count,
            None if use_index_for_cost => total.unwrap_or(0),
            None => 0,
        };

        Self {
            data,
            index,
            total,
            cost,
            header: None,
            payload_start: 0,
            payload_end: 0,
            entry: 0,
            block_ordinal: 0,
            cursor: BlockCursor::START,
            doc: INVALID,
            ordinal: 0,
        }
    }

    /// Iterator without skip index or count.
    pub fn sequential(data: OwnedBytes) -> Self {
        Self::new(data, BitmapIteratorOptions::default())
    }

    /// Rank of the current id among all present ids.
    ///
    /// Meaningful once positioned; equals the total count at EOF.
    #[inline]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Position on the id with the given ordinal.
    ///
    /// Never moves backwards: an ordinal below the current one leaves the
    /// iterator where it is. Returns the id, or `TERMINATED` when the
    /// bitmap holds `ordinal` or fewer ids.
    pub fn seek_ordinal(&mut self, ordinal: u32) -> DocId {
        if self.doc == TERMINATED || (self.doc != INVALID && ordinal <= self.ordinal) {
            return self.doc;
        }

        let in_current = self
            .header
            .is_some_and(|h| ordinal < self.block_ordinal + h.cardinality);
        if !in_current {
            let loaded = match self.index.clone() {
                Some(index) => {
                    let start = if self.header.is_some() { self.entry + 1 } else { 0 };
                    let rest = index.get(start..).unwrap_or(&[]);
                    let found = rest.partition_point(|e| e.cumulative <= ordinal);
                    if found == 0 {
                        return self.terminate(self.total.unwrap_or(self.scanned()));
                    }
                    let entry = start + found - 1;
                    self.load_entry(&index, entry)
                }
                None => {
                    let mut loaded = self.load_next_block();
                    while loaded {
                        let card = self.header.map_or(0, |h| h.cardinality);
                        if ordinal < self.block_ordinal + card {
                            break;
                        }
                        loaded = self.load_next_block();
                    }
                    loaded
                }
            };
            if !loaded {
                return self.doc;
            }
        }

        let rank = ordinal - self.block_ordinal;
        match self.view().and_then(|v| v.nth(rank)) {
            Some(offset) => self.set(BlockCursor { offset, rank }),
            None => self.terminate(self.scanned()),
        }
    }

    fn view(&self) -> Option<BlockView<'_>> {
        let header = self.header.as_ref()?;
        Some(BlockView::new_unchecked(
            header,
            &self.data.as_slice()[self.payload_start..self.payload_end],
        ))
    }

    /// Ids up to and including the current block
    fn scanned(&self) -> u32 {
        self.block_ordinal + self.header.map_or(0, |h| h.cardinality)
    }

    #[inline]
    fn set(&mut self, cursor: BlockCursor) -> DocId {
        let base = self.header.map_or(0, |h| h.base());
        self.cursor = cursor;
        self.doc = base + cursor.offset;
        self.ordinal = self.block_ordinal + cursor.rank;
        self.doc
    }

    fn terminate(&mut self, ordinal: u32) -> DocId {
        self.doc = TERMINATED;
        self.ordinal = ordinal;
        TERMINATED
    }

    /// Decode the block header at `pos`. Returns `false` at end of data
    /// or on malformed bytes, after terminating.
    fn load_block(&mut self, pos: usize, block_ordinal: u32) -> bool {
        if pos >= self.data.len() {
            let ordinal = self.scanned();
            self.terminate(ordinal);
            return false;
        }
        let bytes = self.data.as_slice();
        let header = match BlockHeader::parse(&bytes[pos..]) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("Corrupt bitmap block at offset {}: {}", pos, e);
                self.terminate(block_ordinal);
                return false;
            }
        };
        let start = pos + BLOCK_HEADER_SIZE;
        let end = start + header.payload_len();
        if end > bytes.len() {
            log::warn!(
                "Truncated bitmap block {} at offset {}: needs {} bytes, {} available",
                header.block,
                pos,
                end - pos,
                bytes.len() - pos
            );
            self.terminate(block_ordinal);
            return false;
        }
        if self.header.is_some_and(|prev| header.block <= prev.block) {
            log::warn!(
                "Bitmap block {} at offset {} does not follow block {}",
                header.block,
                pos,
                self.header.map_or(0, |h| h.block)
            );
            self.terminate(block_ordinal);
            return false;
        }

        self.header = Some(header);
        self.payload_start = start;
        self.payload_end = end;
        self.block_ordinal = block_ordinal;
        self.cursor = BlockCursor::START;
        true
    }

    fn load_next_block(&mut self) -> bool {
        let (pos, ordinal, entry) = match self.header {
            Some(_) => (self.payload_end, self.scanned(), self.entry + 1),
            None => (0, 0, 0),
        };
        let loaded = self.load_block(pos, ordinal);
        self.entry = entry;
        loaded
    }

    fn load_entry(&mut self, index: &[SkipEntry], entry: usize) -> bool {
        let e = index[entry];
        if e.offset as usize >= self.data.len() && !self.data.is_empty() {
            log::warn!(
                "Skip entry for block {} points past the bitmap ({} >= {})",
                e.block,
                e.offset,
                self.data.len()
            );
            self.terminate(e.cumulative);
            return false;
        }
        // Jumps may go to any later block; drop the order check
        self.header = None;
        if !self.load_block(e.offset as usize, e.cumulative) {
            return false;
        }
        self.entry = entry;
        if self.header.is_some_and(|h| h.block != e.block) {
            log::warn!(
                "Skip entry for block {} points at block {}",
                e.block,
                self.header.map_or(0, |h| h.block)
            );
            self.terminate(e.cumulative);
            return false;
        }
        true
    }

    /// Move to the first block numbered `>= block`.
    fn load_block_at_or_after(&mut self, block: u32) -> bool {
        match self.index.clone() {
            Some(index) => {
                let start = if self.header.is_some() { self.entry + 1 } else { 0 };
                let rest = index.get(start..).unwrap_or(&[]);
                let found = start + rest.partition_point(|e| (e.block as u32) < block);
                if found >= index.len() {
                    let ordinal = self.total.unwrap_or(self.scanned());
                    self.terminate(ordinal);
                    return false;
                }
                self.load_entry(&index, found)
            }
            None => loop {
                if !self.load_next_block() {
                    return false;
                }
                if self.header.is_some_and(|h| h.block as u32 >= block) {
                    return true;
                }
            },
        }
    }

    /// Position on the first id of the current block at or after `offset`,
    /// continuing into later blocks when the current one has none.
    fn position_in_block(&mut self, from: BlockCursor, offset: u32) -> DocId {
        match self.view().and_then(|v| v.seek(from, offset)) {
            Some(cursor) => self.set(cursor),
            None => self.first_of_next_block(),
        }
    }

    fn first_of_next_block(&mut self) -> DocId {
        if !self.load_next_block() {
            return self.doc;
        }
        match self.view().and_then(|v| v.seek(BlockCursor::START, 0)) {
            Some(cursor) => self.set(cursor),
            // Headers guarantee at least one id per block
            None => self.terminate(self.scanned()),
        }
    }
}

/// Total ids from the skip index plus the last block's header.
fn total_from_index(data: &OwnedBytes, entries: &[SkipEntry]) -> Option<u32> {
    let last = entries.last()?;
    if data.is_empty() {
        return Some(0);
    }
    let bytes = data.as_slice().get(last.offset as usize..)?;
    let header = BlockHeader::parse(bytes).ok()?;
    Some(last.cumulative + header.cardinality)
}

impl DocSet for SparseBitmapIterator {
    #[inline]
    fn doc(&self) -> DocId {
        self.doc
    }

    fn advance(&mut self) -> DocId {
        if self.doc == TERMINATED {
            return TERMINATED;
        }
        if self.doc == INVALID {
            return self.first_of_next_block();
        }
        match self.view().and_then(|v| v.next(self.cursor)) {
            Some(cursor) => self.set(cursor),
            None => self.first_of_next_block(),
        }
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if self.doc == TERMINATED || target <= self.doc {
            return self.doc;
        }
        if target == TERMINATED {
            if let Some(total) = self.total {
                return self.terminate(total);
            }
            // Walk the remaining headers to learn the final ordinal
            while self.load_next_block() {}
            return TERMINATED;
        }

        let block = block_of(target);
        let offset = offset_in_block(target);
        let current = self.header.map(|h| h.block as u32);
        match current {
            Some(b) if b == block && self.doc != INVALID => {
                self.position_in_block(self.cursor, offset)
            }
            _ => {
                if !self.load_block_at_or_after(block) {
                    return self.doc;
                }
                let landed = self.header.map_or(0, |h| h.block as u32);
                let offset = if landed == block { offset } else { 0 };
                self.position_in_block(BlockCursor::START, offset)
            }
        }
    }

    fn size_hint(&self) -> u32 {
        self.cost
    }

    fn cost(&self) -> u64 {
        self.cost as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::sparse_bitmap::SparseBitmapWriter;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn write(docs: &[DocId]) -> (OwnedBytes, Arc<[SkipEntry]>) {
        let mut writer = SparseBitmapWriter::new(Vec::new());
        for &doc in docs {
            assert!(writer.push_back(doc).unwrap());
        }
        writer.finish().unwrap();
        let index: Arc<[SkipEntry]> = writer.index().into();
        (OwnedBytes::new(writer.into_inner()), index)
    }

    fn iterators(docs: &[DocId]) -> Vec<SparseBitmapIterator> {
        let (data, index) = write(docs);
        vec![
            SparseBitmapIterator::new(data.clone(), BitmapIteratorOptions::with_index(index)),
            SparseBitmapIterator::sequential(data),
        ]
    }

    fn scenario_docs() -> Vec<DocId> {
        (1..=32)
            .chain(160..=1184)
            .chain(1201..=1731)
            .chain(60000..=64500)
            .collect()
    }

    fn random_docs(seed: u64, n: usize, max: DocId) -> Vec<DocId> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut docs: Vec<DocId> = (0..n).map(|_| rng.gen_range(1..max)).collect();
        docs.sort_unstable();
        docs.dedup();
        docs
    }

    #[test]
    fn test_forward_iteration() {
        let docs = scenario_docs();
        for mut it in iterators(&docs) {
            assert_eq!(it.doc(), INVALID);
            assert!(it.next());
            assert_eq!(it.doc(), 1);
            assert_eq!(it.ordinal(), 0);
            for _ in 1..32 {
                it.advance();
            }
            assert_eq!(it.doc(), 32);
            assert_eq!(it.advance(), 160);
            assert_eq!(it.ordinal(), 32);
            assert_eq!(it.seek(60000), 60000);
            assert_eq!(it.ordinal(), 1588);
        }
    }

    #[test]
    fn test_round_trip_random() {
        let docs = random_docs(42, 200_000, 5_000_000);
        for mut it in iterators(&docs) {
            let mut seen = Vec::with_capacity(docs.len());
            while it.next() {
                assert_eq!(it.ordinal() as usize, seen.len());
                seen.push(it.doc());
            }
            assert_eq!(seen, docs);
            assert_eq!(it.ordinal() as usize, docs.len());
        }
    }

    #[test]
    fn test_stateless_and_stateful_seeks_agree() {
        let docs = random_docs(7, 50_000, 3_000_000);
        let mut rng = StdRng::seed_from_u64(8);
        let mut targets: Vec<DocId> = (0..2_000).map(|_| rng.gen_range(1..3_100_000)).collect();
        targets.sort_unstable();

        let expected: Vec<(DocId, u32)> = targets
            .iter()
            .map(|&t| {
                let rank = docs.partition_point(|&d| d < t);
                (docs.get(rank).copied().unwrap_or(TERMINATED), rank as u32)
            })
            .collect();

        for template in iterators(&docs) {
            // One fresh iterator per seek
            for (&target, &(doc, rank)) in targets.iter().zip(&expected) {
                let mut it = template.clone();
                assert_eq!(it.seek(target), doc, "stateless seek({})", target);
                assert_eq!(it.ordinal(), rank);
            }
            // One iterator for all seeks
            let mut it = template.clone();
            for (&target, &(doc, rank)) in targets.iter().zip(&expected) {
                assert_eq!(it.seek(target), doc, "stateful seek({})", target);
                assert_eq!(it.ordinal(), rank);
            }
        }
    }

    #[test]
    fn test_seek_never_moves_backwards() {
        let docs = scenario_docs();
        for mut it in iterators(&docs) {
            assert_eq!(it.seek(1000), 1000);
            assert_eq!(it.seek(500), 1000);
            assert_eq!(it.seek(1000), 1000);
            assert_eq!(it.seek(1185), 1201);
            assert_eq!(it.ordinal(), 32 + 1025);
        }
    }

    #[test]
    fn test_eof_is_idempotent() {
        let docs = scenario_docs();
        for mut it in iterators(&docs) {
            assert_eq!(it.seek(64501), TERMINATED);
            assert_eq!(it.ordinal() as usize, docs.len());
            assert_eq!(it.seek(64501), TERMINATED);
            assert_eq!(it.seek(TERMINATED), TERMINATED);
            assert!(!it.next());
            assert_eq!(it.doc(), TERMINATED);
        }
        for mut it in iterators(&docs) {
            assert_eq!(it.seek(TERMINATED), TERMINATED);
            assert!(!it.next());
        }
    }

    #[test]
    fn test_empty_bitmap() {
        for mut it in iterators(&[]) {
            assert_eq!(it.cost(), 0);
            assert!(!it.next());
            assert_eq!(it.doc(), TERMINATED);
            assert_eq!(it.ordinal(), 0);
        }
        for mut it in iterators(&[]) {
            assert_eq!(it.seek(1), TERMINATED);
        }
    }

    #[test]
    fn test_cost() {
        let docs = scenario_docs();
        let (data, index) = write(&docs);

        let it = SparseBitmapIterator::new(data.clone(), BitmapIteratorOptions::with_index(index.clone()));
        assert_eq!(it.cost(), docs.len() as u64);

        let it = SparseBitmapIterator::new(
            data.clone(),
            BitmapIteratorOptions {
                index: Some(index),
                count: None,
                use_index_for_cost: false,
            },
        );
        assert_eq!(it.cost(), 0);

        let it = SparseBitmapIterator::new(
            data,
            BitmapIteratorOptions {
                count: Some(17),
                ..Default::default()
            },
        );
        assert_eq!(it.cost(), 17);
    }

    #[test]
    fn test_dense_and_full_blocks() {
        // Dense, dense with gaps, all, sparse
        let mut docs: Vec<DocId> = (1..65536).collect();
        docs.extend((65536..131072).filter(|d| d % 3 != 0));
        docs.extend(131072..196608);
        docs.extend(200_000..200_010);
        for mut it in iterators(&docs) {
            assert_eq!(it.seek(65536), 65536);
            assert_eq!(it.ordinal(), 65535);
            assert_eq!(it.seek(131070), 131071);
            assert_eq!(it.seek(131077), 131077);
            assert_eq!(it.ordinal() as usize, docs.partition_point(|&d| d < 131077));
            assert_eq!(it.seek(196607), 196607);
            assert_eq!(it.advance(), 200_000);
            let mut count = 1;
            while it.next() {
                count += 1;
            }
            assert_eq!(count, 10);
            assert_eq!(it.ordinal() as usize, docs.len());
        }
    }

    #[test]
    fn test_seek_ordinal() {
        let docs = random_docs(3, 20_000, 2_000_000);
        for template in iterators(&docs) {
            let mut it = template.clone();
            for rank in (0..docs.len()).step_by(371) {
                assert_eq!(it.seek_ordinal(rank as u32), docs[rank]);
                assert_eq!(it.ordinal(), rank as u32);
            }
            assert_eq!(it.seek_ordinal(docs.len() as u32), TERMINATED);

            let mut it = template.clone();
            assert_eq!(it.seek_ordinal(5), docs[5]);
            assert_eq!(it.seek_ordinal(2), docs[5]);
            assert_eq!(it.advance(), docs[6]);
        }
    }

    #[test]
    fn test_truncated_data_terminates() {
        let docs: Vec<DocId> = (1..100).chain(70_000..70_100).collect();
        let (data, _) = write(&docs);
        let truncated = data.slice(0..data.len() - 3);
        let mut it = SparseBitmapIterator::sequential(truncated);
        let mut seen = 0;
        while it.next() {
            seen += 1;
        }
        assert_eq!(seen, 99);
        assert_eq!(it.doc(), TERMINATED);
    }
}
