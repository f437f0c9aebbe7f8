//! Bit-block codec: one 65536-document range of a sparse bitmap
//!
//! Each block picks the smallest of three encodings:
//!
//! | Tag | Encoding | Payload                                     |
//! |-----|----------|---------------------------------------------|
//! |  0  | All      | nothing, every id in the span is present    |
//! |  1  | Sparse   | `cardinality` × u16 LE offsets, ascending    |
//! |  2  | Dense    | `ceil(span / 64)` × u64 LE bitmap words      |
//!
//! Every block is prefixed by a 6-byte header so a bitmap can be scanned
//! without its skip index:
//!
//! ```text
//! [block: u16][cardinality - 1: u16][span - 1: u16]
//! ```
//!
//! `span` is `BLOCK_SIZE` except for a trailing block cut short by the
//! document universe.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::DocId;

/// Documents per block
pub const BLOCK_SIZE: u32 = 1 << BLOCK_BITS;
/// `doc >> BLOCK_BITS` is the block number
pub const BLOCK_BITS: u32 = 16;
/// u64 words of a full dense block
pub const BLOCK_WORDS: usize = (BLOCK_SIZE / 64) as usize;
/// Bytes of the per-block header
pub const BLOCK_HEADER_SIZE: usize = 6;

/// Block number of a document
#[inline]
pub fn block_of(doc: DocId) -> u32 {
    doc >> BLOCK_BITS
}

/// Offset of a document inside its block
#[inline]
pub fn offset_in_block(doc: DocId) -> u32 {
    doc & (BLOCK_SIZE - 1)
}

/// Bytes of a dense bitmap covering `span` ids
#[inline]
pub fn dense_len(span: u32) -> usize {
    (span as usize).div_ceil(64) * 8
}

/// Per-block encoding, recorded in the skip index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockEncoding {
    All = 0,
    Sparse = 1,
    Dense = 2,
}

impl BlockEncoding {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::All),
            1 => Some(Self::Sparse),
            2 => Some(Self::Dense),
            _ => None,
        }
    }

    /// Smallest encoding for `cardinality` present ids out of `span`.
    #[inline]
    pub fn select(cardinality: u32, span: u32) -> Self {
        if cardinality == span {
            Self::All
        } else if cardinality as usize * 2 <= dense_len(span) {
            Self::Sparse
        } else {
            Self::Dense
        }
    }

    /// Payload bytes following the block header
    #[inline]
    pub fn payload_len(self, cardinality: u32, span: u32) -> usize {
        match self {
            Self::All => 0,
            Self::Sparse => cardinality as usize * 2,
            Self::Dense => dense_len(span),
        }
    }
}

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block: u16,
    /// Present ids, 1..=span
    pub cardinality: u32,
    /// Ids covered, 1..=BLOCK_SIZE
    pub span: u32,
}

impl BlockHeader {
    #[inline]
    pub fn encoding(&self) -> BlockEncoding {
        BlockEncoding::select(self.cardinality, self.span)
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.encoding().payload_len(self.cardinality, self.span)
    }

    /// First document id of the block
    #[inline]
    pub fn base(&self) -> DocId {
        (self.block as u32) << BLOCK_BITS
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        debug_assert!(self.cardinality >= 1 && self.cardinality <= self.span);
        debug_assert!(self.span >= 1 && self.span <= BLOCK_SIZE);
        w.write_u16::<LittleEndian>(self.block)?;
        w.write_u16::<LittleEndian>((self.cardinality - 1) as u16)?;
        w.write_u16::<LittleEndian>((self.span - 1) as u16)?;
        Ok(())
    }

    /// Parse a header from the first bytes of `data`.
    pub fn parse(data: &[u8]) -> io::Result<Self> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "bitmap block header truncated",
            ));
        }
        let block = u16::from_le_bytes([data[0], data[1]]);
        let cardinality = u16::from_le_bytes([data[2], data[3]]) as u32 + 1;
        let span = u16::from_le_bytes([data[4], data[5]]) as u32 + 1;
        if cardinality > span {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "bitmap block {}: cardinality {} exceeds span {}",
                    block, cardinality, span
                ),
            ));
        }
        Ok(Self {
            block,
            cardinality,
            span,
        })
    }
}

/// Encode one block held as a bitset (`words`, bit `i` = offset `i`).
///
/// Writes header and payload; returns the chosen encoding.
pub fn encode_block<W: Write + ?Sized>(
    block: u16,
    words: &[u64],
    cardinality: u32,
    span: u32,
    out: &mut W,
) -> io::Result<BlockEncoding> {
    debug_assert_eq!(
        words.iter().map(|w| w.count_ones()).sum::<u32>(),
        cardinality
    );
    let header = BlockHeader {
        block,
        cardinality,
        span,
    };
    header.write_to(out)?;

    let encoding = header.encoding();
    match encoding {
        BlockEncoding::All => {}
        BlockEncoding::Sparse => {
            for (word_idx, &word) in words.iter().enumerate() {
                let mut w = word;
                while w != 0 {
                    let bit = w.trailing_zeros() as usize;
                    out.write_u16::<LittleEndian>((word_idx * 64 + bit) as u16)?;
                    w &= w - 1;
                }
            }
        }
        BlockEncoding::Dense => {
            let num_words = dense_len(span) / 8;
            for &word in &words[..num_words] {
                out.write_u64::<LittleEndian>(word)?;
            }
        }
    }
    Ok(encoding)
}

/// Position inside a block: `rank` is the number of present offsets
/// strictly below `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockCursor {
    pub offset: u32,
    pub rank: u32,
}

impl BlockCursor {
    pub const START: Self = Self { offset: 0, rank: 0 };
}

/// Zero-copy view over an encoded block payload
#[derive(Debug, Clone, Copy)]
pub enum BlockView<'a> {
    All { span: u32 },
    Sparse { offsets: &'a [u8] },
    Dense { words: &'a [u8], span: u32 },
}

impl<'a> BlockView<'a> {
    /// `payload` must be exactly the bytes following `header`.
    pub fn new(header: &BlockHeader, payload: &'a [u8]) -> io::Result<Self> {
        if payload.len() != header.payload_len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "bitmap block {}: payload {} bytes, expected {}",
                    header.block,
                    payload.len(),
                    header.payload_len()
                ),
            ));
        }
        Ok(Self::new_unchecked(header, payload))
    }

    /// View over a payload already validated against `header`.
    #[inline]
    pub(crate) fn new_unchecked(header: &BlockHeader, payload: &'a [u8]) -> Self {
        debug_assert_eq!(payload.len(), header.payload_len());
        match header.encoding() {
            BlockEncoding::All => Self::All { span: header.span },
            BlockEncoding::Sparse => Self::Sparse { offsets: payload },
            BlockEncoding::Dense => Self::Dense {
                words: payload,
                span: header.span,
            },
        }
    }

    #[inline]
    fn sparse_at(offsets: &[u8], i: usize) -> u32 {
        u16::from_le_bytes([offsets[2 * i], offsets[2 * i + 1]]) as u32
    }

    #[inline]
    fn dense_word(words: &[u8], i: usize) -> u64 {
        let mut w = [0u8; 8];
        w.copy_from_slice(&words[8 * i..8 * i + 8]);
        u64::from_le_bytes(w)
    }

    pub fn cardinality(&self) -> u32 {
        match *self {
            Self::All { span } => span,
            Self::Sparse { offsets } => (offsets.len() / 2) as u32,
            Self::Dense { words, .. } => (0..words.len() / 8)
                .map(|i| Self::dense_word(words, i).count_ones())
                .sum(),
        }
    }

    pub fn contains(&self, offset: u32) -> bool {
        match *self {
            Self::All { span } => offset < span,
            Self::Sparse { offsets } => self.sparse_lower_bound(offsets, 0, offset)
                .is_some_and(|i| Self::sparse_at(offsets, i) == offset),
            Self::Dense { words, span } => {
                offset < span
                    && (Self::dense_word(words, (offset / 64) as usize) >> (offset % 64)) & 1 == 1
            }
        }
    }

    /// Number of present offsets strictly below `offset`.
    pub fn rank(&self, offset: u32) -> u32 {
        match *self {
            Self::All { span } => offset.min(span),
            Self::Sparse { offsets } => self
                .sparse_lower_bound(offsets, 0, offset)
                .unwrap_or(offsets.len() / 2) as u32,
            Self::Dense { words, span } => Self::dense_count(words, 0, offset.min(span)),
        }
    }

    /// Offset of the present id with the given in-block rank.
    pub fn nth(&self, rank: u32) -> Option<u32> {
        match *self {
            Self::All { span } => (rank < span).then_some(rank),
            Self::Sparse { offsets } => ((rank as usize) < offsets.len() / 2)
                .then(|| Self::sparse_at(offsets, rank as usize)),
            Self::Dense { words, .. } => {
                let mut remaining = rank;
                for i in 0..words.len() / 8 {
                    let mut word = Self::dense_word(words, i);
                    let ones = word.count_ones();
                    if remaining < ones {
                        for _ in 0..remaining {
                            word &= word - 1;
                        }
                        return Some(i as u32 * 64 + word.trailing_zeros());
                    }
                    remaining -= ones;
                }
                None
            }
        }
    }

    /// First present offset `>= target`, ranked relative to `from`.
    ///
    /// `from` must describe a position at or before `target` (its rank is
    /// the count of present offsets below `from.offset`). Moving forward
    /// from a nearby cursor keeps the work proportional to the distance.
    pub fn seek(&self, from: BlockCursor, target: u32) -> Option<BlockCursor> {
        debug_assert!(from.offset <= target);
        match *self {
            Self::All { span } => (target < span).then_some(BlockCursor {
                offset: target,
                rank: target,
            }),
            Self::Sparse { offsets } => {
                let i = self.sparse_lower_bound(offsets, from.rank as usize, target)?;
                Some(BlockCursor {
                    offset: Self::sparse_at(offsets, i),
                    rank: i as u32,
                })
            }
            Self::Dense { words, span } => {
                if target >= span {
                    return None;
                }
                let num_words = words.len() / 8;
                let mut i = (target / 64) as usize;
                let mut word = Self::dense_word(words, i) & (u64::MAX << (target % 64));
                while word == 0 {
                    i += 1;
                    if i >= num_words {
                        return None;
                    }
                    word = Self::dense_word(words, i);
                }
                let offset = i as u32 * 64 + word.trailing_zeros();
                Some(BlockCursor {
                    offset,
                    rank: from.rank + Self::dense_count(words, from.offset, offset),
                })
            }
        }
    }

    /// First present offset `>= offset`.
    #[inline]
    pub fn next_at_or_after(&self, offset: u32) -> Option<u32> {
        self.seek(BlockCursor::START, offset).map(|c| c.offset)
    }

    /// Present offset following `at`, which must be a present position.
    #[inline]
    pub fn next(&self, at: BlockCursor) -> Option<BlockCursor> {
        match *self {
            Self::Sparse { offsets } => {
                let i = at.rank as usize + 1;
                (i < offsets.len() / 2).then(|| BlockCursor {
                    offset: Self::sparse_at(offsets, i),
                    rank: i as u32,
                })
            }
            _ => self
                .seek(at, at.offset + 1)
                .map(|c| BlockCursor { rank: at.rank + 1, ..c }),
        }
    }

    /// Iterate present offsets in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        let mut cursor = self.seek(BlockCursor::START, 0);
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.next(current);
            Some(current.offset)
        })
    }

    fn sparse_lower_bound(&self, offsets: &[u8], start: usize, target: u32) -> Option<usize> {
        let len = offsets.len() / 2;
        let (mut lo, mut hi) = (start.min(len), len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if Self::sparse_at(offsets, mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < len).then_some(lo)
    }

    /// Count of set bits in `[from, to)`.
    fn dense_count(words: &[u8], from: u32, to: u32) -> u32 {
        if from >= to {
            return 0;
        }
        let first = (from / 64) as usize;
        let last = ((to - 1) / 64) as usize;
        let mut count = 0;
        for i in first..=last {
            let mut word = Self::dense_word(words, i);
            if i == first {
                word &= u64::MAX << (from % 64);
            }
            if i == last && to % 64 != 0 {
                word &= (1u64 << (to % 64)) - 1;
            }
            count += word.count_ones();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitset(offsets: &[u32]) -> Vec<u64> {
        let mut words = vec![0u64; BLOCK_WORDS];
        for &o in offsets {
            words[(o / 64) as usize] |= 1u64 << (o % 64);
        }
        words
    }

    fn encode(offsets: &[u32], span: u32) -> (BlockEncoding, Vec<u8>) {
        let mut out = Vec::new();
        let encoding =
            encode_block(3, &bitset(offsets), offsets.len() as u32, span, &mut out).unwrap();
        (encoding, out)
    }

    fn view(bytes: &[u8]) -> (BlockHeader, BlockView<'_>) {
        let header = BlockHeader::parse(bytes).unwrap();
        let view = BlockView::new(&header, &bytes[BLOCK_HEADER_SIZE..]).unwrap();
        (header, view)
    }

    #[test]
    fn test_encoding_selection() {
        assert_eq!(BlockEncoding::select(BLOCK_SIZE, BLOCK_SIZE), BlockEncoding::All);
        assert_eq!(BlockEncoding::select(1, BLOCK_SIZE), BlockEncoding::Sparse);
        assert_eq!(BlockEncoding::select(4096, BLOCK_SIZE), BlockEncoding::Sparse);
        assert_eq!(BlockEncoding::select(4097, BLOCK_SIZE), BlockEncoding::Dense);
        // Tail spans scale the threshold
        assert_eq!(BlockEncoding::select(100, 100), BlockEncoding::All);
        assert_eq!(BlockEncoding::select(8, 128), BlockEncoding::Sparse);
        assert_eq!(BlockEncoding::select(9, 128), BlockEncoding::Dense);
    }

    #[test]
    fn test_sparse_block() {
        let offsets = [0u32, 5, 64, 1000, 65535];
        let (encoding, bytes) = encode(&offsets, BLOCK_SIZE);
        assert_eq!(encoding, BlockEncoding::Sparse);
        assert_eq!(bytes.len(), BLOCK_HEADER_SIZE + 10);

        let (header, view) = view(&bytes);
        assert_eq!(header.block, 3);
        assert_eq!(header.base(), 3 << 16);
        assert_eq!(view.cardinality(), 5);
        assert_eq!(view.iter().collect::<Vec<_>>(), offsets);
        assert!(view.contains(64));
        assert!(!view.contains(63));
        assert_eq!(view.rank(64), 2);
        assert_eq!(view.rank(65), 3);
        assert_eq!(view.nth(3), Some(1000));
        assert_eq!(view.nth(5), None);
        assert_eq!(view.next_at_or_after(1001), Some(65535));

        let c = view.seek(BlockCursor::START, 6).unwrap();
        assert_eq!(c, BlockCursor { offset: 64, rank: 2 });
        assert_eq!(view.seek(c, 1001), Some(BlockCursor { offset: 65535, rank: 4 }));
    }

    #[test]
    fn test_dense_block() {
        let offsets: Vec<u32> = (0..BLOCK_SIZE).filter(|o| o % 3 == 0).collect();
        let (encoding, bytes) = encode(&offsets, BLOCK_SIZE);
        assert_eq!(encoding, BlockEncoding::Dense);
        assert_eq!(bytes.len(), BLOCK_HEADER_SIZE + 8192);

        let (_, view) = view(&bytes);
        assert_eq!(view.cardinality(), offsets.len() as u32);
        assert_eq!(view.iter().collect::<Vec<_>>(), offsets);
        for (rank, &o) in offsets.iter().enumerate().step_by(997) {
            assert!(view.contains(o));
            assert!(!view.contains(o + 1));
            assert_eq!(view.rank(o), rank as u32);
            assert_eq!(view.nth(rank as u32), Some(o));
        }

        let c = view.seek(BlockCursor::START, 100).unwrap();
        assert_eq!(c, BlockCursor { offset: 102, rank: 34 });
        let c = view.seek(c, 30001).unwrap();
        assert_eq!(c, BlockCursor { offset: 30003, rank: 10001 });
        assert_eq!(
            view.seek(c, 65535),
            Some(BlockCursor {
                offset: 65535,
                rank: 21845
            })
        );
    }

    #[test]
    fn test_dense_block_seek_past_last() {
        let offsets: Vec<u32> = (0..60000).filter(|o| o % 3 == 0).collect();
        let (encoding, bytes) = encode(&offsets, BLOCK_SIZE);
        assert_eq!(encoding, BlockEncoding::Dense);

        let (_, view) = view(&bytes);
        let c = view.seek(BlockCursor::START, 59997).unwrap();
        assert_eq!(c, BlockCursor { offset: 59997, rank: 19999 });
        assert_eq!(view.seek(c, 59998), None);
        assert_eq!(view.next_at_or_after(60000), None);
    }

    #[test]
    fn test_all_block() {
        let offsets: Vec<u32> = (0..BLOCK_SIZE).collect();
        let (encoding, bytes) = encode(&offsets, BLOCK_SIZE);
        assert_eq!(encoding, BlockEncoding::All);
        assert_eq!(bytes.len(), BLOCK_HEADER_SIZE);

        let (header, view) = view(&bytes);
        assert_eq!(header.cardinality, BLOCK_SIZE);
        assert_eq!(view.rank(777), 777);
        assert_eq!(view.nth(65535), Some(65535));
        assert_eq!(view.seek(BlockCursor::START, 42).unwrap().rank, 42);
        assert_eq!(view.seek(BlockCursor::START, BLOCK_SIZE), None);
    }

    #[test]
    fn test_tail_block() {
        // Last block of a universe ending 100 ids into the block
        let all: Vec<u32> = (0..100).collect();
        let (encoding, bytes) = encode(&all, 100);
        assert_eq!(encoding, BlockEncoding::All);
        let (_, all_view) = view(&bytes);
        assert!(!all_view.contains(100));
        assert_eq!(all_view.iter().count(), 100);

        let half: Vec<u32> = (0..100).filter(|o| o % 2 == 1).collect();
        let (encoding, bytes) = encode(&half, 100);
        assert_eq!(encoding, BlockEncoding::Dense);
        assert_eq!(bytes.len(), BLOCK_HEADER_SIZE + 16);
        let (_, view) = view(&bytes);
        assert_eq!(view.iter().collect::<Vec<_>>(), half);
        assert_eq!(view.seek(BlockCursor::START, 98).unwrap().offset, 99);
        assert_eq!(view.seek(BlockCursor::START, 100), None);
    }

    #[test]
    fn test_corrupt_headers() {
        assert!(BlockHeader::parse(&[0, 0, 0]).is_err());
        // cardinality 11 > span 10
        assert!(BlockHeader::parse(&[0, 0, 10, 0, 9, 0]).is_err());

        let header = BlockHeader {
            block: 0,
            cardinality: 2,
            span: BLOCK_SIZE,
        };
        assert!(BlockView::new(&header, &[0, 0, 1]).is_err());
    }
}
