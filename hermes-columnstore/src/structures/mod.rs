//! On-disk data structures shared by the columnstore

pub mod bit_block;
pub mod bitpacking;
pub mod sparse_bitmap;

pub use bit_block::{BLOCK_SIZE, BlockCursor, BlockEncoding, BlockHeader, BlockView};
pub use bitpacking::{bits_needed, bitpack_read, bitpack_write, packed_len};
pub use sparse_bitmap::{
    BitmapIteratorOptions, SKIP_ENTRY_SIZE, SkipEntry, SparseBitmapIterator, SparseBitmapWriter,
    read_index, write_index,
};
