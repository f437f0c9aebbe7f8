//! Sparse presence bitmap
//!
//! A strictly increasing set of document ids, stored as a sequence of
//! non-empty 65536-id blocks (see [`bit_block`](super::bit_block)) plus an
//! optional skip index with one [`SkipEntry`] per emitted block.
//!
//! ```text
//! bitmap:     [block header][payload] [block header][payload] ...
//! skip index: [block u16][cumulative u32][offset u32][encoding u8] × blocks
//! ```

mod iterator;
mod writer;

pub use iterator::{BitmapIteratorOptions, SparseBitmapIterator};
pub use writer::SparseBitmapWriter;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

use super::bit_block::BlockEncoding;

/// Serialized size of a [`SkipEntry`]
pub const SKIP_ENTRY_SIZE: usize = 11;

/// Per-block summary used for random access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    /// Block number (`doc >> 16`)
    pub block: u16,
    /// Present ids in all preceding blocks
    pub cumulative: u32,
    /// Byte offset of the block header inside the bitmap
    pub offset: u32,
    pub encoding: BlockEncoding,
}

impl SkipEntry {
    /// The single entry describing an empty bitmap
    pub const EMPTY: Self = Self {
        block: 0,
        cumulative: 0,
        offset: 0,
        encoding: BlockEncoding::Sparse,
    };
}

pub fn write_index<W: Write + ?Sized>(entries: &[SkipEntry], w: &mut W) -> io::Result<()> {
    for entry in entries {
        w.write_u16::<LittleEndian>(entry.block)?;
        w.write_u32::<LittleEndian>(entry.cumulative)?;
        w.write_u32::<LittleEndian>(entry.offset)?;
        w.write_u8(entry.encoding as u8)?;
    }
    Ok(())
}

/// Parse a skip index, checking block order and cumulative counts.
pub fn read_index(mut data: &[u8]) -> io::Result<Vec<SkipEntry>> {
    if data.len() % SKIP_ENTRY_SIZE != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("skip index length {} is not a multiple of {}", data.len(), SKIP_ENTRY_SIZE),
        ));
    }
    let mut entries: Vec<SkipEntry> = Vec::with_capacity(data.len() / SKIP_ENTRY_SIZE);
    while !data.is_empty() {
        let block = data.read_u16::<LittleEndian>()?;
        let cumulative = data.read_u32::<LittleEndian>()?;
        let offset = data.read_u32::<LittleEndian>()?;
        let tag = data.read_u8()?;
        let encoding = BlockEncoding::from_u8(tag).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown block encoding {}", tag),
            )
        })?;
        let out_of_order = entries.last().is_some_and(|prev| {
            block <= prev.block || cumulative <= prev.cumulative || offset <= prev.offset
        });
        if out_of_order {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("skip index entry for block {} is out of order", block),
            ));
        }
        entries.push(SkipEntry {
            block,
            cumulative,
            offset,
            encoding,
        });
    }
    Ok(entries)
}
