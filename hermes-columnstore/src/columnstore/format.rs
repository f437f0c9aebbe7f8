//! On-disk layout of a columnstore file (`<segment>.cs`)
//!
//! ```text
//! [col 0: bitmap][col 0: skip index?][col 0: pages][col 0: page table][col 0: offset table?]
//! ...
//! [column headers]
//! [footer: headers_offset(8) | column_count(4) | version(4) | magic(4)]
//! ```
//!
//! All integers are little endian.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::DocId;
use crate::structures::bitpacking::{read_bytes, write_bytes};

// ── Constants ─────────────────────────────────────────────────────────────

/// Magic number for `.cs` file footer - HCS1
pub const COLUMNSTORE_MAGIC: u32 = 0x3153_4348;

pub const COLUMNSTORE_VERSION: u32 = 1;

/// Footer size: headers_offset(8) + column_count(4) + version(4) + magic(4) = 20
pub const COLUMNSTORE_FOOTER_SIZE: usize = 20;

/// Page table entry size: offset(8) + stored_len(4) + raw_len(4) + compressed(1) = 17
pub const PAGE_ENTRY_SIZE: usize = 17;

/// Upper bound on names, compression ids and header payloads
const MAX_HEADER_BLOB: usize = 1 << 24;

/// Column identifier, assigned in registration order
pub type ColumnId = u32;

// ── Column shape ──────────────────────────────────────────────────────────

/// Shape tag stored in the column header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Mask = 0,
    Fixed = 1,
    Sparse = 2,
    DenseFixed = 3,
}

impl ColumnType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Mask),
            1 => Some(Self::Fixed),
            2 => Some(Self::Sparse),
            3 => Some(Self::DenseFixed),
            _ => None,
        }
    }
}

/// How values of a column are addressed by ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnShape {
    /// Presence only, every value is empty
    Mask,
    /// Every value is `stride` bytes
    Fixed { stride: u32 },
    /// Variable-width values located through an offset table
    Sparse,
    /// Contiguous doc range `[min_doc, min_doc + count)` without bitmap;
    /// ordinal is `doc - min_doc`
    DenseFixed { stride: u32 },
}

impl ColumnShape {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Mask => ColumnType::Mask,
            Self::Fixed { .. } => ColumnType::Fixed,
            Self::Sparse => ColumnType::Sparse,
            Self::DenseFixed { .. } => ColumnType::DenseFixed,
        }
    }

    pub fn stride(&self) -> u32 {
        match *self {
            Self::Fixed { stride } | Self::DenseFixed { stride } => stride,
            Self::Mask | Self::Sparse => 0,
        }
    }

    fn from_parts(column_type: ColumnType, stride: u32) -> Self {
        match column_type {
            ColumnType::Mask => Self::Mask,
            ColumnType::Fixed => Self::Fixed { stride },
            ColumnType::Sparse => Self::Sparse,
            ColumnType::DenseFixed => Self::DenseFixed { stride },
        }
    }
}

// ── Properties ────────────────────────────────────────────────────────────

/// Column property flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColumnProperties(u8);

impl ColumnProperties {
    pub const NORMAL: Self = Self(0);
    /// Value pages are encrypted
    pub const ENCRYPT: Self = Self(1);
    /// The column has no name
    pub const NO_NAME: Self = Self(2);

    const ALL: u8 = Self::ENCRYPT.0 | Self::NO_NAME.0;

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits & !Self::ALL == 0).then_some(Self(bits))
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for ColumnProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ── Column header ─────────────────────────────────────────────────────────

/// Per-column header, stored after all column data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHeader {
    pub id: ColumnId,
    pub shape: ColumnShape,
    pub props: ColumnProperties,
    pub name: Option<String>,
    pub docs_count: u64,
    pub min_doc: DocId,
    pub max_doc: DocId,
    /// Presence bitmap location (empty for `DenseFixed`)
    pub docs_offset: u64,
    pub docs_len: u64,
    /// Skip index offset, 0 when the bitmap has a single block
    pub docs_index: u64,
    /// Skip index entries
    pub index_len: u32,
    /// Page table location
    pub pages_offset: u64,
    pub page_count: u32,
    pub values_per_page: u32,
    /// Offset table location (`Sparse` only)
    pub offsets_offset: u64,
    pub offsets_bits: u8,
    /// Compressor name, resolved through the registry
    pub compression: String,
    /// Opaque bytes produced by the column finalizer
    pub payload: Vec<u8>,
}

impl ColumnHeader {
    pub fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        let mut props = self.props;
        if self.name.is_none() {
            props.insert(ColumnProperties::NO_NAME);
        }
        w.write_u32::<LittleEndian>(self.id)?;
        w.write_u8(self.shape.column_type() as u8)?;
        w.write_u8(props.bits())?;
        if let Some(name) = &self.name {
            write_bytes(w, name.as_bytes())?;
        }
        w.write_u64::<LittleEndian>(self.docs_count)?;
        w.write_u32::<LittleEndian>(self.min_doc)?;
        w.write_u32::<LittleEndian>(self.max_doc)?;
        w.write_u64::<LittleEndian>(self.docs_offset)?;
        w.write_u64::<LittleEndian>(self.docs_len)?;
        w.write_u64::<LittleEndian>(self.docs_index)?;
        w.write_u32::<LittleEndian>(self.index_len)?;
        w.write_u32::<LittleEndian>(self.shape.stride())?;
        w.write_u64::<LittleEndian>(self.pages_offset)?;
        w.write_u32::<LittleEndian>(self.page_count)?;
        w.write_u32::<LittleEndian>(self.values_per_page)?;
        w.write_u64::<LittleEndian>(self.offsets_offset)?;
        w.write_u8(self.offsets_bits)?;
        write_bytes(w, self.compression.as_bytes())?;
        write_bytes(w, &self.payload)?;
        Ok(())
    }

    pub fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        let id = r.read_u32::<LittleEndian>()?;
        let ct = r.read_u8()?;
        let column_type = ColumnType::from_u8(ct).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, format!("bad column type {}", ct))
        })?;
        let bits = r.read_u8()?;
        let props = ColumnProperties::from_bits(bits).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad column properties 0x{:02x}", bits),
            )
        })?;
        let name = if props.contains(ColumnProperties::NO_NAME) {
            None
        } else {
            Some(read_string(r)?)
        };
        let docs_count = r.read_u64::<LittleEndian>()?;
        let min_doc = r.read_u32::<LittleEndian>()?;
        let max_doc = r.read_u32::<LittleEndian>()?;
        let docs_offset = r.read_u64::<LittleEndian>()?;
        let docs_len = r.read_u64::<LittleEndian>()?;
        let docs_index = r.read_u64::<LittleEndian>()?;
        let index_len = r.read_u32::<LittleEndian>()?;
        let stride = r.read_u32::<LittleEndian>()?;
        let pages_offset = r.read_u64::<LittleEndian>()?;
        let page_count = r.read_u32::<LittleEndian>()?;
        let values_per_page = r.read_u32::<LittleEndian>()?;
        let offsets_offset = r.read_u64::<LittleEndian>()?;
        let offsets_bits = r.read_u8()?;
        let compression = read_string(r)?;
        let payload = read_bytes(r, MAX_HEADER_BLOB)?;
        Ok(Self {
            id,
            shape: ColumnShape::from_parts(column_type, stride),
            props,
            name,
            docs_count,
            min_doc,
            max_doc,
            docs_offset,
            docs_len,
            docs_index,
            index_len,
            pages_offset,
            page_count,
            values_per_page,
            offsets_offset,
            offsets_bits,
            compression,
            payload,
        })
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.props.contains(ColumnProperties::ENCRYPT)
    }
}

fn read_string(r: &mut dyn Read) -> io::Result<String> {
    let bytes = read_bytes(r, MAX_HEADER_BLOB)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

// ── Page table ────────────────────────────────────────────────────────────

/// Location of one value page.
///
/// Wire: offset(8) + stored_len(4) + raw_len(4) + compressed(1) = 17 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    /// Absolute file offset of the stored bytes (also the cipher position)
    pub offset: u64,
    pub stored_len: u32,
    pub raw_len: u32,
    pub compressed: bool,
}

impl PageEntry {
    pub fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.offset)?;
        w.write_u32::<LittleEndian>(self.stored_len)?;
        w.write_u32::<LittleEndian>(self.raw_len)?;
        w.write_u8(self.compressed as u8)?;
        Ok(())
    }

    pub fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        let offset = r.read_u64::<LittleEndian>()?;
        let stored_len = r.read_u32::<LittleEndian>()?;
        let raw_len = r.read_u32::<LittleEndian>()?;
        let compressed = match r.read_u8()? {
            0 => false,
            1 => true,
            v => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad page compression flag {}", v),
                ));
            }
        };
        Ok(Self {
            offset,
            stored_len,
            raw_len,
            compressed,
        })
    }
}

// ── Footer ────────────────────────────────────────────────────────────────

/// Write column headers followed by the footer.
pub fn write_headers_and_footer(
    w: &mut dyn Write,
    headers_offset: u64,
    headers: &[ColumnHeader],
) -> io::Result<()> {
    for header in headers {
        header.write_to(w)?;
    }
    w.write_u64::<LittleEndian>(headers_offset)?;
    w.write_u32::<LittleEndian>(headers.len() as u32)?;
    w.write_u32::<LittleEndian>(COLUMNSTORE_VERSION)?;
    w.write_u32::<LittleEndian>(COLUMNSTORE_MAGIC)?;
    Ok(())
}

/// Read the footer from the last 20 bytes.
/// Returns (headers_offset, column_count).
pub fn read_footer(file_data: &[u8]) -> io::Result<(u64, u32)> {
    let len = file_data.len();
    if len < COLUMNSTORE_FOOTER_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "columnstore file too small for footer",
        ));
    }
    let mut footer = &file_data[len - COLUMNSTORE_FOOTER_SIZE..];
    let headers_offset = footer.read_u64::<LittleEndian>()?;
    let column_count = footer.read_u32::<LittleEndian>()?;
    let version = footer.read_u32::<LittleEndian>()?;
    let magic = footer.read_u32::<LittleEndian>()?;
    if magic != COLUMNSTORE_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad columnstore magic: 0x{:08x}", magic),
        ));
    }
    if version != COLUMNSTORE_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported columnstore version {}", version),
        ));
    }
    if headers_offset > (len - COLUMNSTORE_FOOTER_SIZE) as u64 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("column headers offset {} past end of file", headers_offset),
        ));
    }
    Ok((headers_offset, column_count))
}

/// Read `column_count` headers from `data` (the header section).
pub fn read_headers(mut data: &[u8], column_count: u32) -> io::Result<Vec<ColumnHeader>> {
    let mut headers = Vec::with_capacity((column_count as usize).min(1024));
    for _ in 0..column_count {
        headers.push(ColumnHeader::read_from(&mut data)?);
    }
    if !data.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} trailing bytes after column headers", data.len()),
        ));
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: Option<&str>) -> ColumnHeader {
        ColumnHeader {
            id: 3,
            shape: ColumnShape::Fixed { stride: 8 },
            props: ColumnProperties::ENCRYPT,
            name: name.map(str::to_string),
            docs_count: 10,
            min_doc: 5,
            max_doc: 40,
            docs_offset: 0,
            docs_len: 26,
            docs_index: 0,
            index_len: 0,
            pages_offset: 120,
            page_count: 1,
            values_per_page: 1024,
            offsets_offset: 0,
            offsets_bits: 0,
            compression: "zstd".to_string(),
            payload: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_header_and_footer() {
        let named = header(Some("price"));
        let mut unnamed = header(None);
        unnamed.props = ColumnProperties::NO_NAME;

        let mut buf = vec![0u8; 7];
        write_headers_and_footer(&mut buf, 7, &[named.clone(), unnamed.clone()]).unwrap();

        let (offset, count) = read_footer(&buf).unwrap();
        assert_eq!((offset, count), (7, 2));
        let headers =
            read_headers(&buf[offset as usize..buf.len() - COLUMNSTORE_FOOTER_SIZE], count)
                .unwrap();
        assert_eq!(headers, vec![named, unnamed]);
        assert!(headers[0].is_encrypted());
        assert!(!headers[1].is_encrypted());
    }

    #[test]
    fn test_footer_rejects_garbage() {
        assert!(read_footer(&[0u8; 10]).is_err());

        let mut buf = Vec::new();
        write_headers_and_footer(&mut buf, 0, &[]).unwrap();
        let mut bad_magic = buf.clone();
        *bad_magic.last_mut().unwrap() ^= 0xff;
        assert!(read_footer(&bad_magic).is_err());

        let mut bad_version = buf.clone();
        bad_version[12] = 9;
        assert!(read_footer(&bad_version).is_err());

        let mut bad_offset = buf;
        bad_offset[0] = 1;
        assert!(read_footer(&bad_offset).is_err());
    }

    #[test]
    fn test_properties() {
        let props = ColumnProperties::ENCRYPT | ColumnProperties::NO_NAME;
        assert!(props.contains(ColumnProperties::ENCRYPT));
        assert_eq!(ColumnProperties::from_bits(props.bits()), Some(props));
        assert_eq!(ColumnProperties::from_bits(0x80), None);
    }

    #[test]
    fn test_page_entry() {
        let entry = PageEntry {
            offset: 1 << 40,
            stored_len: 100,
            raw_len: 4096,
            compressed: true,
        };
        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), PAGE_ENTRY_SIZE);
        assert_eq!(PageEntry::read_from(&mut buf.as_slice()).unwrap(), entry);
    }
}
