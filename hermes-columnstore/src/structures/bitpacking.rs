//! Bit-packing and varint helpers shared by the column formats

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Minimum number of bits needed to represent `val`.
#[inline]
pub fn bits_needed(val: u64) -> u8 {
    if val == 0 {
        0
    } else {
        64 - val.leading_zeros() as u8
    }
}

/// Number of bytes `count` values occupy at `bits_per_value` bits each.
#[inline]
pub fn packed_len(count: usize, bits_per_value: u8) -> usize {
    (count * bits_per_value as usize).div_ceil(8)
}

/// Pack `values` at `bits_per_value` bits each, appending to `out`.
pub fn bitpack_write(values: &[u64], bits_per_value: u8, out: &mut Vec<u8>) {
    if bits_per_value == 0 {
        return; // every value is zero
    }
    let bpv = bits_per_value as usize;
    let start = out.len();
    out.resize(start + packed_len(values.len(), bits_per_value), 0);
    let buf = &mut out[start..];

    for (i, &val) in values.iter().enumerate() {
        let bit_offset = i * bpv;
        let mut bo = bit_offset / 8;
        let mut bs = bit_offset % 8;
        let mut remaining_bits = bpv;
        let mut v = val;

        // Up to 9 bytes for 64-bit values
        while remaining_bits > 0 {
            let can_write = (8 - bs).min(remaining_bits);
            let mask = (1u64 << can_write) - 1;
            buf[bo] |= ((v & mask) << bs) as u8;
            v >>= can_write;
            remaining_bits -= can_write;
            bo += 1;
            bs = 0;
        }
    }
}

/// Read value at `index` from bit-packed data.
///
/// Fast path: a single unaligned LE u64 load when the bits fit in 8 bytes.
/// Bytes past the end of `data` read as zero.
#[inline]
pub fn bitpack_read(data: &[u8], bits_per_value: u8, index: usize) -> u64 {
    if bits_per_value == 0 {
        return 0;
    }
    let bpv = bits_per_value as usize;
    let bit_offset = index * bpv;
    let byte_offset = bit_offset / 8;
    let bit_shift = bit_offset % 8;

    if bit_shift + bpv <= 64 && byte_offset + 8 <= data.len() {
        let mut word = [0u8; 8];
        word.copy_from_slice(&data[byte_offset..byte_offset + 8]);
        let raw = u64::from_le_bytes(word);
        let mask = if bpv >= 64 {
            u64::MAX
        } else {
            (1u64 << bpv) - 1
        };
        return (raw >> bit_shift) & mask;
    }

    // Slow path for the last few values near the end of the buffer
    let mut result: u64 = 0;
    let mut remaining_bits = bpv;
    let mut bo = byte_offset;
    let mut bs = bit_shift;
    let mut out_shift = 0;

    while remaining_bits > 0 {
        let can_read = (8 - bs).min(remaining_bits);
        let mask = ((1u64 << can_read) - 1) as u8;
        let byte_val = data.get(bo).copied().unwrap_or(0);
        result |= (((byte_val >> bs) & mask) as u64) << out_shift;
        remaining_bits -= can_read;
        out_shift += can_read;
        bo += 1;
        bs = 0;
    }

    result
}

/// Write variable-length integer (1-10 bytes)
///
/// 7 bits of data per byte, high bit set when more bytes follow.
#[inline]
pub fn write_vint<W: Write + ?Sized>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            writer.write_u8(byte)?;
            return Ok(());
        }
        writer.write_u8(byte | 0x80)?;
    }
}

/// Read variable-length integer
#[inline]
pub fn read_vint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint too long",
            ));
        }
    }
}

/// Write a vint length prefix followed by the bytes.
pub fn write_bytes<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_vint(writer, bytes.len() as u64)?;
    writer.write_all(bytes)
}

/// Read a vint length-prefixed byte string, refusing lengths above `limit`.
pub fn read_bytes<R: Read + ?Sized>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let len = read_vint(reader)? as usize;
    if len > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("byte string of {} bytes exceeds limit {}", len, limit),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
