//! Zstd compression backend

use std::io;

use super::{CompressionLevel, Compressor};

/// Zstd page compressor
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> io::Result<Vec<u8>> {
        zstd::bulk::compress(data, level.0)
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> io::Result<Vec<u8>> {
        let out = zstd::bulk::decompress(data, raw_len)?;
        if out.len() != raw_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("zstd page decoded to {} bytes, expected {}", out.len(), raw_len),
            ));
        }
        Ok(out)
    }
}
