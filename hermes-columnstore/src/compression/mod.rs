//! Pluggable page compression for column payloads
//!
//! Compressors are looked up by name in an explicit [`CompressionRegistry`]
//! that the caller builds and hands to writers and readers through
//! [`ColumnstoreConfig`](crate::ColumnstoreConfig). The column header records
//! the compressor name, so a reader needs a registry containing every name
//! used at write time.
//!
//! # Usage
//!
//! ```rust
//! use hermes_columnstore::compression::{CompressionLevel, CompressionRegistry};
//!
//! let registry = CompressionRegistry::default();
//! let zstd = registry.get("zstd").unwrap();
//! let data = b"Hello, World!".repeat(10);
//! let compressed = zstd.compress(&data, CompressionLevel::FAST).unwrap();
//! assert_eq!(zstd.decompress(&compressed, data.len()).unwrap(), data);
//! ```

mod zstd;

use std::io;
use std::sync::Arc;

pub use self::zstd::ZstdCompressor;

/// Name of the pass-through compressor.
pub const NONE: &str = "none";
/// Name of the zstd compressor.
pub const ZSTD: &str = "zstd";

/// Compression level (1-22 for zstd, ignored by `none`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(pub i32);

impl CompressionLevel {
    /// Fast compression (level 1)
    pub const FAST: Self = Self(1);
    /// Default compression (level 3)
    pub const DEFAULT: Self = Self(3);
    /// Better compression (level 9)
    pub const BETTER: Self = Self(9);
    /// Best compression (level 19)
    pub const BEST: Self = Self(19);
}

impl Default for CompressionLevel {
    fn default() -> Self {
        // Pages are small and decoded on the query path
        Self::DEFAULT
    }
}

/// Byte transform applied to whole value pages.
///
/// Implementations must be pure: the same input always yields output that
/// `decompress` maps back to the input, from any thread.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> io::Result<Vec<u8>>;

    /// `raw_len` is the exact decompressed size recorded at write time.
    fn decompress(&self, data: &[u8], raw_len: usize) -> io::Result<Vec<u8>>;
}

/// Identity transform; pages are always stored raw.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> io::Result<Vec<u8>> {
        if data.len() != raw_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("raw page length {} != expected {}", data.len(), raw_len),
            ));
        }
        Ok(data.to_vec())
    }
}

/// Registry of named compressors, in registration order.
#[derive(Clone)]
pub struct CompressionRegistry {
    compressors: Vec<(String, Arc<dyn Compressor>)>,
}

impl CompressionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            compressors: Vec::new(),
        }
    }

    /// Register a compressor; replaces an existing entry of the same name
    /// in place, keeping its original position.
    pub fn register(&mut self, name: &str, compressor: impl Compressor + 'static) {
        let compressor: Arc<dyn Compressor> = Arc::new(compressor);
        match self.compressors.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = compressor,
            None => self.compressors.push((name.to_string(), compressor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        self.compressors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| Arc::clone(c))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.compressors.iter().any(|(n, _)| n == name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.compressors.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl Default for CompressionRegistry {
    /// Registry with `none` and `zstd`, in that order
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(NONE, NoneCompressor);
        registry.register(ZSTD, ZstdCompressor);
        registry
    }
}

impl std::fmt::Debug for CompressionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;

    impl Compressor for Reverse {
        fn compress(&self, data: &[u8], _level: CompressionLevel) -> io::Result<Vec<u8>> {
            Ok(data.iter().rev().copied().collect())
        }

        fn decompress(&self, data: &[u8], _raw_len: usize) -> io::Result<Vec<u8>> {
            Ok(data.iter().rev().copied().collect())
        }
    }

    #[test]
    fn test_default_registration_order() {
        let registry = CompressionRegistry::default();
        assert_eq!(registry.names(), vec![NONE, ZSTD]);
        assert!(registry.contains("zstd"));
        assert!(registry.get("lz4").is_none());
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = CompressionRegistry::default();
        registry.register("reverse", Reverse);
        registry.register(NONE, Reverse);
        assert_eq!(registry.names(), vec![NONE, ZSTD, "reverse"]);

        let none = registry.get(NONE).unwrap();
        assert_eq!(
            none.compress(b"abc", CompressionLevel::default()).unwrap(),
            b"cba"
        );
    }

    #[test]
    fn test_none_checks_length() {
        let none = NoneCompressor;
        assert_eq!(none.decompress(b"abc", 3).unwrap(), b"abc");
        assert!(none.decompress(b"abc", 4).is_err());
    }
}
