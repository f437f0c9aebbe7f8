//! Segment types and metadata

use std::path::PathBuf;

/// Unique segment identifier (UUID7-like: 48-bit timestamp + 80-bit random)
///
/// Format: [48-bit timestamp ms][80-bit random]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u128);

impl SegmentId {
    pub fn new() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let random_bits: u128 =
            ((rand::random::<u64>() as u128) << 16) | (rand::random::<u16>() as u128);

        Self((timestamp_ms << 80) | random_bits)
    }

    pub fn from_u128(id: u128) -> Self {
        Self(id)
    }

    /// Create from hex string (32 chars)
    pub fn from_hex(s: &str) -> Option<Self> {
        u128::from_str_radix(s, 16).ok().map(Self)
    }

    /// Convert to hex string (32 chars, zero-padded)
    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.0)
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

/// Segment metadata the columnstore needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMeta {
    pub id: SegmentId,
    /// Number of documents in the segment; valid doc ids are `1..=docs_count`
    pub docs_count: u32,
}

impl SegmentMeta {
    pub fn new(id: SegmentId, docs_count: u32) -> Self {
        Self { id, docs_count }
    }
}

/// State handed to writers when a segment is flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushState {
    /// Final number of documents in the segment
    pub docs_count: u32,
}

/// Paths for segment files
#[derive(Debug, Clone)]
pub struct SegmentFiles {
    pub columnstore: PathBuf,
}

impl SegmentFiles {
    pub fn new(segment_id: SegmentId) -> Self {
        let prefix = format!("seg_{}", segment_id.to_hex());
        Self {
            columnstore: PathBuf::from(format!("{}.cs", prefix)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id_hex_roundtrip() {
        let id = SegmentId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(SegmentId::from_hex(&hex), Some(id));
        assert_eq!(SegmentId::from_hex("not hex"), None);
    }

    #[test]
    fn test_segment_files() {
        let files = SegmentFiles::new(SegmentId::from_u128(0xab));
        assert_eq!(
            files.columnstore,
            PathBuf::from("seg_000000000000000000000000000000ab.cs")
        );
    }
}
