//! Sparse bitmap scenarios through the public API

use std::sync::Arc;

use crate::structures::read_index;
use crate::{
    BitmapIteratorOptions, DocId, DocSet, OwnedBytes, SkipEntry, SparseBitmapIterator,
    SparseBitmapWriter, TERMINATED,
};

fn build(docs: impl IntoIterator<Item = DocId>) -> (OwnedBytes, Arc<[SkipEntry]>) {
    let mut writer = SparseBitmapWriter::new(Vec::new());
    for doc in docs {
        assert!(writer.push_back(doc).unwrap(), "push_back({})", doc);
    }
    writer.finish().unwrap();
    let index: Arc<[SkipEntry]> = writer.index().into();
    (OwnedBytes::new(writer.into_inner()), index)
}

fn runs() -> Vec<DocId> {
    (1..=32)
        .chain(160..=1184)
        .chain(1201..=1731)
        .chain(60000..=64500)
        .collect()
}

#[test]
fn test_runs_ordinals() {
    let docs = runs();
    let (data, index) = build(docs.iter().copied());

    for options in [
        BitmapIteratorOptions::default(),
        BitmapIteratorOptions::with_index(Arc::clone(&index)),
    ] {
        let mut it = SparseBitmapIterator::new(data.clone(), options);
        assert!(it.next());
        assert_eq!(it.doc(), 1);
        for expected in 2..=32 {
            assert_eq!(it.advance(), expected);
        }
        assert!(it.next());
        assert_eq!(it.doc(), 160);
        assert_eq!(it.ordinal(), 32);
        assert_eq!(it.seek(1185), 1201);
        assert_eq!(it.ordinal(), 32 + 1025);
        assert_eq!(it.seek(60000), 60000);
        assert_eq!(it.ordinal(), 1588);
        assert_eq!(it.seek(64500), 64500);
        assert_eq!(it.ordinal() as usize, docs.len() - 1);
        assert!(!it.next());
        assert_eq!(it.ordinal() as usize, docs.len());
    }
}

#[test]
fn test_index_roundtrip_from_bytes() {
    let docs: Vec<DocId> = (1..400_000).step_by(97).collect();
    let (data, index) = build(docs.iter().copied());

    let mut bytes = Vec::new();
    crate::structures::write_index(&index, &mut bytes).unwrap();
    let parsed: Arc<[SkipEntry]> = read_index(&bytes).unwrap().into();
    assert_eq!(parsed.len(), 7);
    assert_eq!(&parsed[..], &index[..]);

    let mut it = SparseBitmapIterator::new(data, BitmapIteratorOptions::with_index(parsed));
    assert_eq!(it.cost(), docs.len() as u64);
    let target = 300_000;
    let rank = docs.partition_point(|&d| d < target);
    assert_eq!(it.seek(target), docs[rank]);
    assert_eq!(it.ordinal() as usize, rank);
    // Whole-set estimate, unaffected by the position
    assert_eq!(it.size_hint() as usize, docs.len());
    assert_eq!(it.seek_ordinal(rank as u32 + 10), docs[rank + 10]);
    assert_eq!(it.seek(TERMINATED), TERMINATED);
    assert_eq!(it.ordinal() as usize, docs.len());
}

#[test]
fn test_erase_in_open_block() {
    let mut writer = SparseBitmapWriter::new(Vec::new());
    assert!(writer.push_back(10).unwrap());
    assert!(writer.push_back(42).unwrap());
    assert!(writer.erase(42));
    assert_eq!(writer.count(), 1);
    assert!(writer.push_back(50).unwrap());
    writer.finish().unwrap();

    let mut it = SparseBitmapIterator::sequential(OwnedBytes::new(writer.into_inner()));
    assert_eq!(it.advance(), 10);
    assert_eq!(it.advance(), 50);
    assert_eq!(it.advance(), TERMINATED);
}

#[test]
fn test_erase_after_block_flush() {
    let mut writer = SparseBitmapWriter::new(Vec::new());
    assert!(writer.push_back(42).unwrap());
    // Crossing into the next block flushes the block holding 42
    assert!(writer.push_back(70_000).unwrap());
    assert!(!writer.erase(42));
    writer.finish().unwrap();

    let mut it = SparseBitmapIterator::sequential(OwnedBytes::new(writer.into_inner()));
    assert_eq!(it.advance(), 42);
    assert_eq!(it.advance(), 70_000);
    assert_eq!(it.advance(), TERMINATED);
}

#[test]
fn test_rejected_ids() {
    let mut writer = SparseBitmapWriter::new(Vec::new());
    assert!(!writer.push_back(0).unwrap());
    assert!(!writer.push_back(TERMINATED).unwrap());
    assert!(writer.push_back(7).unwrap());
    assert!(!writer.push_back(7).unwrap());
    assert!(!writer.push_back(3).unwrap());
    assert_eq!(writer.count(), 1);
}
