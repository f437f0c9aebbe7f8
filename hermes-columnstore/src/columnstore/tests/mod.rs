//! End-to-end columnstore tests: write a segment, read it back

mod bitmap;
