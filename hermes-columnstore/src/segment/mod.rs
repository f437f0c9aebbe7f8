//! Segment identity and file naming

mod types;

pub use types::*;
