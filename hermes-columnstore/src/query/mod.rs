//! Document iteration protocol shared by bitmaps and columns

mod docset;

pub use docset::*;
