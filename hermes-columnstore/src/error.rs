//! Error types for hermes-columnstore

use std::io;

use crate::DocId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Columnstore corruption: {0}")]
    Corruption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid document id: {0}")]
    InvalidDocId(DocId),

    #[error("Column not found: {0}")]
    ColumnNotFound(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Encryption error: {0}")]
    Encryption(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn corruption(msg: impl Into<String>) -> Error {
    Error::Corruption(msg.into())
}
