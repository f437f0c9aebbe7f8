//! Columnstore configuration
//!
//! [`ColumnstoreOptions`] holds the serializable knobs; [`ColumnstoreConfig`]
//! adds the runtime hooks (compressor registry, cipher) that cannot come
//! from a config file.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::compression::{self, CompressionRegistry};
use crate::encryption::Cipher;

/// Serializable columnstore options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnstoreOptions {
    /// Values per payload page; each page is compressed and decoded as a unit
    #[serde(default = "default_values_per_page")]
    pub values_per_page: u32,
    /// Writing merged segments: contiguous fixed-width columns are stored
    /// without a presence bitmap
    #[serde(default)]
    pub consolidation: bool,
    /// Compressor used when a column asks for none in particular
    #[serde(default = "default_compression")]
    pub default_compression: String,
}

fn default_values_per_page() -> u32 {
    1024
}

fn default_compression() -> String {
    compression::ZSTD.to_string()
}

impl Default for ColumnstoreOptions {
    fn default() -> Self {
        Self {
            values_per_page: default_values_per_page(),
            consolidation: false,
            default_compression: default_compression(),
        }
    }
}

/// Columnstore configuration shared by writers and readers
#[derive(Clone, Default)]
pub struct ColumnstoreConfig {
    pub options: ColumnstoreOptions,
    /// Compressors available to columns, looked up by name
    pub compressors: Arc<CompressionRegistry>,
    /// Cipher for columns that request encryption
    pub cipher: Option<Arc<dyn Cipher>>,
}

impl ColumnstoreConfig {
    pub fn with_options(options: ColumnstoreOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_compressors(mut self, compressors: CompressionRegistry) -> Self {
        self.compressors = Arc::new(compressors);
        self
    }

    /// Writing in consolidation (merge) mode
    pub fn consolidation(mut self, consolidation: bool) -> Self {
        self.options.consolidation = consolidation;
        self
    }

    pub(crate) fn values_per_page(&self) -> u32 {
        self.options.values_per_page.max(1)
    }
}

impl std::fmt::Debug for ColumnstoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnstoreConfig")
            .field("options", &self.options)
            .field("compressors", &self.compressors)
            .field("cipher", &self.cipher.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}
