//! Pluggable payload encryption
//!
//! The columnstore never designs ciphers itself. Callers that want
//! encrypted columns put a [`Cipher`] into the config; page bytes are
//! transformed in place, keyed by their absolute offset in the file.

use std::io;

/// Position-dependent in-place byte transform.
///
/// `decrypt(offset, encrypt(offset, data))` must restore `data`. `offset`
/// is the absolute file offset of `data[0]`, so stream ciphers can derive
/// their keystream position from it.
pub trait Cipher: Send + Sync {
    /// Stable identifier, logged when opening encrypted columns
    fn name(&self) -> &str;

    fn encrypt(&self, offset: u64, data: &mut [u8]) -> io::Result<()>;

    fn decrypt(&self, offset: u64, data: &mut [u8]) -> io::Result<()>;
}
