//! Owned secret buffers that are zeroed before their memory is released.

use thiserror::Error;
use zeroize::Zeroize;

use cvfs_core::CoreError;

/// The allocator could not provide backing storage for a secret.
#[derive(Debug, Error)]
#[error("secure allocation of {0} bytes failed")]
pub struct AllocError(pub usize);

impl From<AllocError> for CoreError {
    fn from(_: AllocError) -> Self {
        CoreError::NotEnoughMemory
    }
}

/// Heap buffer holding key material or decrypted data.
///
/// Zeroized on drop, so every exit path (including `?` early returns)
/// burns the contents.
pub struct SecretBytes {
    bytes: Vec<u8>,
}

impl SecretBytes {
    /// Allocate `len` zero bytes, reporting allocation failure instead of
    /// aborting.
    pub fn zeroed(len: usize) -> Result<Self, AllocError> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|_| AllocError(len))?;
        bytes.resize(len, 0);
        Ok(Self { bytes })
    }

    pub fn from_slice(src: &[u8]) -> Result<Self, AllocError> {
        let mut secret = Self::zeroed(src.len())?;
        secret.bytes.copy_from_slice(src);
        Ok(secret)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBytes")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
