//! Cipher registry and key objects
//!
//! A [`CipherDescriptor`] names a block cipher and knows how to build a
//! keyed instance of it. Volumes look their cipher up by identifier in a
//! caller-supplied, ordered [`CipherRegistry`]. A [`CipherKey`] bundles the
//! chosen descriptor, block size, key size, the secret key bytes and the
//! keyed instance; dropping it zeroes the key material.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use thiserror::Error;

use cvfs_core::CoreError;

use crate::secret::{AllocError, SecretBytes};

/// Errors from the key construction layer.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("out of memory while building key")]
    OutOfMemory,

    #[error("unknown cipher: {0:?}")]
    UnknownCipher(String),

    #[error("{cipher}: unsupported key size of {bytes} bytes")]
    BadKeySize { cipher: &'static str, bytes: usize },

    #[error("{cipher}: unsupported block size of {bytes} bytes")]
    BadBlockSize { cipher: &'static str, bytes: usize },

    #[error("{cipher}: key schedule failed: {reason}")]
    Init {
        cipher: &'static str,
        reason: String,
    },
}

impl From<AllocError> for CipherError {
    fn from(_: AllocError) -> Self {
        CipherError::OutOfMemory
    }
}

impl From<CipherError> for CoreError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::OutOfMemory => CoreError::NotEnoughMemory,
            CipherError::UnknownCipher(id) => CoreError::UnknownCipher(id),
            other => CoreError::MiscCipher(other.to_string()),
        }
    }
}

/// A keyed block cipher instance.
///
/// `encrypt_block`/`decrypt_block` are only ever called with slices of
/// exactly `block_size()` bytes.
pub trait BlockCipher: Send + Sync {
    fn block_size(&self) -> usize;
    fn encrypt_block(&self, block: &mut [u8]);
    fn decrypt_block(&self, block: &mut [u8]);
}

/// Builds a keyed instance from raw key bytes and a block size in bytes.
pub type CipherConstructor =
    fn(key: &[u8], block_size: usize) -> Result<Box<dyn BlockCipher>, CipherError>;

/// Registry entry for a supported block cipher.
#[derive(Debug, Clone, Copy)]
pub struct CipherDescriptor {
    /// Identifier used in the plaintext descriptor (`<id>-<keyBits>-<blockBits>`)
    pub id: &'static str,
    pub description: &'static str,
    /// Accepted key sizes in bytes
    pub key_sizes: &'static [usize],
    /// Accepted block sizes in bytes
    pub block_sizes: &'static [usize],
    pub construct: CipherConstructor,
}

/// Rijndael with a 128-bit block (AES).
pub const RIJNDAEL: CipherDescriptor = CipherDescriptor {
    id: "rijndael",
    description: "Rijndael / AES, 128-bit block",
    key_sizes: &[16, 24, 32],
    block_sizes: &[16],
    construct: construct_rijndael,
};

/// Ordered set of ciphers a volume may name. Lookup returns the first match.
#[derive(Debug, Clone, Default)]
pub struct CipherRegistry {
    ciphers: Vec<CipherDescriptor>,
}

impl CipherRegistry {
    pub fn new(ciphers: Vec<CipherDescriptor>) -> Self {
        Self { ciphers }
    }

    /// The ciphers compiled into cvfs.
    pub fn builtin() -> Self {
        Self::new(vec![RIJNDAEL])
    }

    pub fn with(mut self, cipher: CipherDescriptor) -> Self {
        self.ciphers.push(cipher);
        self
    }

    pub fn find(&self, id: &str) -> Option<&CipherDescriptor> {
        self.ciphers.iter().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CipherDescriptor> {
        self.ciphers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphers.is_empty()
    }
}

/// Key object: cipher choice, sizes, secret key bytes and the keyed instance.
pub struct CipherKey {
    cipher: CipherDescriptor,
    block_size: usize,
    material: SecretBytes,
    instance: Box<dyn BlockCipher>,
}

impl CipherKey {
    /// Build a key for `cipher`. Sizes are in bytes; `material` must be
    /// exactly `key_size` bytes long. The caller keeps ownership of (and
    /// responsibility for burning) `material`; the key holds its own copy.
    pub fn create(
        cipher: &CipherDescriptor,
        block_size: usize,
        key_size: usize,
        material: &[u8],
    ) -> Result<Self, CipherError> {
        if !cipher.key_sizes.contains(&key_size) || material.len() != key_size {
            return Err(CipherError::BadKeySize {
                cipher: cipher.id,
                bytes: key_size,
            });
        }
        if !cipher.block_sizes.contains(&block_size) {
            return Err(CipherError::BadBlockSize {
                cipher: cipher.id,
                bytes: block_size,
            });
        }

        let material = SecretBytes::from_slice(material)?;
        let instance = (cipher.construct)(material.as_bytes(), block_size)?;

        tracing::debug!(
            cipher = cipher.id,
            key_bits = key_size * 8,
            block_bits = block_size * 8,
            "constructed cipher key"
        );

        Ok(Self {
            cipher: *cipher,
            block_size,
            material,
            instance,
        })
    }

    pub fn cipher(&self) -> &CipherDescriptor {
        &self.cipher
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn key_size(&self) -> usize {
        self.material.len()
    }

    /// `<id>-<keyBits>-<blockBits>`, the form stored in the plaintext descriptor.
    pub fn spec_string(&self) -> String {
        format!(
            "{}-{}-{}",
            self.cipher.id,
            self.key_size() * 8,
            self.block_size * 8
        )
    }

    pub fn encrypt_block(&self, block: &mut [u8]) {
        self.instance.encrypt_block(block);
    }

    pub fn decrypt_block(&self, block: &mut [u8]) {
        self.instance.decrypt_block(block);
    }

    /// Compare key bytes with another key without exposing them.
    pub fn same_material(&self, other: &CipherKey) -> bool {
        self.material.as_bytes() == other.material.as_bytes()
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("cipher", &self.cipher.id)
            .field("key_size", &self.material.len())
            .field("block_size", &self.block_size)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

enum Rijndael {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

fn construct_rijndael(key: &[u8], block_size: usize) -> Result<Box<dyn BlockCipher>, CipherError> {
    if block_size != 16 {
        return Err(CipherError::BadBlockSize {
            cipher: RIJNDAEL.id,
            bytes: block_size,
        });
    }
    let init_err = |e: aes::cipher::InvalidLength| CipherError::Init {
        cipher: RIJNDAEL.id,
        reason: e.to_string(),
    };
    let cipher = match key.len() {
        16 => Rijndael::Aes128(Aes128::new_from_slice(key).map_err(init_err)?),
        24 => Rijndael::Aes192(Aes192::new_from_slice(key).map_err(init_err)?),
        32 => Rijndael::Aes256(Aes256::new_from_slice(key).map_err(init_err)?),
        bytes => {
            return Err(CipherError::BadKeySize {
                cipher: RIJNDAEL.id,
                bytes,
            })
        }
    };
    Ok(Box::new(cipher))
}

impl BlockCipher for Rijndael {
    fn block_size(&self) -> usize {
        16
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Rijndael::Aes128(c) => c.encrypt_block(block),
            Rijndael::Aes192(c) => c.encrypt_block(block),
            Rijndael::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Rijndael::Aes128(c) => c.decrypt_block(block),
            Rijndael::Aes192(c) => c.decrypt_block(block),
            Rijndael::Aes256(c) => c.decrypt_block(block),
        }
    }
}
