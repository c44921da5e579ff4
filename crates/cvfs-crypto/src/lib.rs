//! cvfs-crypto: key material and sector encryption for cvfs volumes
//!
//! Pipeline from passphrase to readable metadata:
//! ```text
//! passphrase ──SHA-256 feedback KDF──▶ key bytes (SecretBytes)
//!            ──CipherDescriptor::construct──▶ CipherKey
//!            ──decrypt_sector──▶ plaintext sector (random filler ‖ payload)
//! ```
//!
//! The block ciphers themselves sit behind [`BlockCipher`]; the built-in
//! registry ships Rijndael (AES) only.

pub mod cipher;
pub mod kdf;
pub mod secret;
pub mod sector;

pub use cipher::{BlockCipher, CipherDescriptor, CipherError, CipherKey, CipherRegistry, RIJNDAEL};
pub use kdf::{derive_key, DIGEST_SIZE};
pub use secret::{AllocError, SecretBytes};
pub use sector::{decrypt_sector, encrypt_sector, Sector, PAYLOAD_SIZE, RANDOM_SIZE, SECTOR_SIZE};

/// Largest key any registered cipher may ask for, in bytes.
pub const MAX_KEY_SIZE: usize = 256;
