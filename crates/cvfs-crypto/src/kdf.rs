//! Key derivation: passphrase → fixed-length key via SHA-256 feedback hashing
//!
//! The key starts as all zeros. The passphrase is consumed in chunks of at
//! most [`DIGEST_SIZE`] bytes; for each chunk the running key and the chunk
//! are hashed together and the digest is XORed into the key cyclically,
//! continuing from where the previous digest stopped and wrapping at the end
//! of the key.
//!
//! Hashing the running key together with each chunk keeps repeated
//! passphrase fragments from cancelling out (`x ^ x == 0`) or reproducing
//! the same key for different repetition counts. XOR accumulation lets every
//! passphrase byte reach every key byte it is folded into.
//!
//! Known weakness: when the passphrase is shorter than the key, only the
//! first `ceil(len / DIGEST_SIZE) * DIGEST_SIZE` key bytes are touched and
//! the rest stay zero. Changing that would change the key of every existing
//! volume, so it is left as is.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::secret::{AllocError, SecretBytes};

/// Width of the SHA-256 digest folded into the key per passphrase chunk.
pub const DIGEST_SIZE: usize = 32;

/// Derive a `key_len`-byte key from `passphrase`.
///
/// The passphrase ends at its first NUL byte, if any. An empty passphrase
/// yields an all-zero key. The only failure is being unable to allocate the
/// key buffer.
pub fn derive_key(passphrase: &SecretString, key_len: usize) -> Result<SecretBytes, AllocError> {
    let mut key = SecretBytes::zeroed(key_len)?;
    if key_len == 0 {
        return Ok(key);
    }

    let phrase = passphrase.expose_secret().as_bytes();
    let phrase = match phrase.iter().position(|&b| b == 0) {
        Some(end) => &phrase[..end],
        None => phrase,
    };

    let mut pos = 0;
    for chunk in phrase.chunks(DIGEST_SIZE) {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(chunk);
        let mut digest = hasher.finalize();

        let out = key.as_mut_bytes();
        for byte in digest.iter() {
            out[pos] ^= byte;
            pos += 1;
            if pos == key_len {
                pos = 0;
            }
        }
        digest.as_mut_slice().zeroize();
    }

    Ok(key)
}
