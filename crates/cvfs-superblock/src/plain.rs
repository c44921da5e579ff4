//! Plaintext descriptor: cipher choice and CBC flag
//!
//! Line-oriented `name: value` text. Recognised names are `cipher`
//! (`<id>-<keyBits>-<blockBits>`) and `use-cbc` (`1` sets the flag, anything
//! else clears it). Unknown names and lines that do not match are skipped,
//! so older and newer writers can share the file.

use std::fmt;
use std::io::Write;

use secrecy::SecretString;

use cvfs_core::{CoreError, CoreResult, CryptoFlags, VolumeParms};
use cvfs_crypto::{derive_key, CipherDescriptor, CipherError, CipherKey, CipherRegistry, MAX_KEY_SIZE};

use crate::path::descriptor_path;
use crate::{MAX_CIPHER_ID_LEN, PLAIN_DESCRIPTOR_NAME};

/// Cipher identifier plus key and block size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSpec {
    pub id: String,
    pub key_size: usize,
    pub block_size: usize,
}

impl CipherSpec {
    /// Parse `<id>-<keyBits>-<blockBits>`. Bit counts are truncated to whole
    /// bytes. Returns `None` if the text does not have that shape.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.splitn(3, '-');
        let id = parts.next()?;
        let key_bits: usize = parts.next()?.parse().ok()?;
        let block_bits: usize = parts.next()?.parse().ok()?;
        if id.is_empty() || id.len() > MAX_CIPHER_ID_LEN {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            key_size: key_bits / 8,
            block_size: block_bits / 8,
        })
    }

    pub fn for_key(key: &CipherKey) -> Self {
        Self {
            id: key.cipher().id.to_string(),
            key_size: key.key_size(),
            block_size: key.block_size(),
        }
    }
}

impl fmt::Display for CipherSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.id, self.key_size * 8, self.block_size * 8)
    }
}

/// Parsed contents of the plaintext descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlainDescriptor {
    pub cipher: Option<CipherSpec>,
    /// `None` when the file has no `use-cbc` line; the caller's flag stands.
    pub use_cbc: Option<bool>,
}

impl PlainDescriptor {
    /// Parse descriptor text. Never fails: unusable lines are ignored and a
    /// later valid line overrides an earlier one.
    pub fn parse(text: &str) -> Self {
        let mut descriptor = Self::default();
        for line in text.lines() {
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            let Some(value) = rest.split_whitespace().next() else {
                continue;
            };
            match name {
                "cipher" => {
                    if let Some(spec) = CipherSpec::parse(value) {
                        descriptor.cipher = Some(spec);
                    }
                }
                "use-cbc" => descriptor.use_cbc = Some(value == "1"),
                _ => {}
            }
        }
        descriptor
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(cipher) = &self.cipher {
            out.push_str(&format!("cipher: {cipher}\n"));
        }
        if let Some(cbc) = self.use_cbc {
            out.push_str(&format!("use-cbc: {}\n", u8::from(cbc)));
        }
        out
    }
}

/// Derive the key bytes from `passphrase` and build the key object. The
/// derived bytes are burned before returning, whether or not construction
/// succeeded.
pub(crate) fn build_key(
    cipher: &CipherDescriptor,
    spec: &CipherSpec,
    passphrase: &SecretString,
) -> CoreResult<CipherKey> {
    if spec.key_size > MAX_KEY_SIZE {
        return Err(CipherError::BadKeySize {
            cipher: cipher.id,
            bytes: spec.key_size,
        }
        .into());
    }
    let material = derive_key(passphrase, spec.key_size)?;
    let key = CipherKey::create(cipher, spec.block_size, spec.key_size, material.as_bytes());
    drop(material);
    Ok(key?)
}

/// Read the plaintext descriptor under `base_path` and build the volume key.
///
/// Applies the descriptor's CBC setting to `parms`. Fails with
/// `InvalidParameter` for an overlong path, `Storage` if the file cannot be
/// read, `UnknownCipher` if the registry lacks the named cipher, and
/// `NotEnoughMemory`/`MiscCipher` if the key cannot be built.
pub fn read_plain(
    base_path: &str,
    passphrase: &SecretString,
    registry: &CipherRegistry,
    parms: &mut VolumeParms,
) -> CoreResult<CipherKey> {
    let path = descriptor_path(base_path, PLAIN_DESCRIPTOR_NAME)?;
    let raw = std::fs::read(&path).map_err(|e| CoreError::storage(&path, e))?;
    let descriptor = PlainDescriptor::parse(&String::from_utf8_lossy(&raw));

    if let Some(cbc) = descriptor.use_cbc {
        parms.crypto_flags.set(CryptoFlags::USE_CBC, cbc);
    }

    let Some(spec) = descriptor.cipher else {
        return Err(CoreError::UnknownCipher(String::new()));
    };
    let cipher = registry
        .find(&spec.id)
        .ok_or_else(|| CoreError::UnknownCipher(spec.id.clone()))?;

    let key = build_key(cipher, &spec, passphrase)?;
    tracing::debug!(
        path = %path.display(),
        cipher = %spec,
        cbc = parms.crypto_flags.use_cbc(),
        "read plaintext descriptor"
    );
    Ok(key)
}

/// Rewrite the plaintext descriptor under `base_path` from `key` and `parms`.
///
/// The file is truncated and written from scratch; lines a newer writer
/// may have added are lost.
pub fn write_plain(base_path: &str, key: &CipherKey, parms: &VolumeParms) -> CoreResult<()> {
    if parms.read_only {
        return Err(CoreError::ReadOnly);
    }
    let path = descriptor_path(base_path, PLAIN_DESCRIPTOR_NAME)?;

    let descriptor = PlainDescriptor {
        cipher: Some(CipherSpec::for_key(key)),
        use_cbc: Some(parms.crypto_flags.use_cbc()),
    };

    let mut file = std::fs::File::create(&path).map_err(|e| CoreError::storage(&path, e))?;
    file.write_all(descriptor.render().as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| CoreError::storage(&path, e))?;

    tracing::debug!(path = %path.display(), "wrote plaintext descriptor");
    Ok(())
}
