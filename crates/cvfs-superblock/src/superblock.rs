//! Superblock lifecycle: open, create, save, close

use std::fmt;

use secrecy::SecretString;
use thiserror::Error;
use zeroize::Zeroizing;

use cvfs_core::{CoreError, CoreResult, CryptoFlags, VolumeParms};
use cvfs_core::config::VolumeConfig;
use cvfs_crypto::{CipherKey, CipherRegistry};

use crate::encrypted::{read_encrypted, write_encrypted, DecodedRecord};
use crate::path::descriptor_path;
use crate::plain::{build_key, read_plain, write_plain, CipherSpec};
use crate::record::{bounded, SuperblockRecord};
use crate::volume::{Volume, VolumeEngine};
use crate::{
    DESCRIPTION_SIZE, LABEL_SIZE, PLAIN_DESCRIPTOR_NAME, SUPERBLOCK_MAGIC, SUPERBLOCK_VERSION,
};

/// Which descriptor files [`Superblock::save`] rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Rewrite the plaintext and the encrypted descriptor.
    Full,
    /// Rewrite only the encrypted descriptor. Use when cipher and CBC
    /// setting are unchanged.
    EncryptedOnly,
}

/// Settings for a new volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// `<id>-<keyBits>-<blockBits>`
    pub cipher: String,
    pub use_cbc: bool,
    pub root_id: u32,
    pub flags: u32,
    pub label: String,
    pub description: String,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self::from_config(&VolumeConfig::default())
    }
}

impl CreateOptions {
    pub fn from_config(config: &VolumeConfig) -> Self {
        Self {
            cipher: config.cipher.clone(),
            use_cbc: config.use_cbc,
            root_id: config.root_id,
            flags: 0,
            label: String::new(),
            description: String::new(),
        }
    }
}

/// An open volume superblock.
///
/// Owns the volume key and the attached volume. Field order matters: the
/// volume is released before the key, and the key before the base path.
pub struct Superblock {
    volume: Option<Box<dyn Volume>>,
    key: CipherKey,
    base_path: Zeroizing<String>,
    parms: VolumeParms,
    magic: u32,
    version: u32,
    flags: u32,
    root_id: u32,
    label: String,
    description: String,
}

/// Result of [`Superblock::open`].
///
/// `superblock` is present whenever the plaintext descriptor was readable
/// and the volume attached. `status` is `Ok` only if the encrypted
/// descriptor was also read and passed the magic and version checks. A
/// superblock with a failed status is fit for inspection and repair only.
#[derive(Debug)]
#[must_use]
pub struct Opened {
    pub superblock: Superblock,
    pub status: CoreResult<()>,
}

impl Opened {
    pub fn is_usable(&self) -> bool {
        self.status.is_ok()
    }

    /// The superblock if fully valid, otherwise the status error. A rejected
    /// superblock is closed on the way out.
    pub fn into_result(self) -> CoreResult<Superblock> {
        match self.status {
            Ok(()) => Ok(self.superblock),
            Err(e) => Err(e),
        }
    }

    pub fn into_parts(self) -> (Superblock, CoreResult<()>) {
        (self.superblock, self.status)
    }
}

/// Detaching the volume failed. The superblock is handed back untouched so
/// the close can be retried.
#[derive(Debug, Error)]
#[error("detaching volume failed: {error}")]
pub struct CloseError {
    pub superblock: Superblock,
    #[source]
    pub error: CoreError,
}

fn copy_base_path(base_path: &str) -> CoreResult<Zeroizing<String>> {
    let mut copy = Zeroizing::new(String::new());
    copy.try_reserve_exact(base_path.len())
        .map_err(|_| CoreError::NotEnoughMemory)?;
    copy.push_str(base_path);
    Ok(copy)
}

fn validate(record: &SuperblockRecord) -> CoreResult<()> {
    if record.magic != SUPERBLOCK_MAGIC {
        return Err(CoreError::BadSuperblock {
            found: record.magic,
        });
    }
    if record.version > SUPERBLOCK_VERSION {
        return Err(CoreError::BadVersion {
            found: record.version,
            supported: SUPERBLOCK_VERSION,
        });
    }
    Ok(())
}

impl Superblock {
    /// Open the superblock stored under `base_path`.
    ///
    /// Errors reading the plaintext descriptor or attaching the volume are
    /// returned as `Err`. Errors reading or validating the encrypted
    /// descriptor are reported in [`Opened::status`] next to the superblock.
    /// The CBC flag in `parms` is replaced by the plaintext descriptor's.
    pub fn open(
        base_path: &str,
        passphrase: &SecretString,
        registry: &CipherRegistry,
        mut parms: VolumeParms,
        engine: &dyn VolumeEngine,
    ) -> CoreResult<Opened> {
        let base_path = copy_base_path(base_path)?;
        let key = read_plain(&base_path, passphrase, registry, &mut parms)?;

        let (record, read_status) = match read_encrypted(&base_path, &key, parms.crypto_flags) {
            Ok(DecodedRecord { record, status }) => (record, status),
            Err(e) => {
                tracing::warn!(base = %base_path.as_str(), "encrypted descriptor unreadable: {e}");
                (SuperblockRecord::default(), Err(e))
            }
        };

        let volume = engine.attach(&base_path, &key, &parms)?;

        let status = read_status.and_then(|()| validate(&record));
        match &status {
            Ok(()) => tracing::info!(
                base = %base_path.as_str(),
                cipher = %key.spec_string(),
                root_id = record.root_id,
                "opened superblock"
            ),
            Err(e) => tracing::warn!(
                base = %base_path.as_str(),
                "opened superblock in repair mode: {e}"
            ),
        }

        Ok(Opened {
            superblock: Self::assemble(volume, key, base_path, parms, record),
            status,
        })
    }

    /// Write a new superblock under `base_path` and attach its volume.
    ///
    /// Existing descriptor files are overwritten. On any failure the
    /// partially built superblock is torn down.
    pub fn create(
        base_path: &str,
        passphrase: &SecretString,
        registry: &CipherRegistry,
        mut parms: VolumeParms,
        options: &CreateOptions,
        engine: &dyn VolumeEngine,
    ) -> CoreResult<Superblock> {
        if parms.read_only {
            return Err(CoreError::ReadOnly);
        }
        descriptor_path(base_path, PLAIN_DESCRIPTOR_NAME)?;
        let base_path = copy_base_path(base_path)?;

        let spec = CipherSpec::parse(&options.cipher).ok_or_else(|| {
            CoreError::InvalidParameter(format!("malformed cipher spec {:?}", options.cipher))
        })?;
        let cipher = registry
            .find(&spec.id)
            .ok_or_else(|| CoreError::UnknownCipher(spec.id.clone()))?;
        let key = build_key(cipher, &spec, passphrase)?;
        parms.crypto_flags.set(CryptoFlags::USE_CBC, options.use_cbc);

        let volume = engine.attach(&base_path, &key, &parms)?;

        let record = SuperblockRecord {
            magic: SUPERBLOCK_MAGIC,
            version: SUPERBLOCK_VERSION,
            flags: options.flags,
            root_id: options.root_id,
            label: bounded(&options.label, LABEL_SIZE),
            description: bounded(&options.description, DESCRIPTION_SIZE),
        };
        let mut superblock = Self::assemble(volume, key, base_path, parms, record);
        superblock.save(SaveMode::Full)?;

        tracing::info!(
            base = %superblock.base_path(),
            cipher = %superblock.key.spec_string(),
            cbc = options.use_cbc,
            "created superblock"
        );
        Ok(superblock)
    }

    fn assemble(
        volume: Box<dyn Volume>,
        key: CipherKey,
        base_path: Zeroizing<String>,
        parms: VolumeParms,
        record: SuperblockRecord,
    ) -> Self {
        Self {
            volume: Some(volume),
            key,
            base_path,
            parms,
            magic: record.magic,
            version: record.version,
            flags: record.flags,
            root_id: record.root_id,
            label: record.label,
            description: record.description,
        }
    }

    /// Persist the superblock.
    ///
    /// Fails with `ReadOnly` before touching either file if the volume is
    /// read-only. With [`SaveMode::Full`] the plaintext descriptor is
    /// written first; if that fails the encrypted descriptor is left alone.
    /// A failed encrypted write does not undo a completed plaintext write.
    pub fn save(&mut self, mode: SaveMode) -> CoreResult<()> {
        let parms = self.parms().clone();
        if parms.read_only {
            return Err(CoreError::ReadOnly);
        }
        if mode == SaveMode::Full {
            write_plain(&self.base_path, &self.key, &parms)?;
        }
        write_encrypted(&self.base_path, &self.key, &parms, &self.record())?;

        self.magic = SUPERBLOCK_MAGIC;
        self.version = SUPERBLOCK_VERSION;
        tracing::debug!(base = %self.base_path(), ?mode, "saved superblock");
        Ok(())
    }

    /// Detach the volume, then drop the key and the base path.
    ///
    /// If detaching fails nothing is released and the superblock comes back
    /// inside the error.
    pub fn close(mut self) -> Result<(), CloseError> {
        if let Some(volume) = self.volume.as_mut() {
            if let Err(error) = volume.detach() {
                tracing::warn!(base = %self.base_path(), "close aborted: {error}");
                return Err(CloseError {
                    superblock: self,
                    error,
                });
            }
        }
        self.volume = None;
        tracing::debug!(base = %self.base_path(), "closed superblock");
        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn key(&self) -> &CipherKey {
        &self.key
    }

    /// Parameters reported by the attached volume.
    pub fn parms(&self) -> &VolumeParms {
        match &self.volume {
            Some(volume) => volume.parms(),
            None => &self.parms,
        }
    }

    pub fn volume(&self) -> Option<&dyn Volume> {
        self.volume.as_deref()
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn root_id(&self) -> u32 {
        self.root_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Snapshot of the encrypted-descriptor fields.
    pub fn record(&self) -> SuperblockRecord {
        SuperblockRecord {
            magic: self.magic,
            version: self.version,
            flags: self.flags,
            root_id: self.root_id,
            label: self.label.clone(),
            description: self.description.clone(),
        }
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn set_root_id(&mut self, root_id: u32) {
        self.root_id = root_id;
    }

    /// Set the label, cut to what fits on disk.
    pub fn set_label(&mut self, label: &str) {
        self.label = bounded(label, LABEL_SIZE);
    }

    /// Set the description, cut to what fits on disk.
    pub fn set_description(&mut self, description: &str) {
        self.description = bounded(description, DESCRIPTION_SIZE);
    }
}

impl Drop for Superblock {
    fn drop(&mut self) {
        if let Some(mut volume) = self.volume.take() {
            if let Err(e) = volume.detach() {
                tracing::warn!(base = %self.base_path.as_str(), "detach on drop failed: {e}");
            }
        }
    }
}

impl fmt::Debug for Superblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Superblock")
            .field("base_path", &self.base_path.as_str())
            .field("key", &self.key)
            .field("attached", &self.volume.is_some())
            .field("magic", &format_args!("{:#010x}", self.magic))
            .field("version", &self.version)
            .field("flags", &self.flags)
            .field("root_id", &self.root_id)
            .field("label", &self.label)
            .field("description", &self.description)
            .finish()
    }
}
