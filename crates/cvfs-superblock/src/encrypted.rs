//! Encrypted descriptor: one sector holding the superblock record

use std::io::{Read, Write};
use std::path::PathBuf;

use cvfs_core::{CoreError, CoreResult, CryptoFlags, VolumeParms};
use cvfs_crypto::{decrypt_sector, encrypt_sector, CipherKey, Sector};

use crate::path::descriptor_path;
use crate::record::SuperblockRecord;
use crate::{
    ENCRYPTED_BACKUP_NAME, ENCRYPTED_DESCRIPTOR_NAME, SUPERBLOCK_MAGIC, SUPERBLOCK_VERSION,
};

/// A decoded record together with the decryption status.
///
/// `status` is advisory: `Ok` does not mean the key was right. Check
/// `record.magic` and `record.version` before trusting the fields.
#[derive(Debug)]
pub struct DecodedRecord {
    pub record: SuperblockRecord,
    pub status: CoreResult<()>,
}

/// Read and decrypt the encrypted descriptor under `base_path`.
///
/// Fails with `Storage` if the file is missing, shorter than a sector or
/// unreadable. Once a full sector has been read the record is always
/// decoded, even if decryption reported a problem.
pub fn read_encrypted(
    base_path: &str,
    key: &CipherKey,
    flags: CryptoFlags,
) -> CoreResult<DecodedRecord> {
    let path = descriptor_path(base_path, ENCRYPTED_DESCRIPTOR_NAME)?;

    let mut sector = Sector::zeroed();
    let mut file = std::fs::File::open(&path).map_err(|e| CoreError::storage(&path, e))?;
    file.read_exact(sector.as_mut_bytes())
        .map_err(|e| CoreError::storage(&path, e))?;

    let status = decrypt_sector(&mut sector, key, flags);
    let record = SuperblockRecord::decode(sector.payload());
    drop(sector);
    let record = record?;

    if let Err(e) = &status {
        tracing::warn!(path = %path.display(), "decrypting encrypted descriptor: {e}");
    }
    tracing::debug!(path = %path.display(), magic = record.magic, version = record.version, "read encrypted descriptor");
    Ok(DecodedRecord { record, status })
}

/// Encrypt `record` into a fresh sector and rewrite the encrypted descriptor.
///
/// The written record always carries [`SUPERBLOCK_MAGIC`] and
/// [`SUPERBLOCK_VERSION`]; `record.magic` and `record.version` are ignored.
/// The random filler is regenerated on every call.
pub fn write_encrypted(
    base_path: &str,
    key: &CipherKey,
    parms: &VolumeParms,
    record: &SuperblockRecord,
) -> CoreResult<()> {
    if parms.read_only {
        return Err(CoreError::ReadOnly);
    }
    let path = descriptor_path(base_path, ENCRYPTED_DESCRIPTOR_NAME)?;

    let stamped = SuperblockRecord {
        magic: SUPERBLOCK_MAGIC,
        version: SUPERBLOCK_VERSION,
        ..record.clone()
    };

    let mut sector = Sector::zeroed();
    sector.fill_random(&mut rand::thread_rng());
    stamped.encode(sector.payload_mut())?;
    encrypt_sector(&mut sector, key, parms.crypto_flags)?;

    let mut file = std::fs::File::create(&path).map_err(|e| CoreError::storage(&path, e))?;
    file.write_all(sector.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| CoreError::storage(&path, e))?;

    tracing::debug!(path = %path.display(), "wrote encrypted descriptor");
    Ok(())
}

/// Copy the encrypted descriptor to `<base>superblock.bin.bak`, replacing
/// any earlier backup.
///
/// Returns the backup path, or `None` if there is no encrypted descriptor
/// to copy.
pub fn backup_encrypted(base_path: &str, parms: &VolumeParms) -> CoreResult<Option<PathBuf>> {
    if parms.read_only {
        return Err(CoreError::ReadOnly);
    }
    let source = descriptor_path(base_path, ENCRYPTED_DESCRIPTOR_NAME)?;
    let backup = descriptor_path(base_path, ENCRYPTED_BACKUP_NAME)?;

    match std::fs::copy(&source, &backup) {
        Ok(_) => {
            tracing::info!(backup = %backup.display(), "backed up encrypted descriptor");
            Ok(Some(backup))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !source.exists() => Ok(None),
        Err(e) => Err(CoreError::storage(&backup, e)),
    }
}
