//! Volume engine seam
//!
//! The superblock hands its key to a volume engine on open and takes it
//! back on close. The engine may keep using the key until `detach` returns,
//! which is why [`crate::Superblock`] only drops its key after a successful
//! detach.

use std::path::{Path, PathBuf};

use cvfs_core::{CoreError, CoreResult, VolumeParms};
use cvfs_crypto::CipherKey;

/// An attached volume.
pub trait Volume: Send + Sync {
    /// Parameters the volume was attached with.
    fn parms(&self) -> &VolumeParms;

    /// Release the volume. On error the volume stays attached and the call
    /// may be retried.
    fn detach(&mut self) -> CoreResult<()>;
}

/// Attaches volumes rooted at a base path.
pub trait VolumeEngine {
    fn attach(
        &self,
        base_path: &str,
        key: &CipherKey,
        parms: &VolumeParms,
    ) -> CoreResult<Box<dyn Volume>>;
}

/// Engine for volumes stored in a local directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalVolumeEngine;

impl LocalVolumeEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Directory that holds the files named by `base_path`.
fn volume_root(base_path: &str) -> PathBuf {
    if base_path.ends_with('/') {
        return PathBuf::from(base_path);
    }
    match Path::new(base_path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl VolumeEngine for LocalVolumeEngine {
    fn attach(
        &self,
        base_path: &str,
        key: &CipherKey,
        parms: &VolumeParms,
    ) -> CoreResult<Box<dyn Volume>> {
        let root = volume_root(base_path);
        let meta = std::fs::metadata(&root).map_err(|e| CoreError::storage(&root, e))?;
        if !meta.is_dir() {
            return Err(CoreError::storage(
                &root,
                std::io::Error::other("volume root is not a directory"),
            ));
        }

        tracing::info!(
            root = %root.display(),
            cipher = %key.spec_string(),
            read_only = parms.read_only,
            "attached volume"
        );
        Ok(Box::new(LocalVolume {
            root,
            parms: parms.clone(),
            attached: true,
        }))
    }
}

/// A volume attached by [`LocalVolumeEngine`].
#[derive(Debug)]
pub struct LocalVolume {
    root: PathBuf,
    parms: VolumeParms,
    attached: bool,
}

impl LocalVolume {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl Volume for LocalVolume {
    fn parms(&self) -> &VolumeParms {
        &self.parms
    }

    fn detach(&mut self) -> CoreResult<()> {
        if self.attached {
            self.attached = false;
            tracing::info!(root = %self.root.display(), "detached volume");
        }
        Ok(())
    }
}
