use std::path::{Path, PathBuf};

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Result taxonomy shared by every cvfs layer.
///
/// Operations that can hand back a partially valid object (opening a
/// superblock whose encrypted half is damaged) report one of these alongside
/// the object instead of failing outright.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not enough memory")]
    NotEnoughMemory,

    #[error("storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown cipher: {0:?}")]
    UnknownCipher(String),

    #[error("cipher failure: {0}")]
    MiscCipher(String),

    #[error("bad superblock (magic {found:#010x})")]
    BadSuperblock { found: u32 },

    #[error("unsupported superblock version {found} (newest supported is {supported})")]
    BadVersion { found: u32, supported: u32 },

    #[error("volume is read-only")]
    ReadOnly,

    #[error("config error: {0}")]
    Config(String),
}

impl CoreError {
    /// Wrap an I/O failure on `path`.
    pub fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CoreError::Storage {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
