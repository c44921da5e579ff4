use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::types::{CryptoFlags, VolumeParms};

/// Top-level configuration (loaded from cvfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CvfsConfig {
    pub logging: LoggingConfig,
    pub volume: VolumeConfig,
}

impl CvfsConfig {
    /// Load the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Defaults applied when opening or creating a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Open volumes read-only (default: false)
    pub read_only: bool,
    /// Cipher spec for new volumes, `<id>-<keyBits>-<blockBits>`
    pub cipher: String,
    /// Chain blocks within a sector for new volumes (default: true)
    pub use_cbc: bool,
    /// Root directory id written into new volumes
    pub root_id: u32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            cipher: "rijndael-256-128".into(),
            use_cbc: true,
            root_id: 1,
        }
    }
}

impl VolumeConfig {
    /// Volume parameters for an open. The CBC flag is only a starting value;
    /// the plaintext descriptor overrides it.
    pub fn parms(&self) -> VolumeParms {
        let mut crypto_flags = CryptoFlags::empty();
        crypto_flags.set(CryptoFlags::USE_CBC, self.use_cbc);
        VolumeParms {
            read_only: self.read_only,
            crypto_flags,
        }
    }
}
