use serde::{Deserialize, Serialize};

/// Sector crypto flags stored per volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoFlags(u32);

impl CryptoFlags {
    /// Chain cipher blocks inside a sector (CBC) instead of enciphering
    /// each block on its own.
    pub const USE_CBC: CryptoFlags = CryptoFlags(0x0001);

    pub const fn empty() -> Self {
        CryptoFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: CryptoFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CryptoFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CryptoFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: CryptoFlags, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    pub const fn use_cbc(self) -> bool {
        self.contains(Self::USE_CBC)
    }
}

/// Per-volume parameters handed to the volume engine on attach.
///
/// `crypto_flags` is overwritten from the plaintext descriptor when a
/// superblock is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeParms {
    /// Refuse every write to the descriptor files
    pub read_only: bool,
    /// Sector crypto flags
    pub crypto_flags: CryptoFlags,
}

impl VolumeParms {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}
