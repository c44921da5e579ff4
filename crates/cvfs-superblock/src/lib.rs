//! cvfs-superblock: locate, decrypt and validate a volume's root descriptor
//!
//! A superblock is split over two files next to the volume data:
//!
//! ```text
//! <base>superblock.txt   plaintext, human-editable
//!     cipher: rijndael-256-128
//!     use-cbc: 1
//! <base>superblock.bin   one 512-byte sector, encrypted with the volume key
//!     [16 random][magic|version|flags|root id|label[32]|description[128]|0...]
//! ```
//!
//! Opening reads the plaintext half, derives the key from the passphrase,
//! decrypts the encrypted half and attaches the volume engine. A damaged
//! encrypted half does not prevent opening: the superblock is still handed
//! back together with the error so repair tools can fix it (see [`Opened`]).

pub mod encrypted;
pub mod path;
pub mod plain;
pub mod record;
pub mod superblock;
pub mod volume;

pub use encrypted::{backup_encrypted, read_encrypted, write_encrypted, DecodedRecord};
pub use path::descriptor_path;
pub use plain::{read_plain, write_plain, CipherSpec, PlainDescriptor};
pub use record::{SuperblockRecord, RECORD_SIZE};
pub use superblock::{CloseError, CreateOptions, Opened, SaveMode, Superblock};
pub use volume::{LocalVolume, LocalVolumeEngine, Volume, VolumeEngine};

/// File name of the plaintext descriptor, appended to the base path.
pub const PLAIN_DESCRIPTOR_NAME: &str = "superblock.txt";

/// File name of the encrypted descriptor, appended to the base path.
pub const ENCRYPTED_DESCRIPTOR_NAME: &str = "superblock.bin";

/// File name of the encrypted descriptor backup taken before a repair.
pub const ENCRYPTED_BACKUP_NAME: &str = "superblock.bin.bak";

/// Longest descriptor path (base path + file name) in bytes.
pub const MAX_PATH_LEN: usize = 1024;

/// Longest cipher identifier accepted in the plaintext descriptor.
pub const MAX_CIPHER_ID_LEN: usize = 63;

/// Magic value of a correctly decrypted encrypted descriptor ("CVSB").
pub const SUPERBLOCK_MAGIC: u32 = 0x4253_5643;

/// Newest encrypted descriptor version this crate understands and writes.
pub const SUPERBLOCK_VERSION: u32 = 1;

/// Size of the label field, including the terminating NUL.
pub const LABEL_SIZE: usize = 32;

/// Size of the description field, including the terminating NUL.
pub const DESCRIPTION_SIZE: usize = 128;
