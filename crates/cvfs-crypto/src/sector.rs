//! Sector crypto envelope
//!
//! Sector layout (plaintext side):
//! ```text
//! [16 bytes: random filler][496 bytes: payload]
//! ```
//!
//! The whole 512-byte sector is enciphered block by block with the volume
//! key. With `CryptoFlags::USE_CBC` blocks are chained from an all-zero IV,
//! so the random filler in front acts as a per-write IV and two writes of the
//! same payload never share ciphertext. Without CBC each block is enciphered
//! on its own and only the blocks covering the filler change between writes.
//!
//! There is no authentication tag. Decrypting with the wrong key succeeds
//! and yields garbage; callers validate what they decode.

use rand::RngCore;
use zeroize::Zeroize;

use cvfs_core::{CoreError, CoreResult, CryptoFlags};

use crate::cipher::CipherKey;

pub const SECTOR_SIZE: usize = 512;

/// Bytes of random filler at the start of every sector.
pub const RANDOM_SIZE: usize = 16;

pub const PAYLOAD_SIZE: usize = SECTOR_SIZE - RANDOM_SIZE;

/// One sector buffer. Zeroized on drop because it holds plaintext between
/// decryption and decoding.
pub struct Sector {
    bytes: [u8; SECTOR_SIZE],
}

impl Sector {
    pub fn zeroed() -> Self {
        Self {
            bytes: [0u8; SECTOR_SIZE],
        }
    }

    pub fn from_bytes(bytes: [u8; SECTOR_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SECTOR_SIZE] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; SECTOR_SIZE] {
        &mut self.bytes
    }

    pub fn random(&self) -> &[u8] {
        &self.bytes[..RANDOM_SIZE]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[RANDOM_SIZE..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[RANDOM_SIZE..]
    }

    /// Regenerate the random filler.
    pub fn fill_random<R: RngCore + ?Sized>(&mut self, rng: &mut R) {
        rng.fill_bytes(&mut self.bytes[..RANDOM_SIZE]);
    }
}

impl Drop for Sector {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sector")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn checked_block_size(key: &CipherKey) -> CoreResult<usize> {
    let block_size = key.block_size();
    if block_size == 0 || SECTOR_SIZE % block_size != 0 {
        return Err(CoreError::InvalidParameter(format!(
            "block size {block_size} does not divide the {SECTOR_SIZE}-byte sector"
        )));
    }
    Ok(block_size)
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Encrypt `sector` in place.
pub fn encrypt_sector(sector: &mut Sector, key: &CipherKey, flags: CryptoFlags) -> CoreResult<()> {
    let block_size = checked_block_size(key)?;
    let cbc = flags.use_cbc();
    let mut chain = vec![0u8; block_size];

    for block in sector.bytes.chunks_exact_mut(block_size) {
        if cbc {
            xor_into(block, &chain);
        }
        key.encrypt_block(block);
        if cbc {
            chain.copy_from_slice(block);
        }
    }
    Ok(())
}

/// Decrypt `sector` in place.
///
/// The status is advisory: `Ok` only means the sector could be processed
/// with this key's geometry, not that the key was right.
pub fn decrypt_sector(sector: &mut Sector, key: &CipherKey, flags: CryptoFlags) -> CoreResult<()> {
    let block_size = checked_block_size(key)?;
    let cbc = flags.use_cbc();
    let mut chain = vec![0u8; block_size];
    let mut next = vec![0u8; block_size];

    for block in sector.bytes.chunks_exact_mut(block_size) {
        if cbc {
            next.copy_from_slice(block);
        }
        key.decrypt_block(block);
        if cbc {
            xor_into(block, &chain);
            std::mem::swap(&mut chain, &mut next);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{BlockCipher, CipherDescriptor, CipherError, RIJNDAEL};

    fn cbc() -> CryptoFlags {
        CryptoFlags::USE_CBC
    }

    fn aes_key(fill: u8) -> CipherKey {
        CipherKey::create(&RIJNDAEL, 16, 32, &[fill; 32]).unwrap()
    }

    fn sample_sector(filler: u8) -> Sector {
        let mut sector = Sector::zeroed();
        sector.as_mut_bytes()[..RANDOM_SIZE].fill(filler);
        for (i, b) in sector.payload_mut().iter_mut().enumerate() {
            *b = (i % 7) as u8;
        }
        sector
    }

    /// Byte-wise XOR "cipher" with an arbitrary block size.
    struct XorBlocks {
        key: Vec<u8>,
        block_size: usize,
    }

    impl BlockCipher for XorBlocks {
        fn block_size(&self) -> usize {
            self.block_size
        }
        fn encrypt_block(&self, block: &mut [u8]) {
            for (i, b) in block.iter_mut().enumerate() {
                *b ^= self.key[i % self.key.len()];
            }
        }
        fn decrypt_block(&self, block: &mut [u8]) {
            self.encrypt_block(block);
        }
    }

    fn construct_xor(key: &[u8], block_size: usize) -> Result<Box<dyn BlockCipher>, CipherError> {
        Ok(Box::new(XorBlocks {
            key: key.to_vec(),
            block_size,
        }))
    }

    const XOR: CipherDescriptor = CipherDescriptor {
        id: "xor",
        description: "test only",
        key_sizes: &[8],
        block_sizes: &[8, 24],
        construct: construct_xor,
    };

    #[test]
    fn test_layout_sizes() {
        assert_eq!(RANDOM_SIZE + PAYLOAD_SIZE, SECTOR_SIZE);
        let sector = Sector::zeroed();
        assert_eq!(sector.random().len(), RANDOM_SIZE);
        assert_eq!(sector.payload().len(), PAYLOAD_SIZE);
    }

    #[test]
    fn test_roundtrip_cbc() {
        let key = aes_key(3);
        let original = sample_sector(0x5a);
        let mut sector = Sector::from_bytes(*original.as_bytes());

        encrypt_sector(&mut sector, &key, cbc()).unwrap();
        assert_ne!(sector.as_bytes(), original.as_bytes());
        decrypt_sector(&mut sector, &key, cbc()).unwrap();
        assert_eq!(sector.as_bytes(), original.as_bytes());
    }

    #[test]
    fn test_roundtrip_without_cbc() {
        let key = aes_key(9);
        let original = sample_sector(0x11);
        let mut sector = Sector::from_bytes(*original.as_bytes());

        encrypt_sector(&mut sector, &key, CryptoFlags::empty()).unwrap();
        decrypt_sector(&mut sector, &key, CryptoFlags::empty()).unwrap();
        assert_eq!(sector.as_bytes(), original.as_bytes());
    }

    #[test]
    fn test_cbc_filler_changes_every_block() {
        let key = aes_key(1);
        let mut a = sample_sector(0x00);
        let mut b = sample_sector(0x01);

        encrypt_sector(&mut a, &key, cbc()).unwrap();
        encrypt_sector(&mut b, &key, cbc()).unwrap();

        for (block_a, block_b) in a.as_bytes().chunks(16).zip(b.as_bytes().chunks(16)) {
            assert_ne!(block_a, block_b);
        }
    }

    #[test]
    fn test_without_cbc_payload_blocks_repeat() {
        // Only the filler blocks differ when blocks are not chained.
        let key = aes_key(1);
        let mut a = sample_sector(0x00);
        let mut b = sample_sector(0x01);

        encrypt_sector(&mut a, &key, CryptoFlags::empty()).unwrap();
        encrypt_sector(&mut b, &key, CryptoFlags::empty()).unwrap();

        assert_ne!(a.random(), b.random());
        assert_eq!(a.payload(), b.payload());
    }

    #[test]
    fn test_wrong_key_yields_garbage_not_error() {
        let original = sample_sector(0x42);
        let mut sector = Sector::from_bytes(*original.as_bytes());

        encrypt_sector(&mut sector, &aes_key(1), cbc()).unwrap();
        decrypt_sector(&mut sector, &aes_key(2), cbc())
            .expect("decryption status is advisory");
        assert_ne!(sector.payload(), original.payload());
    }

    #[test]
    fn test_fill_random_only_touches_filler() {
        let mut sector = Sector::zeroed();
        sector.fill_random(&mut rand::thread_rng());
        assert!(sector.payload().iter().all(|&b| b == 0));
        // 2^-128 chance of a false failure
        assert_ne!(sector.random(), &[0u8; RANDOM_SIZE]);
    }

    #[test]
    fn test_eight_byte_blocks() {
        let key = CipherKey::create(&XOR, 8, 8, b"8bytekey").unwrap();
        let original = sample_sector(0x77);
        let mut sector = Sector::from_bytes(*original.as_bytes());

        encrypt_sector(&mut sector, &key, cbc()).unwrap();
        decrypt_sector(&mut sector, &key, cbc()).unwrap();
        assert_eq!(sector.as_bytes(), original.as_bytes());
    }

    #[test]
    fn test_block_size_must_divide_sector() {
        let key = CipherKey::create(&XOR, 24, 8, b"8bytekey").unwrap();
        let mut sector = Sector::zeroed();

        let err = encrypt_sector(&mut sector, &key, cbc()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter(_)));
        let err = decrypt_sector(&mut sector, &key, cbc()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter(_)));
    }
}
