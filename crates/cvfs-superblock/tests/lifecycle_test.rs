//! Integration tests for the superblock lifecycle.
//!
//! Every test works on a fresh temporary directory used as the volume
//! base path, with the built-in cipher registry and either the local
//! volume engine or a recording engine that can be told to fail.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use secrecy::SecretString;
use tempfile::TempDir;

use cvfs_core::{CoreError, CoreResult, CryptoFlags, VolumeParms};
use cvfs_crypto::{CipherKey, CipherRegistry};
use cvfs_superblock::{
    CreateOptions, LocalVolumeEngine, SaveMode, Superblock, Volume, VolumeEngine,
    ENCRYPTED_DESCRIPTOR_NAME, LABEL_SIZE, MAX_PATH_LEN, PLAIN_DESCRIPTOR_NAME, SUPERBLOCK_MAGIC,
    SUPERBLOCK_VERSION,
};

const PASSPHRASE: &str = "lifecycle test passphrase";

fn passphrase() -> SecretString {
    SecretString::from(PASSPHRASE)
}

fn base(tmp: &TempDir) -> String {
    format!("{}/", tmp.path().display())
}

fn cbc_parms() -> VolumeParms {
    VolumeParms {
        read_only: false,
        crypto_flags: CryptoFlags::USE_CBC,
    }
}

fn options() -> CreateOptions {
    CreateOptions {
        cipher: "rijndael-256-128".into(),
        use_cbc: true,
        root_id: 17,
        flags: 0x0000_0102,
        label: "archive".into(),
        description: "cold storage for old projects".into(),
    }
}

fn create(tmp: &TempDir, options: &CreateOptions) -> Superblock {
    Superblock::create(
        &base(tmp),
        &passphrase(),
        &CipherRegistry::builtin(),
        VolumeParms::default(),
        options,
        &LocalVolumeEngine,
    )
    .expect("create superblock")
}

fn open_with(tmp: &TempDir, phrase: &str, parms: VolumeParms) -> CoreResult<cvfs_superblock::Opened> {
    Superblock::open(
        &base(tmp),
        &SecretString::from(phrase.to_string()),
        &CipherRegistry::builtin(),
        parms,
        &LocalVolumeEngine,
    )
}

fn read(tmp: &TempDir, name: &str) -> Vec<u8> {
    std::fs::read(tmp.path().join(name)).expect("read descriptor file")
}

/// Engine that counts attaches and detaches and can be told to fail either.
#[derive(Default)]
struct RecordingEngine {
    attaches: AtomicUsize,
    detaches: Arc<AtomicUsize>,
    fail_attach: bool,
    fail_detach: Arc<AtomicBool>,
}

struct RecordingVolume {
    parms: VolumeParms,
    detaches: Arc<AtomicUsize>,
    fail_detach: Arc<AtomicBool>,
}

impl VolumeEngine for RecordingEngine {
    fn attach(
        &self,
        _base_path: &str,
        _key: &CipherKey,
        parms: &VolumeParms,
    ) -> CoreResult<Box<dyn Volume>> {
        if self.fail_attach {
            return Err(CoreError::InvalidParameter("engine offline".into()));
        }
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingVolume {
            parms: parms.clone(),
            detaches: Arc::clone(&self.detaches),
            fail_detach: Arc::clone(&self.fail_detach),
        }))
    }
}

impl Volume for RecordingVolume {
    fn parms(&self) -> &VolumeParms {
        &self.parms
    }

    fn detach(&mut self) -> CoreResult<()> {
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(CoreError::storage(
                "/dev/volume",
                std::io::Error::other("device busy"),
            ));
        }
        self.detaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn create_then_open_roundtrip() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();

    let opened = open_with(&tmp, PASSPHRASE, VolumeParms::default()).unwrap();
    assert!(opened.is_usable(), "status: {:?}", opened.status);

    let sb = opened.into_result().unwrap();
    assert_eq!(sb.magic(), SUPERBLOCK_MAGIC);
    assert_eq!(sb.version(), SUPERBLOCK_VERSION);
    assert_eq!(sb.flags(), 0x0000_0102);
    assert_eq!(sb.root_id(), 17);
    assert_eq!(sb.label(), "archive");
    assert_eq!(sb.description(), "cold storage for old projects");
    assert_eq!(sb.key().spec_string(), "rijndael-256-128");
    assert!(sb.parms().crypto_flags.use_cbc());
    sb.close().unwrap();
}

#[test]
fn plaintext_descriptor_format() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();

    assert_eq!(
        String::from_utf8(read(&tmp, PLAIN_DESCRIPTOR_NAME)).unwrap(),
        "cipher: rijndael-256-128\nuse-cbc: 1\n"
    );
    assert_eq!(read(&tmp, ENCRYPTED_DESCRIPTOR_NAME).len(), 512);
}

#[test]
fn labels_at_and_beyond_field_width() {
    let tmp = TempDir::new().unwrap();
    let exact = "e".repeat(LABEL_SIZE - 1);
    let opts = CreateOptions {
        label: exact.clone(),
        description: "kept\0dropped after nul".into(),
        ..options()
    };
    create(&tmp, &opts).close().unwrap();

    let sb = open_with(&tmp, PASSPHRASE, VolumeParms::default())
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(sb.label(), exact);
    assert_eq!(sb.description(), "kept");
    drop(sb);

    let opts = CreateOptions {
        label: "o".repeat(LABEL_SIZE + 5),
        ..options()
    };
    create(&tmp, &opts).close().unwrap();
    let sb = open_with(&tmp, PASSPHRASE, VolumeParms::default())
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(sb.label(), "o".repeat(LABEL_SIZE - 1));
}

#[test]
fn wrong_passphrase_reports_bad_superblock() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();

    for i in 0..16 {
        let opened = open_with(&tmp, &format!("not the passphrase {i}"), VolumeParms::default())
            .expect("plaintext half is fine, object must come back");
        assert!(
            matches!(opened.status, Err(CoreError::BadSuperblock { .. })),
            "attempt {i}: {:?}",
            opened.status
        );
        assert_ne!(opened.superblock.magic(), SUPERBLOCK_MAGIC);
    }
}

#[test]
fn unknown_cipher_is_fatal_and_attaches_nothing() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join(PLAIN_DESCRIPTOR_NAME),
        "cipher: serpent-256-128\nuse-cbc: 1\n",
    )
    .unwrap();
    let engine = RecordingEngine::default();

    let err = Superblock::open(
        &base(&tmp),
        &passphrase(),
        &CipherRegistry::builtin(),
        VolumeParms::default(),
        &engine,
    )
    .unwrap_err();

    assert!(matches!(err, CoreError::UnknownCipher(ref id) if id == "serpent"), "{err:?}");
    assert_eq!(engine.attaches.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_cipher_line_is_unknown_cipher() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join(PLAIN_DESCRIPTOR_NAME), "use-cbc: 1\n").unwrap();

    let err = open_with(&tmp, PASSPHRASE, VolumeParms::default()).unwrap_err();
    assert!(matches!(err, CoreError::UnknownCipher(ref id) if id.is_empty()));
}

#[test]
fn missing_plaintext_descriptor_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let err = open_with(&tmp, PASSPHRASE, VolumeParms::default()).unwrap_err();
    assert!(matches!(err, CoreError::Storage { .. }), "{err:?}");
}

#[test]
fn overlong_base_path_fails_before_io() {
    let tmp = TempDir::new().unwrap();
    let long = format!("{}{}", base(&tmp), "p".repeat(MAX_PATH_LEN));
    let engine = RecordingEngine::default();

    let err = Superblock::open(
        &long,
        &passphrase(),
        &CipherRegistry::builtin(),
        VolumeParms::default(),
        &engine,
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::InvalidParameter(_)), "{err:?}");

    let err = Superblock::create(
        &long,
        &passphrase(),
        &CipherRegistry::builtin(),
        VolumeParms::default(),
        &options(),
        &engine,
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::InvalidParameter(_)), "{err:?}");

    assert_eq!(engine.attaches.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn attach_failure_is_fatal() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();
    let engine = RecordingEngine {
        fail_attach: true,
        ..RecordingEngine::default()
    };

    let err = Superblock::open(
        &base(&tmp),
        &passphrase(),
        &CipherRegistry::builtin(),
        VolumeParms::default(),
        &engine,
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::InvalidParameter(_)));
}

#[test]
fn failed_detach_keeps_superblock_for_retry() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();
    let engine = RecordingEngine::default();
    engine.fail_detach.store(true, Ordering::SeqCst);

    let sb = Superblock::open(
        &base(&tmp),
        &passphrase(),
        &CipherRegistry::builtin(),
        VolumeParms::default(),
        &engine,
    )
    .unwrap()
    .into_result()
    .unwrap();

    let err = sb.close().unwrap_err();
    assert!(matches!(err.error, CoreError::Storage { .. }));
    assert_eq!(engine.detaches.load(Ordering::SeqCst), 0);

    let sb = err.superblock;
    assert_eq!(sb.root_id(), 17, "superblock must survive a failed close");
    assert!(sb.volume().is_some());

    engine.fail_detach.store(false, Ordering::SeqCst);
    sb.close().unwrap();
    assert_eq!(engine.detaches.load(Ordering::SeqCst), 1);
}

#[test]
fn drop_detaches_volume() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();
    let engine = RecordingEngine::default();

    let opened = Superblock::open(
        &base(&tmp),
        &passphrase(),
        &CipherRegistry::builtin(),
        VolumeParms::default(),
        &engine,
    )
    .unwrap();
    drop(opened);

    assert_eq!(engine.attaches.load(Ordering::SeqCst), 1);
    assert_eq!(engine.detaches.load(Ordering::SeqCst), 1);
}

#[test]
fn read_only_save_leaves_files_untouched() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();
    let plain_before = read(&tmp, PLAIN_DESCRIPTOR_NAME);
    let encrypted_before = read(&tmp, ENCRYPTED_DESCRIPTOR_NAME);

    let mut sb = open_with(&tmp, PASSPHRASE, VolumeParms::read_only())
        .unwrap()
        .into_result()
        .unwrap();
    sb.set_label("changed");

    for mode in [SaveMode::Full, SaveMode::EncryptedOnly] {
        let err = sb.save(mode).unwrap_err();
        assert!(matches!(err, CoreError::ReadOnly));
    }

    assert_eq!(read(&tmp, PLAIN_DESCRIPTOR_NAME), plain_before);
    assert_eq!(read(&tmp, ENCRYPTED_DESCRIPTOR_NAME), encrypted_before);
}

#[test]
fn encrypted_only_save_keeps_plaintext_descriptor() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();

    let hand_edited = "# edited by hand\ncipher: rijndael-256-128\nuse-cbc: 1\nmirror: off\n";
    std::fs::write(tmp.path().join(PLAIN_DESCRIPTOR_NAME), hand_edited).unwrap();

    let mut sb = open_with(&tmp, PASSPHRASE, VolumeParms::default())
        .unwrap()
        .into_result()
        .unwrap();
    sb.set_label("relabelled");
    sb.save(SaveMode::EncryptedOnly).unwrap();
    assert_eq!(read(&tmp, PLAIN_DESCRIPTOR_NAME), hand_edited.as_bytes());

    sb.save(SaveMode::Full).unwrap();
    assert_eq!(
        read(&tmp, PLAIN_DESCRIPTOR_NAME),
        b"cipher: rijndael-256-128\nuse-cbc: 1\n"
    );
    sb.close().unwrap();

    let sb = open_with(&tmp, PASSPHRASE, VolumeParms::default())
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(sb.label(), "relabelled");
}

#[test]
fn every_save_changes_ciphertext() {
    let tmp = TempDir::new().unwrap();
    let mut sb = create(&tmp, &options());

    let first = read(&tmp, ENCRYPTED_DESCRIPTOR_NAME);
    sb.save(SaveMode::EncryptedOnly).unwrap();
    let second = read(&tmp, ENCRYPTED_DESCRIPTOR_NAME);
    assert_ne!(first, second);
}

#[test]
fn cbc_setting_comes_from_plaintext_descriptor() {
    let tmp = TempDir::new().unwrap();
    let opts = CreateOptions {
        use_cbc: false,
        ..options()
    };
    create(&tmp, &opts).close().unwrap();
    assert_eq!(
        read(&tmp, PLAIN_DESCRIPTOR_NAME),
        b"cipher: rijndael-256-128\nuse-cbc: 0\n"
    );

    // Caller asks for CBC, the descriptor says otherwise.
    let sb = open_with(&tmp, PASSPHRASE, cbc_parms())
        .unwrap()
        .into_result()
        .unwrap();
    assert!(!sb.parms().crypto_flags.use_cbc());
}

#[test]
fn missing_cbc_line_keeps_caller_flag() {
    let tmp = TempDir::new().unwrap();
    create(&tmp, &options()).close().unwrap();
    std::fs::write(
        tmp.path().join(PLAIN_DESCRIPTOR_NAME),
        "cipher: rijndael-256-128\n",
    )
    .unwrap();

    let opened = open_with(&tmp, PASSPHRASE, cbc_parms()).unwrap();
    assert!(opened.is_usable());

    // Without CBC the sector written in CBC mode decrypts to garbage.
    let opened = open_with(&tmp, PASSPHRASE, VolumeParms::default()).unwrap();
    assert!(matches!(opened.status, Err(CoreError::BadSuperblock { .. })));
}

#[test]
fn other_key_sizes_roundtrip() {
    for cipher in ["rijndael-128-128", "rijndael-192-128"] {
        let tmp = TempDir::new().unwrap();
        let opts = CreateOptions {
            cipher: cipher.into(),
            ..options()
        };
        create(&tmp, &opts).close().unwrap();

        let sb = open_with(&tmp, PASSPHRASE, VolumeParms::default())
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(sb.key().spec_string(), cipher);
        assert_eq!(sb.root_id(), 17);
    }
}

#[test]
fn unsupported_key_size_is_misc_cipher() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join(PLAIN_DESCRIPTOR_NAME),
        "cipher: rijndael-512-128\nuse-cbc: 1\n",
    )
    .unwrap();

    let err = open_with(&tmp, PASSPHRASE, VolumeParms::default()).unwrap_err();
    assert!(matches!(err, CoreError::MiscCipher(_)), "{err:?}");
}
