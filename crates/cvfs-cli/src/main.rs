//! cvfs: crypted volume superblock tool
//!
//! Commands:
//!   create <base>          - write a new superblock (plaintext + encrypted descriptor)
//!   info <base>            - show the decoded superblock, even when damaged
//!   label <base> <label>   - change label/description
//!   check <base>           - validate; --repair backs up and rewrites the encrypted descriptor
//!   config show            - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde::Serialize;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use cvfs_core::config::CvfsConfig;
use cvfs_core::{CoreError, VolumeParms};
use cvfs_crypto::CipherRegistry;
use cvfs_superblock::{
    backup_encrypted, descriptor_path, CreateOptions, LocalVolumeEngine, Opened, SaveMode,
    Superblock, PLAIN_DESCRIPTOR_NAME,
};

/// Environment variable consulted before prompting for a passphrase.
const PASSPHRASE_ENV: &str = "CVFS_PASSPHRASE";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cvfs",
    version,
    about = "Crypted volume superblock tool",
    long_about = "cvfs: create, inspect, relabel and repair encrypted volume superblocks"
)]
struct Cli {
    /// Path to cvfs.toml configuration file
    #[arg(long, short = 'c', env = "CVFS_CONFIG", default_value = "/etc/cvfs/config.toml")]
    config: PathBuf,

    /// Open volumes read-only (overrides config)
    #[arg(long, global = true)]
    read_only: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a new superblock under BASE
    ///
    /// BASE is a prefix: `/srv/vol/` yields /srv/vol/superblock.txt and
    /// /srv/vol/superblock.bin.
    Create {
        base: String,
        /// Cipher spec, <id>-<keyBits>-<blockBits> (default from config)
        #[arg(long)]
        cipher: Option<String>,
        /// Encipher sector blocks independently instead of chaining them
        #[arg(long)]
        no_cbc: bool,
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Root directory id (default from config)
        #[arg(long)]
        root_id: Option<u32>,
        /// Overwrite an existing superblock
        #[arg(long)]
        force: bool,
    },

    /// Show the decoded superblock
    Info {
        base: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Change the volume label (and optionally the description)
    Label {
        base: String,
        label: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Validate the superblock; exits non-zero if it is not usable
    Check {
        base: String,
        /// Rewrite a damaged encrypted descriptor
        #[arg(long)]
        repair: bool,
        /// Root directory id to write when repairing (default from config)
        #[arg(long)]
        root_id: Option<u32>,
        /// Repair even if the sector may just be under a different passphrase
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CvfsConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;
    if cli.read_only {
        config.volume.read_only = true;
    }

    init_logging(&config.logging.level, LogFormat::from_config(&config.logging.format));
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "cvfs starting"
    );

    match cli.command {
        Commands::Create {
            base,
            cipher,
            no_cbc,
            label,
            description,
            root_id,
            force,
        } => {
            let options = CreateOptions {
                cipher: cipher.unwrap_or_else(|| config.volume.cipher.clone()),
                use_cbc: !no_cbc,
                root_id: root_id.unwrap_or(config.volume.root_id),
                flags: 0,
                label,
                description,
            };
            ensure_absent(&base, force)?;
            let passphrase = read_passphrase(true)?;
            cmd_create(&config, &base, &passphrase, &options, force)
        }
        Commands::Info { base, json } => cmd_info(&config, &base, &read_passphrase(false)?, json),
        Commands::Label {
            base,
            label,
            description,
        } => cmd_label(
            &config,
            &base,
            &read_passphrase(false)?,
            &label,
            description.as_deref(),
        ),
        Commands::Check {
            base,
            repair,
            root_id,
            force,
        } => cmd_check(
            &config,
            &base,
            &read_passphrase(false)?,
            Repair {
                enabled: repair,
                force,
                root_id: root_id.unwrap_or(config.volume.root_id),
            },
        ),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_config(format: &str) -> Self {
        if format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout is reserved for command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Passphrase from `CVFS_PASSPHRASE`, else an interactive prompt.
fn read_passphrase(confirm: bool) -> Result<SecretString> {
    if let Ok(value) = std::env::var(PASSPHRASE_ENV) {
        return Ok(SecretString::from(value));
    }

    let first = Zeroizing::new(
        rpassword::prompt_password("Passphrase: ").context("reading passphrase")?,
    );
    if confirm {
        let second = Zeroizing::new(
            rpassword::prompt_password("Confirm passphrase: ").context("reading passphrase")?,
        );
        if *first != *second {
            anyhow::bail!("passphrases do not match");
        }
    }
    Ok(SecretString::from(first.as_str()))
}

fn open(base: &str, passphrase: &SecretString, parms: VolumeParms) -> Result<Opened> {
    let read_only = parms.read_only;
    let opened = Superblock::open(
        base,
        passphrase,
        &CipherRegistry::builtin(),
        parms,
        &LocalVolumeEngine,
    )
    .with_context(|| format!("opening superblock at {base}"))?;

    if let Err(e) = &opened.status {
        tracing::warn!(base, read_only, "superblock not usable: {e}");
    }
    Ok(opened)
}

fn close(superblock: Superblock) -> Result<()> {
    superblock
        .close()
        .map_err(|e| e.error)
        .context("closing superblock")
}

// ── `cvfs create` ─────────────────────────────────────────────────────────────

/// Refuse to overwrite an existing superblock unless `force` is set.
fn ensure_absent(base: &str, force: bool) -> Result<()> {
    let plain = descriptor_path(base, PLAIN_DESCRIPTOR_NAME)?;
    if plain.exists() && !force {
        anyhow::bail!(
            "superblock already exists at {} (use --force to overwrite)",
            plain.display()
        );
    }
    Ok(())
}

fn cmd_create(
    config: &CvfsConfig,
    base: &str,
    passphrase: &SecretString,
    options: &CreateOptions,
    force: bool,
) -> Result<()> {
    ensure_absent(base, force)?;
    let superblock = Superblock::create(
        base,
        passphrase,
        &CipherRegistry::builtin(),
        config.volume.parms(),
        options,
        &LocalVolumeEngine,
    )
    .with_context(|| format!("creating superblock at {base}"))?;

    println!("created superblock at {base}");
    println!("  cipher:  {}", superblock.key().spec_string());
    println!("  use-cbc: {}", u8::from(options.use_cbc));
    println!("  root id: {}", superblock.root_id());
    close(superblock)
}

// ── `cvfs info` ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InfoReport<'a> {
    base: &'a str,
    cipher: String,
    use_cbc: bool,
    read_only: bool,
    magic: String,
    version: u32,
    flags: u32,
    root_id: u32,
    label: &'a str,
    description: &'a str,
    usable: bool,
    status: String,
}

fn status_text(status: &Result<(), CoreError>) -> String {
    match status {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    }
}

fn cmd_info(config: &CvfsConfig, base: &str, passphrase: &SecretString, json: bool) -> Result<()> {
    let mut parms = config.volume.parms();
    parms.read_only = true;
    let (superblock, status) = open(base, passphrase, parms)?.into_parts();

    let report = InfoReport {
        base: superblock.base_path(),
        cipher: superblock.key().spec_string(),
        use_cbc: superblock.parms().crypto_flags.use_cbc(),
        read_only: config.volume.read_only,
        magic: format!("{:#010x}", superblock.magic()),
        version: superblock.version(),
        flags: superblock.flags(),
        root_id: superblock.root_id(),
        label: superblock.label(),
        description: superblock.description(),
        usable: status.is_ok(),
        status: status_text(&status),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing report")?
        );
    } else {
        println!("base:        {}", report.base);
        println!("cipher:      {}", report.cipher);
        println!("use-cbc:     {}", u8::from(report.use_cbc));
        println!("magic:       {}", report.magic);
        println!("version:     {}", report.version);
        println!("flags:       {:#010x}", report.flags);
        println!("root id:     {}", report.root_id);
        println!("label:       {}", report.label);
        println!("description: {}", report.description);
        println!("status:      {}", report.status);
    }
    close(superblock)
}

// ── `cvfs label` ──────────────────────────────────────────────────────────────

fn cmd_label(
    config: &CvfsConfig,
    base: &str,
    passphrase: &SecretString,
    label: &str,
    description: Option<&str>,
) -> Result<()> {
    let mut superblock = open(base, passphrase, config.volume.parms())?
        .into_result()
        .with_context(|| format!("superblock at {base} is damaged; run `cvfs check --repair`"))?;

    superblock.set_label(label);
    if let Some(description) = description {
        superblock.set_description(description);
    }
    superblock
        .save(SaveMode::EncryptedOnly)
        .context("saving superblock")?;

    println!("label: {}", superblock.label());
    close(superblock)
}

// ── `cvfs check` ──────────────────────────────────────────────────────────────

/// What `cvfs check` may do about an unusable superblock.
#[derive(Debug, Clone, Copy)]
struct Repair {
    enabled: bool,
    force: bool,
    root_id: u32,
}

fn cmd_check(
    config: &CvfsConfig,
    base: &str,
    passphrase: &SecretString,
    repair: Repair,
) -> Result<()> {
    let mut parms = config.volume.parms();
    if !repair.enabled {
        parms.read_only = true;
    }
    let (mut superblock, status) = open(base, passphrase, parms)?.into_parts();

    let error = match status {
        Ok(()) => {
            println!("{base}: ok");
            return close(superblock);
        }
        Err(e) => e,
    };
    println!("{base}: {error}");

    if !repair.enabled {
        close(superblock)?;
        anyhow::bail!("superblock at {base} is not usable");
    }
    match error {
        CoreError::BadVersion { found, .. } => {
            close(superblock)?;
            anyhow::bail!(
                "superblock version {found} was written by a newer cvfs; refusing to repair"
            );
        }
        // A full sector that fails the magic check is what a mistyped
        // passphrase looks like.
        CoreError::BadSuperblock { .. } if !repair.force => {
            close(superblock)?;
            anyhow::bail!(
                "encrypted descriptor at {base} does not decrypt with this passphrase; \
                 check the passphrase, or pass --force to overwrite it"
            );
        }
        _ => {}
    }

    let parms = superblock.parms().clone();
    if let Some(backup) = backup_encrypted(superblock.base_path(), &parms)
        .context("backing up encrypted descriptor")?
    {
        println!("{base}: previous sector saved to {}", backup.display());
    }

    // Nothing decoded from a damaged sector can be trusted.
    superblock.set_flags(0);
    superblock.set_root_id(repair.root_id);
    superblock.set_label("");
    superblock.set_description("");
    superblock
        .save(SaveMode::EncryptedOnly)
        .context("rewriting encrypted descriptor")?;

    tracing::info!(base, root_id = repair.root_id, "repaired superblock");
    println!("{base}: repaired (root id {})", repair.root_id);
    close(superblock)
}

// ── `cvfs config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &CvfsConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
