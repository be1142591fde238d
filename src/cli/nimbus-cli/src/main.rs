//! Nimbus CLI - local key store and end-to-end encrypted sessions.

use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nimbus_crypto::{Algorithm, PublicKey};
use nimbus_keys::{KeyPolicy, KeyStore};
use nimbus_seal::{InitOptions, KdfParams, RecoveryConfig, RecoveryShare, SealManager, SealStatus};
use nimbus_session::{accept, initiate, Envelope, HandshakeInit, SessionConfig, SessionId};
use nimbus_storage_sqlite::SqliteBackend;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SYSTEM_NAMESPACE: &str = "system";
const KEYS_NAMESPACE: &str = "keys";
const ACTOR: &str = "nimbus-cli";

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(about = "Nimbus CLI - Manage keys, identities and encrypted sessions")]
#[command(version)]
struct Cli {
    /// Data directory
    #[arg(long, default_value = ".nimbus", env = "NIMBUS_DATA_DIR")]
    data_dir: PathBuf,

    /// Passphrase protecting the master key (prompted if not set)
    #[arg(long, env = "NIMBUS_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new data directory
    Init {
        /// Number of recovery shares (requires --recovery-threshold)
        #[arg(long, requires = "recovery_threshold")]
        recovery_shares: Option<u8>,
        /// Recovery shares required to restore access
        #[arg(long, requires = "recovery_shares")]
        recovery_threshold: Option<u8>,
        /// Argon2id memory cost in KiB
        #[arg(long, default_value = "19456")]
        kdf_memory_kib: u32,
        /// Argon2id passes
        #[arg(long, default_value = "2")]
        kdf_iterations: u32,
        /// Argon2id parallelism
        #[arg(long, default_value = "1")]
        kdf_parallelism: u32,
    },
    /// Show seal status
    Status,
    /// Restore access with recovery shares and set a new passphrase
    Recover {
        /// Recovery share (hex); repeat until the threshold is reached
        #[arg(long = "share", required = true)]
        shares: Vec<String>,
        /// New passphrase
        #[arg(long, env = "NIMBUS_NEW_PASSPHRASE", hide_env_values = true)]
        new_passphrase: Option<String>,
    },
    /// Named key management
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Encrypt data under a named key
    Encrypt {
        /// Key name
        #[arg(long)]
        key: String,
        /// Context bound to the ciphertext
        #[arg(long, default_value = "")]
        context: String,
        /// Plaintext (read from stdin if not provided)
        plaintext: Option<String>,
    },
    /// Decrypt data produced by `encrypt`
    Decrypt {
        /// Key name
        #[arg(long)]
        key: String,
        /// Context given at encryption
        #[arg(long, default_value = "")]
        context: String,
        /// Ciphertext (read from stdin if not provided)
        ciphertext: Option<String>,
    },
    /// X25519 identity management
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },
    /// End-to-end encrypted sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Create a key
    Create {
        /// Key name
        name: String,
        /// AEAD algorithm (xchacha20-poly1305, aes256-gcm)
        #[arg(long, default_value = "xchacha20-poly1305")]
        algorithm: Algorithm,
        /// Automatic rotation period in seconds
        #[arg(long)]
        rotation_period: Option<u64>,
        /// Allow the key to be deleted
        #[arg(long)]
        deletable: bool,
    },
    /// List keys
    List,
    /// Show key metadata and versions
    Info {
        /// Key name
        name: String,
    },
    /// Rotate a key
    Rotate {
        /// Key name
        name: String,
    },
    /// Rotate every key whose rotation period has elapsed
    RotateDue,
    /// Destroy the material of one key version
    DestroyVersion {
        /// Key name
        name: String,
        /// Version to destroy
        version: u32,
    },
    /// Delete a key and all of its versions
    Delete {
        /// Key name
        name: String,
    },
}

#[derive(Subcommand)]
enum IdentityCommands {
    /// Create an identity
    Create {
        /// Identity name
        name: String,
    },
    /// Show an identity's public key
    Show {
        /// Identity name
        name: String,
    },
    /// List identities
    List,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Start a session with a peer and print the handshake to send them
    Initiate {
        /// Local identity
        #[arg(long)]
        identity: String,
        /// Peer public key (base64)
        #[arg(long)]
        peer: String,
    },
    /// Accept a handshake received from a peer
    Accept {
        /// Local identity
        #[arg(long)]
        identity: String,
        /// Handshake (base64)
        handshake: String,
    },
    /// Encrypt a message for a session
    Send {
        /// Session id (hex)
        session: String,
        /// Message (read from stdin if not provided)
        message: Option<String>,
    },
    /// Decrypt an envelope received from a peer
    Receive {
        /// Envelope (base64; read from stdin if not provided)
        envelope: Option<String>,
    },
    /// List sessions
    List,
    /// Close a session and erase its state
    Close {
        /// Session id (hex)
        session: String,
    },
}

// ============================================================================
// Local store
// ============================================================================

async fn open_seal(data_dir: &Path) -> Result<SealManager> {
    let storage = SqliteBackend::open(data_dir, SYSTEM_NAMESPACE)
        .await
        .context("Failed to open system database")?
        .with_actor(ACTOR);
    SealManager::open(Arc::new(storage))
        .await
        .context("Failed to load seal state")
}

async fn open_keys(data_dir: &Path, seal: &SealManager) -> Result<KeyStore> {
    let master_key = seal.master_key().context("Store is sealed")?.clone();
    let storage = SqliteBackend::open(data_dir, KEYS_NAMESPACE)
        .await
        .context("Failed to open key database")?
        .with_actor(ACTOR);
    Ok(KeyStore::new(Arc::new(storage), master_key))
}

/// Unseals with the passphrase and opens the key store.
async fn open_store(data_dir: &Path, passphrase: Option<&str>) -> Result<KeyStore> {
    let mut seal = open_seal(data_dir).await?;
    debug!(data_dir = %data_dir.display(), status = %seal.status(), "Opening key store");
    if seal.status() == SealStatus::Uninitialized {
        bail!(
            "{} is not initialized. Run `nimbus init` first",
            data_dir.display()
        );
    }

    let passphrase = read_secret(passphrase, "Passphrase: ")?;
    seal.unseal(&passphrase).context("Unseal failed")?;
    let store = open_keys(data_dir, &seal).await?;
    seal.seal();

    Ok(store)
}

fn read_secret(value: Option<&str>, prompt: &str) -> Result<String> {
    let secret = match value {
        Some(v) => v.to_string(),
        None => {
            eprint!("{prompt}");
            io::stderr().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        },
    };

    if secret.is_empty() {
        bail!("Passphrase cannot be empty");
    }
    Ok(secret)
}

fn read_input(value: Option<String>) -> Result<Vec<u8>> {
    match value {
        Some(v) => Ok(v.into_bytes()),
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        },
    }
}

fn read_text(value: Option<String>) -> Result<String> {
    let bytes = read_input(value)?;
    let text = String::from_utf8(bytes).context("Input is not valid UTF-8")?;
    Ok(text.trim().to_string())
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn cmd_init(
    data_dir: &Path,
    passphrase: Option<&str>,
    recovery: Option<RecoveryConfig>,
    kdf: KdfParams,
) -> Result<()> {
    let mut seal = open_seal(data_dir).await?;
    if seal.status() != SealStatus::Uninitialized {
        bail!("{} is already initialized", data_dir.display());
    }

    let passphrase = read_secret(passphrase, "New passphrase: ")?;
    let result = seal
        .initialize(&passphrase, InitOptions { kdf, recovery })
        .await
        .context("Initialization failed")?;

    println!("Nimbus initialized in {}", data_dir.display());

    if let Some(config) = recovery {
        println!();
        println!("Recovery Shares (hex):");
        for (i, share) in result.shares.iter().enumerate() {
            println!("  Share {}: {}", i + 1, share.to_hex());
        }
        println!();
        println!(
            "IMPORTANT: Store these shares separately. Any {} of {} restore access.",
            config.threshold, config.shares
        );
    }

    Ok(())
}

async fn cmd_status(data_dir: &Path) -> Result<()> {
    let seal = open_seal(data_dir).await?;

    println!("Nimbus status:");
    println!("  Data dir:    {}", data_dir.display());
    println!("  Seal:        {}", seal.status());
    if let Some(at) = seal.initialized_at() {
        println!("  Initialized: {at}");
    }
    match seal.recovery_config() {
        Some(config) => println!(
            "  Recovery:    {} of {} shares",
            config.threshold, config.shares
        ),
        None => println!("  Recovery:    not configured"),
    }

    Ok(())
}

async fn cmd_recover(data_dir: &Path, shares: &[String], new_passphrase: Option<&str>) -> Result<()> {
    let mut seal = open_seal(data_dir).await?;

    let mut progress = None;
    for encoded in shares {
        let share = RecoveryShare::from_hex(encoded).context("Invalid recovery share")?;
        progress = Some(
            seal.submit_recovery_share(&share)
                .context("Recovery failed")?,
        );
    }

    if let Some(p) = progress.filter(|p| p.sealed) {
        bail!(
            "Recovery incomplete: {}/{} shares provided",
            p.progress,
            p.threshold
        );
    }

    let passphrase = read_secret(new_passphrase, "New passphrase: ")?;
    seal.change_passphrase(&passphrase)
        .await
        .context("Failed to set new passphrase")?;
    seal.seal();

    println!("Access restored. The passphrase has been replaced.");

    Ok(())
}

async fn cmd_key(store: &KeyStore, command: KeyCommands) -> Result<()> {
    match command {
        KeyCommands::Create {
            name,
            algorithm,
            rotation_period,
            deletable,
        } => {
            let mut policy = KeyPolicy::new().with_algorithm(algorithm);
            if let Some(secs) = rotation_period {
                policy = policy.with_rotation_period(Duration::from_secs(secs));
            }
            if deletable {
                policy = policy.deletable();
            }
            let key = store.create_key(&name, policy).await?;
            println!("Key '{}' created ({})", key.name, key.policy.algorithm);
        },
        KeyCommands::List => {
            let keys = store.list_keys().await?;
            if keys.is_empty() {
                println!("No keys found");
            } else {
                println!("Keys:");
                for key in &keys {
                    println!("  {key}");
                }
            }
        },
        KeyCommands::Info { name } => {
            let key = store.get_key(&name).await?;
            println!("Key '{}':", key.name);
            println!("  Algorithm:          {}", key.policy.algorithm);
            println!("  Latest version:     {}", key.latest_version);
            println!("  Min decryption:     {}", key.min_decryption_version);
            println!("  Deletion allowed:   {}", key.policy.deletion_allowed);
            match key.policy.rotation_period {
                Some(period) => println!("  Rotation period:    {}s", period.as_secs()),
                None => println!("  Rotation period:    none"),
            }
            println!("  Versions:");
            for version in store.list_versions(&name).await? {
                println!("    v{:<4} {}", version.version, version.state);
            }
        },
        KeyCommands::Rotate { name } => {
            let version = store.rotate_key(&name).await?;
            println!("Key '{name}' rotated to version {version}");
        },
        KeyCommands::RotateDue => {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .context("System clock before UNIX epoch")?
                .as_secs();
            let rotated = store.rotate_due_keys(now).await?;
            if rotated.is_empty() {
                println!("No keys due for rotation");
            }
            for (name, version) in rotated {
                println!("Key '{name}' rotated to version {version}");
            }
        },
        KeyCommands::DestroyVersion { name, version } => {
            store.destroy_version(&name, version).await?;
            println!("Version {version} of key '{name}' destroyed");
        },
        KeyCommands::Delete { name } => {
            store.delete_key(&name).await?;
            println!("Key '{name}' deleted");
        },
    }

    Ok(())
}

async fn cmd_encrypt(store: &KeyStore, key: &str, context: &str, plaintext: Vec<u8>) -> Result<()> {
    let ciphertext = store.encrypt(key, &plaintext, context.as_bytes()).await?;
    println!("{ciphertext}");
    Ok(())
}

async fn cmd_decrypt(store: &KeyStore, key: &str, context: &str, ciphertext: &str) -> Result<()> {
    let plaintext = store.decrypt(key, ciphertext, context.as_bytes()).await?;
    io::stdout().write_all(&plaintext)?;
    println!();
    Ok(())
}

async fn cmd_identity(store: &KeyStore, command: IdentityCommands) -> Result<()> {
    match command {
        IdentityCommands::Create { name } => {
            let identity = store.create_identity(&name).await?;
            println!("Identity '{}' created", identity.name);
            println!("  Public key:  {}", identity.public_key);
            println!("  Fingerprint: {}", identity.public_key.fingerprint());
        },
        IdentityCommands::Show { name } => {
            let identity = store.identity_public(&name).await?;
            println!("Identity '{}':", identity.name);
            println!("  Public key:  {}", identity.public_key);
            println!("  Fingerprint: {}", identity.public_key.fingerprint());
        },
        IdentityCommands::List => {
            let identities = store.list_identities().await?;
            if identities.is_empty() {
                println!("No identities found");
            } else {
                println!("Identities:");
                for name in &identities {
                    println!("  {name}");
                }
            }
        },
    }

    Ok(())
}

async fn cmd_session(store: &KeyStore, command: SessionCommands) -> Result<()> {
    let config = SessionConfig::default();

    match command {
        SessionCommands::Initiate { identity, peer } => {
            let local = store.load_identity(&identity).await?;
            let peer = PublicKey::from_base64(&peer).context("Invalid peer public key")?;
            let (session, init) = initiate(&local, &peer, config)?;
            store.create_session(&identity, &session).await?;

            println!("Session: {}", session.id());
            println!("Handshake (send to peer):");
            println!("{}", init.to_base64()?);
        },
        SessionCommands::Accept {
            identity,
            handshake,
        } => {
            let local = store.load_identity(&identity).await?;
            let init = HandshakeInit::from_base64(&handshake).context("Invalid handshake")?;
            let session = accept(&local, &init, config)?;
            store.create_session(&identity, &session).await?;

            println!("Session: {}", session.id());
            println!("Peer fingerprint: {}", session.remote_identity().fingerprint());
        },
        SessionCommands::Send { session, message } => {
            let id: SessionId = session.parse().context("Invalid session id")?;
            let info = store.session_info(&id).await?;
            let message = read_input(message)?;

            let mut session = store.load_session(&id, config).await?;
            let envelope = session.encrypt(&message)?;
            store.save_session(&info.identity, &session).await?;

            println!("{}", envelope.to_base64()?);
        },
        SessionCommands::Receive { envelope } => {
            let envelope =
                Envelope::from_base64(&read_text(envelope)?).context("Invalid envelope")?;
            let id = *envelope.session_id();
            let info = store.session_info(&id).await?;

            let mut session = store.load_session(&id, config).await?;
            let plaintext = session.decrypt(&envelope)?;
            store.save_session(&info.identity, &session).await?;

            io::stdout().write_all(&plaintext)?;
            println!();
        },
        SessionCommands::List => {
            let sessions = store.list_sessions().await?;
            if sessions.is_empty() {
                println!("No sessions found");
            } else {
                println!("Sessions:");
                for s in &sessions {
                    println!(
                        "  {}  {:<10} {} -> {}",
                        s.id,
                        s.role,
                        s.identity,
                        s.peer.fingerprint()
                    );
                }
            }
        },
        SessionCommands::Close { session } => {
            let id: SessionId = session.parse().context("Invalid session id")?;
            let mut state = store.load_session(&id, config).await?;
            state.close();
            store.delete_session(&id).await?;
            println!("Session {id} closed");
        },
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.as_path();
    let passphrase = cli.passphrase.as_deref();

    match cli.command {
        Commands::Init {
            recovery_shares,
            recovery_threshold,
            kdf_memory_kib,
            kdf_iterations,
            kdf_parallelism,
        } => {
            let recovery = match (recovery_shares, recovery_threshold) {
                (Some(shares), Some(threshold)) => Some(RecoveryConfig { shares, threshold }),
                _ => None,
            };
            let kdf = KdfParams {
                memory_kib: kdf_memory_kib,
                iterations: kdf_iterations,
                parallelism: kdf_parallelism,
            };
            cmd_init(data_dir, passphrase, recovery, kdf).await
        },
        Commands::Status => cmd_status(data_dir).await,
        Commands::Recover {
            shares,
            new_passphrase,
        } => cmd_recover(data_dir, &shares, new_passphrase.as_deref()).await,
        Commands::Key { command } => {
            let store = open_store(data_dir, passphrase).await?;
            cmd_key(&store, command).await
        },
        Commands::Encrypt {
            key,
            context,
            plaintext,
        } => {
            let plaintext = read_input(plaintext)?;
            let store = open_store(data_dir, passphrase).await?;
            cmd_encrypt(&store, &key, &context, plaintext).await
        },
        Commands::Decrypt {
            key,
            context,
            ciphertext,
        } => {
            let ciphertext = read_text(ciphertext)?;
            let store = open_store(data_dir, passphrase).await?;
            cmd_decrypt(&store, &key, &context, &ciphertext).await
        },
        Commands::Identity { command } => {
            let store = open_store(data_dir, passphrase).await?;
            cmd_identity(&store, command).await
        },
        Commands::Session { command } => {
            let store = open_store(data_dir, passphrase).await?;
            cmd_session(&store, command).await
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    run(Cli::parse()).await
}
