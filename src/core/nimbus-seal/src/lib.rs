//! # Nimbus Seal
//!
//! Protects the Nimbus master key at rest.
//!
//! The store has three states:
//! - **Uninitialized**: no master key exists yet
//! - **Sealed**: the master key is stored wrapped and is not in memory
//! - **Unsealed**: the master key is in memory and key stores can be opened
//!
//! ## Passphrase
//!
//! The master key is wrapped with AES-256-GCM under a key derived from the
//! passphrase with Argon2id.
//!
//! ## Recovery shares
//!
//! Optionally, the master key is split with Shamir's Secret Sharing. Any
//! `threshold` of the `shares` handed out at initialization unseal the store
//! without the passphrase.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;

use std::collections::HashSet;
use std::sync::Arc;

use argon2::{Argon2, Params, Version};
use blahaj::{Share as SharkShare, Sharks};
use hmac::{Hmac, Mac};
use nimbus_crypto::random::generate_bytes;
use nimbus_crypto::{aead, Algorithm, MasterKey, NimbusError, SymmetricKey};
use nimbus_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub use error::SealError;

type HmacSha256 = Hmac<Sha256>;

/// Storage key of the seal record.
const SEAL_RECORD: &str = "seal/record";

/// Domain separation tag for master key verification.
const SEAL_VERIFY_TAG: &[u8] = b"nimbus-seal-verify-v1";

/// AAD of the wrapped master key.
const MASTER_AAD: &[u8] = b"nimbus-seal-master-v1";

const RECORD_VERSION: u8 = 1;
const SALT_SIZE: usize = 16;
const KEK_SIZE: usize = 32;

/// Minimum passphrase length in characters.
pub const MIN_PASSPHRASE_CHARS: usize = 8;

/// State of the seal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealStatus {
    /// No master key has been created yet.
    Uninitialized,
    /// Initialized but sealed.
    Sealed,
    /// Master key is in memory.
    Unsealed,
}

impl std::fmt::Display for SealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Sealed => write!(f, "sealed"),
            Self::Unsealed => write!(f, "unsealed"),
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Validates the parameters against Argon2's limits.
    pub fn validate(&self) -> Result<(), SealError> {
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> Result<Argon2<'static>, SealError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEK_SIZE),
        )
        .map_err(|e| SealError::InvalidConfig(e.to_string()))?;
        Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Configuration for Shamir recovery shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Total number of shares to generate (N).
    pub shares: u8,
    /// Minimum shares required to unseal (M).
    pub threshold: u8,
}

impl RecoveryConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), SealError> {
        if self.threshold == 0 {
            return Err(SealError::InvalidConfig("threshold must be > 0".into()));
        }
        if self.shares < self.threshold {
            return Err(SealError::InvalidConfig(
                "shares must be >= threshold".into(),
            ));
        }
        Ok(())
    }
}

/// Options for [`SealManager::initialize`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Argon2id parameters for the passphrase.
    pub kdf: KdfParams,
    /// Recovery shares to create, if any.
    pub recovery: Option<RecoveryConfig>,
}

/// A single recovery share (given to a key holder).
///
/// The encoding carries the share index as its first byte.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryShare {
    data: Vec<u8>,
}

impl std::fmt::Debug for RecoveryShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryShare")
            .field("index", &self.index())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

impl RecoveryShare {
    /// Wraps an encoded share. Index 0 would be the secret itself.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, SealError> {
        if data.len() < 2 {
            return Err(SealError::InvalidShare("share too short".into()));
        }
        if data[0] == 0 {
            return Err(SealError::InvalidShare("share index 0".into()));
        }
        Ok(Self { data })
    }

    /// Share index.
    pub fn index(&self) -> u8 {
        self.data.first().copied().unwrap_or_default()
    }

    /// Encoded share, index byte first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Encodes the share as a hex string for display.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.data)
    }

    /// Decodes a share from a hex string.
    pub fn from_hex(encoded: &str) -> Result<Self, SealError> {
        let data = hex::decode(encoded.trim())
            .map_err(|_| SealError::InvalidShare("not a hex string".into()))?;
        Self::from_bytes(data)
    }
}

/// Result of initialization.
#[derive(Debug)]
pub struct InitResult {
    /// Recovery shares for key holders; empty without recovery.
    pub shares: Vec<RecoveryShare>,
}

/// Progress of a recovery unseal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsealProgress {
    /// Whether the store is still sealed.
    pub sealed: bool,
    /// Threshold required to unseal.
    pub threshold: u8,
    /// Number of shares submitted so far.
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealRecord {
    version: u8,
    initialized_at: u64,
    kdf: KdfParams,
    salt: String,
    wrapped_master: String,
    verifier: String,
    recovery: Option<RecoveryConfig>,
}

/// The Seal Manager handles locking and unlocking of the master key.
pub struct SealManager {
    storage: Arc<dyn StorageBackend>,
    status: SealStatus,
    record: Option<SealRecord>,
    master_key: Option<MasterKey>,
    pending_shares: Vec<SharkShare>,
    pending_indices: HashSet<u8>,
}

impl std::fmt::Debug for SealManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealManager")
            .field("status", &self.status)
            .field("pending_shares", &self.pending_shares.len())
            .finish_non_exhaustive()
    }
}

impl SealManager {
    /// Opens the seal stored in `storage`.
    pub async fn open(storage: Arc<dyn StorageBackend>) -> Result<Self, SealError> {
        let record: Option<SealRecord> = match storage.get(SEAL_RECORD).await? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        };

        if let Some(record) = &record {
            if record.version != RECORD_VERSION {
                return Err(SealError::CorruptState(format!(
                    "unsupported record version {}",
                    record.version
                )));
            }
        }

        let status = if record.is_some() {
            SealStatus::Sealed
        } else {
            SealStatus::Uninitialized
        };
        debug!(status = %status, "Seal status loaded");

        Ok(Self {
            storage,
            status,
            record,
            master_key: None,
            pending_shares: Vec::new(),
            pending_indices: HashSet::new(),
        })
    }

    /// Returns the current seal status.
    pub fn status(&self) -> SealStatus {
        self.status
    }

    /// Recovery configuration chosen at initialization.
    pub fn recovery_config(&self) -> Option<RecoveryConfig> {
        self.record.as_ref().and_then(|r| r.recovery)
    }

    /// Initialization timestamp (Unix seconds).
    pub fn initialized_at(&self) -> Option<u64> {
        self.record.as_ref().map(|r| r.initialized_at)
    }

    /// Creates the master key, wraps it under `passphrase` and optionally
    /// splits it into recovery shares. The store is left sealed.
    pub async fn initialize(
        &mut self,
        passphrase: &str,
        options: InitOptions,
    ) -> Result<InitResult, SealError> {
        if self.status != SealStatus::Uninitialized {
            return Err(SealError::AlreadyInitialized);
        }

        check_passphrase(passphrase)?;
        options.kdf.validate()?;
        if let Some(recovery) = &options.recovery {
            recovery.validate()?;
        }

        info!(
            recovery = options.recovery.is_some(),
            memory_kib = options.kdf.memory_kib,
            iterations = options.kdf.iterations,
            "Initializing seal"
        );

        let master_key = MasterKey::generate()?;
        let verifier = compute_verifier(master_key.as_bytes())?;

        let salt = generate_bytes(SALT_SIZE)?;
        let kek = derive_kek(passphrase, &salt, &options.kdf)?;
        let wrapped = aead::seal(Algorithm::Aes256Gcm, &kek, master_key.as_bytes(), MASTER_AAD)?;

        let shares = match options.recovery {
            Some(config) => Sharks(config.threshold)
                .dealer(master_key.as_bytes())
                .take(usize::from(config.shares))
                .map(|s| RecoveryShare { data: (&s).into() })
                .collect(),
            None => Vec::new(),
        };

        let record = SealRecord {
            version: RECORD_VERSION,
            initialized_at: now(),
            kdf: options.kdf,
            salt: hex::encode(&salt),
            wrapped_master: hex::encode(&wrapped),
            verifier: hex::encode(&verifier),
            recovery: options.recovery,
        };
        self.write_record(&record).await?;

        self.record = Some(record);
        self.status = SealStatus::Sealed;

        info!(shares = shares.len(), "Seal initialized");

        Ok(InitResult { shares })
    }

    /// Unseals with the passphrase.
    pub fn unseal(&mut self, passphrase: &str) -> Result<(), SealError> {
        self.ensure_sealed()?;
        let record = self.record()?;

        let salt = decode_field(&record.salt, "salt")?;
        let wrapped = decode_field(&record.wrapped_master, "wrapped master key")?;
        let verifier = decode_field(&record.verifier, "verifier")?;

        let kek = derive_kek(passphrase, &salt, &record.kdf)?;
        let secret = aead::open(&kek, &wrapped, MASTER_AAD).map_err(|_| {
            warn!("Unseal failed - wrong passphrase");
            SealError::InvalidPassphrase
        })?;

        if !verify_master(&secret, &verifier)? {
            return Err(SealError::CorruptState("verifier mismatch".into()));
        }

        self.finish_unseal(MasterKey::from_bytes(&secret)?);
        info!("Unsealed with passphrase");

        Ok(())
    }

    /// Submits a recovery share.
    pub fn submit_recovery_share(
        &mut self,
        share: &RecoveryShare,
    ) -> Result<UnsealProgress, SealError> {
        self.ensure_sealed()?;
        let threshold = self
            .record()?
            .recovery
            .ok_or(SealError::RecoveryNotConfigured)?
            .threshold;

        let index = share.index();
        if self.pending_indices.contains(&index) {
            return Err(SealError::DuplicateShare(index));
        }

        let shark_share = SharkShare::try_from(share.as_bytes())
            .map_err(|_| SealError::InvalidShare("malformed share data".into()))?;

        self.pending_shares.push(shark_share);
        self.pending_indices.insert(index);

        debug!(
            index = index,
            progress = self.pending_shares.len(),
            threshold = threshold,
            "Share submitted"
        );

        if self.pending_shares.len() >= usize::from(threshold) {
            self.reconstruct_master_key(threshold)?;
        }

        Ok(UnsealProgress {
            sealed: self.status == SealStatus::Sealed,
            threshold,
            progress: u8::try_from(self.pending_shares.len()).unwrap_or(u8::MAX),
        })
    }

    fn reconstruct_master_key(&mut self, threshold: u8) -> Result<(), SealError> {
        let sharks = Sharks(threshold);
        let recovered = sharks
            .recover(&self.pending_shares)
            .map_err(|_| SealError::ReconstructionFailed);
        self.clear_pending();

        let secret = Zeroizing::new(recovered?);
        let verifier = decode_field(&self.record()?.verifier, "verifier")?;

        if !verify_master(&secret, &verifier)? {
            warn!("Master key reconstruction failed - verifier mismatch (invalid shares?)");
            return Err(SealError::ReconstructionFailed);
        }

        self.finish_unseal(MasterKey::from_bytes(&secret)?);
        info!("Unsealed with recovery shares");

        Ok(())
    }

    /// Re-wraps the master key under a new passphrase. Requires the store to
    /// be unsealed; recovery shares stay valid.
    pub async fn change_passphrase(&mut self, new_passphrase: &str) -> Result<(), SealError> {
        check_passphrase(new_passphrase)?;
        let master_key = self.master_key()?;
        let mut record = self.record()?.clone();

        let salt = generate_bytes(SALT_SIZE)?;
        let kek = derive_kek(new_passphrase, &salt, &record.kdf)?;
        let wrapped = aead::seal(Algorithm::Aes256Gcm, &kek, master_key.as_bytes(), MASTER_AAD)?;

        record.salt = hex::encode(&salt);
        record.wrapped_master = hex::encode(&wrapped);
        self.write_record(&record).await?;
        self.record = Some(record);

        info!("Passphrase changed");

        Ok(())
    }

    /// Seals the store, dropping the master key from memory.
    pub fn seal(&mut self) {
        if self.status == SealStatus::Uninitialized {
            return;
        }

        self.master_key = None;
        self.clear_pending();
        self.status = SealStatus::Sealed;

        info!("Sealed");
    }

    /// Returns the master key (only if unsealed).
    pub fn master_key(&self) -> Result<&MasterKey, SealError> {
        match self.status {
            SealStatus::Uninitialized => Err(SealError::NotInitialized),
            SealStatus::Sealed => Err(SealError::Sealed),
            SealStatus::Unsealed => self.master_key.as_ref().ok_or(SealError::Sealed),
        }
    }

    fn ensure_sealed(&self) -> Result<(), SealError> {
        match self.status {
            SealStatus::Uninitialized => Err(SealError::NotInitialized),
            SealStatus::Unsealed => Err(SealError::AlreadyUnsealed),
            SealStatus::Sealed => Ok(()),
        }
    }

    fn record(&self) -> Result<&SealRecord, SealError> {
        self.record.as_ref().ok_or(SealError::NotInitialized)
    }

    fn finish_unseal(&mut self, master_key: MasterKey) {
        self.clear_pending();
        self.master_key = Some(master_key);
        self.status = SealStatus::Unsealed;
    }

    fn clear_pending(&mut self) {
        self.pending_shares.clear();
        self.pending_indices.clear();
    }

    async fn write_record(&self, record: &SealRecord) -> Result<(), SealError> {
        let bytes = serde_json::to_vec(record)?;
        self.storage.put(SEAL_RECORD, &bytes).await?;
        Ok(())
    }
}

fn check_passphrase(passphrase: &str) -> Result<(), SealError> {
    if passphrase.chars().count() < MIN_PASSPHRASE_CHARS {
        return Err(SealError::WeakPassphrase {
            min: MIN_PASSPHRASE_CHARS,
        });
    }
    Ok(())
}

/// Derives the key-encryption key from the passphrase with Argon2id.
fn derive_kek(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<SymmetricKey, SealError> {
    let mut kek = Zeroizing::new([0u8; KEK_SIZE]);
    params
        .argon2()?
        .hash_password_into(passphrase.as_bytes(), salt, &mut kek[..])
        .map_err(|e| SealError::InvalidConfig(e.to_string()))?;
    Ok(SymmetricKey::from_bytes(&kek[..])?)
}

/// Computes HMAC-SHA256 of the master key for verification.
fn compute_verifier(master_key: &[u8]) -> Result<Vec<u8>, SealError> {
    let mut mac = HmacSha256::new_from_slice(master_key)
        .map_err(|_| SealError::Crypto(NimbusError::KeyOperationFailed))?;
    mac.update(SEAL_VERIFY_TAG);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Checks a candidate master key against the stored verifier in constant time.
fn verify_master(candidate: &[u8], verifier: &[u8]) -> Result<bool, SealError> {
    let mut mac = HmacSha256::new_from_slice(candidate)
        .map_err(|_| SealError::Crypto(NimbusError::KeyOperationFailed))?;
    mac.update(SEAL_VERIFY_TAG);
    Ok(mac.verify_slice(verifier).is_ok())
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, SealError> {
    hex::decode(value).map_err(|_| SealError::CorruptState(format!("{field} is not hex")))
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
