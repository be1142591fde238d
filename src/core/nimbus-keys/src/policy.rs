//! Key policies, version states and the public views of stored keys.

use std::fmt;
use std::time::Duration;

use nimbus_crypto::{Algorithm, PublicKey, SymmetricKey};
use nimbus_session::Role;
use serde::{Deserialize, Serialize};

/// Policy attached to a named key at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    /// AEAD algorithm used for data encrypted under this key.
    pub algorithm: Algorithm,
    /// Automatic rotation interval, if any.
    pub rotation_period: Option<Duration>,
    /// Allow encryption (and data key generation).
    pub supports_encryption: bool,
    /// Allow decryption.
    pub supports_decryption: bool,
    /// Allow [`crate::KeyStore::delete_key`].
    pub deletion_allowed: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            rotation_period: None,
            supports_encryption: true,
            supports_decryption: true,
            deletion_allowed: false,
        }
    }
}

impl KeyPolicy {
    /// Policy with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rotation period.
    pub fn with_rotation_period(mut self, period: Duration) -> Self {
        self.rotation_period = Some(period);
        self
    }

    /// Sets the algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Allows deletion.
    pub fn deletable(mut self) -> Self {
        self.deletion_allowed = true;
        self
    }
}

/// Changes applied by [`crate::KeyStore::update_key_config`].
///
/// `None` leaves a setting unchanged.
#[derive(Debug, Clone, Default)]
pub struct KeyUpdate {
    /// New minimum decryption version.
    pub min_decryption_version: Option<u32>,
    /// New deletion flag.
    pub deletion_allowed: Option<bool>,
    /// New rotation period (`Some(None)` disables rotation).
    pub rotation_period: Option<Option<Duration>>,
}

/// Lifecycle state of one key version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyState {
    /// Latest version: encrypts and decrypts.
    Active,
    /// Older version: decrypts only.
    DecryptOnly,
    /// Below the minimum decryption version; material still stored.
    Retired,
    /// Material erased.
    Destroyed,
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::DecryptOnly => write!(f, "decrypt-only"),
            Self::Retired => write!(f, "retired"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Metadata of a named key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Key name.
    pub name: String,
    /// Policy in force.
    pub policy: KeyPolicy,
    /// Latest (active) version.
    pub latest_version: u32,
    /// Oldest version still allowed to decrypt.
    pub min_decryption_version: u32,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix seconds).
    pub updated_at: u64,
    /// Timestamp of the latest rotation (creation counts as one).
    pub last_rotated_at: u64,
}

impl KeyInfo {
    /// Rotation deadline, if the policy sets a period.
    pub fn next_rotation_at(&self) -> Option<u64> {
        self.policy
            .rotation_period
            .map(|period| self.last_rotated_at.saturating_add(period.as_secs()))
    }

    /// State of `version` ignoring destruction, which only the version
    /// record knows about.
    pub(crate) fn state_of(&self, version: u32) -> KeyState {
        if version == self.latest_version {
            KeyState::Active
        } else if version < self.min_decryption_version {
            KeyState::Retired
        } else {
            KeyState::DecryptOnly
        }
    }
}

/// One version of a named key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionInfo {
    /// Version number.
    pub version: u32,
    /// Lifecycle state.
    pub state: KeyState,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
    /// Destruction timestamp, for destroyed versions.
    pub destroyed_at: Option<u64>,
}

/// A freshly generated data encryption key.
#[derive(Debug)]
pub struct DataKey {
    /// Plaintext key, for immediate use only.
    pub plaintext: SymmetricKey,
    /// The same key wrapped under the named key, for storage.
    pub ciphertext: String,
}

/// Public view of a stored identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityInfo {
    /// Identity name.
    pub name: String,
    /// X25519 public key.
    pub public_key: PublicKey,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
}

/// Public view of a stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Hex session identifier.
    pub id: String,
    /// Name of the local identity.
    pub identity: String,
    /// Peer identity key.
    pub peer: PublicKey,
    /// Side of the handshake.
    pub role: Role,
    /// Last save timestamp (Unix seconds).
    pub updated_at: u64,
}
