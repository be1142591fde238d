//! Key store error types.

use nimbus_crypto::NimbusError;
use nimbus_session::SessionError;
use nimbus_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the key store.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Key not found.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Key already exists.
    #[error("key already exists: {0}")]
    KeyExists(String),

    /// Invalid key, identity or session name.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Version does not exist.
    #[error("version {version} not found for key {name}")]
    VersionNotFound {
        /// Key name.
        name: String,
        /// Requested version.
        version: u32,
    },

    /// Version material was destroyed.
    #[error("version {version} of key {name} was destroyed")]
    VersionDestroyed {
        /// Key name.
        name: String,
        /// Destroyed version.
        version: u32,
    },

    /// Version is below the minimum decryption version.
    #[error("version {version} is retired (min decryption version {min})")]
    VersionRetired {
        /// Requested version.
        version: u32,
        /// Current minimum.
        min: u32,
    },

    /// The latest version cannot be destroyed.
    #[error("cannot destroy the latest version of key {0}")]
    CannotDestroyLatest(String),

    /// Policy forbids the operation.
    #[error("operation not allowed: {0}")]
    OperationNotAllowed(String),

    /// Key deletion not allowed.
    #[error("key deletion not allowed: {0}")]
    DeletionNotAllowed(String),

    /// Identity not found.
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// Identity already exists.
    #[error("identity already exists: {0}")]
    IdentityExists(String),

    /// Stored session not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session with this id was already stored (or closed).
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// Session state is older than the stored state.
    #[error("stale session state: {0}")]
    StaleSession(String),

    /// Ciphertext is not in `nimbus:v{n}:{base64}` form.
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    /// Ciphertext failed authentication.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Stored record is corrupt.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] NimbusError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

impl KeyError {
    /// Maps the error onto the coarse crypto taxonomy.
    pub fn kind(&self) -> NimbusError {
        match self {
            Self::Crypto(err) => *err,
            Self::Session(err) => err.kind(),
            Self::DecryptionFailed => NimbusError::AuthenticationFailed,
            Self::InvalidName(_) | Self::InvalidCiphertext => NimbusError::InvalidInput,
            Self::Storage(_) | Self::CorruptRecord(_) => NimbusError::SystemError,
            Self::KeyNotFound(_)
            | Self::KeyExists(_)
            | Self::VersionNotFound { .. }
            | Self::VersionDestroyed { .. }
            | Self::VersionRetired { .. }
            | Self::CannotDestroyLatest(_)
            | Self::OperationNotAllowed(_)
            | Self::DeletionNotAllowed(_)
            | Self::IdentityNotFound(_)
            | Self::IdentityExists(_)
            | Self::SessionNotFound(_)
            | Self::SessionExists(_)
            | Self::StaleSession(_) => NimbusError::KeyOperationFailed,
        }
    }
}

impl From<serde_json::Error> for KeyError {
    fn from(err: serde_json::Error) -> Self {
        // serde_json messages can quote the offending value.
        Self::CorruptRecord(format!(
            "malformed json at line {} column {}",
            err.line(),
            err.column()
        ))
    }
}

/// Result type for key store operations.
pub type KeyResult<T> = Result<T, KeyError>;
