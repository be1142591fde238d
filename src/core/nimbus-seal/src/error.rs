//! Seal error types.

use nimbus_crypto::NimbusError;
use nimbus_storage::StorageError;
use thiserror::Error;

/// Errors that can occur during seal operations.
#[derive(Debug, Error)]
pub enum SealError {
    /// Store is already initialized.
    #[error("store already initialized")]
    AlreadyInitialized,

    /// Store is not initialized.
    #[error("store not initialized")]
    NotInitialized,

    /// Store is sealed.
    #[error("store is sealed")]
    Sealed,

    /// Store is already unsealed.
    #[error("store already unsealed")]
    AlreadyUnsealed,

    /// Passphrase is too short.
    #[error("passphrase must be at least {min} characters")]
    WeakPassphrase {
        /// Minimum length in characters.
        min: usize,
    },

    /// Passphrase does not unlock the master key.
    #[error("invalid passphrase")]
    InvalidPassphrase,

    /// Invalid KDF or recovery configuration.
    #[error("invalid seal config: {0}")]
    InvalidConfig(String),

    /// Recovery shares were not set up at initialization.
    #[error("recovery shares not configured")]
    RecoveryNotConfigured,

    /// Invalid share.
    #[error("invalid share: {0}")]
    InvalidShare(String),

    /// Duplicate share submitted.
    #[error("duplicate share (index {0})")]
    DuplicateShare(u8),

    /// Failed to reconstruct master key.
    #[error("failed to reconstruct master key")]
    ReconstructionFailed,

    /// Stored seal record is unreadable.
    #[error("corrupt seal record: {0}")]
    CorruptState(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] NimbusError),
}

impl SealError {
    /// Maps the error onto the coarse crypto taxonomy.
    pub fn kind(&self) -> NimbusError {
        match self {
            Self::Crypto(err) => *err,
            Self::InvalidPassphrase | Self::ReconstructionFailed => {
                NimbusError::AuthenticationFailed
            },
            Self::WeakPassphrase { .. }
            | Self::InvalidConfig(_)
            | Self::InvalidShare(_)
            | Self::DuplicateShare(_) => NimbusError::InvalidInput,
            Self::Storage(_) | Self::CorruptState(_) => NimbusError::SystemError,
            Self::AlreadyInitialized
            | Self::NotInitialized
            | Self::Sealed
            | Self::AlreadyUnsealed
            | Self::RecoveryNotConfigured => NimbusError::KeyOperationFailed,
        }
    }
}

impl From<serde_json::Error> for SealError {
    fn from(e: serde_json::Error) -> Self {
        SealError::CorruptState(format!(
            "malformed json at line {} column {}",
            e.line(),
            e.column()
        ))
    }
}
