//! Session error types.

use nimbus_crypto::NimbusError;
use thiserror::Error;

/// Errors raised while establishing or using a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Underlying cryptographic failure.
    #[error("cryptographic error: {0}")]
    Crypto(#[from] NimbusError),

    /// Handshake or envelope carries a protocol version we do not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown cipher suite tag.
    #[error("unsupported cipher suite: {0:#04x}")]
    UnsupportedSuite(u8),

    /// Malformed handshake message.
    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),

    /// Handshake is addressed to another identity.
    #[error("handshake is not addressed to this identity")]
    NotForThisIdentity,

    /// Malformed envelope, or one that does not fit this session.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),

    /// Envelope belongs to a different session.
    #[error("envelope belongs to another session")]
    WrongSession,

    /// Message counter was already consumed.
    #[error("message {0} was already received")]
    Replay(u32),

    /// Accepting the message would exceed the skipped-key limits.
    #[error("too many skipped messages")]
    TooManySkipped,

    /// The send chain is exhausted; establish a new session.
    #[error("message limit reached, a new handshake is required")]
    RekeyRequired,

    /// Session was closed and its keys erased.
    #[error("session is closed")]
    SessionClosed,

    /// Plaintext exceeds the configured maximum.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Offered size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Configuration rejected by [`crate::SessionConfig::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Maps the error onto the coarse crypto taxonomy.
    pub fn kind(&self) -> NimbusError {
        match self {
            Self::Crypto(err) => *err,
            Self::NotForThisIdentity | Self::Replay(_) => NimbusError::AuthenticationFailed,
            Self::MessageTooLarge { .. } => NimbusError::InvalidLength,
            Self::TooManySkipped | Self::RekeyRequired | Self::SessionClosed => {
                NimbusError::KeyOperationFailed
            },
            Self::UnsupportedVersion(_)
            | Self::UnsupportedSuite(_)
            | Self::InvalidHandshake(_)
            | Self::InvalidEnvelope(_)
            | Self::WrongSession
            | Self::InvalidConfig(_) => NimbusError::InvalidInput,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
