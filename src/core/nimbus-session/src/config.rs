//! Session limits.

use nimbus_crypto::Algorithm;

use crate::error::{SessionError, SessionResult};

/// Tunable limits applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// AEAD suite proposed when initiating a session.
    pub algorithm: Algorithm,
    /// Most message keys a single envelope may cause us to skip.
    pub max_skip: u32,
    /// Most skipped message keys kept across the session.
    pub max_skipped_keys: usize,
    /// Messages per direction before a new handshake is required.
    pub max_messages_per_chain: u32,
    /// Largest accepted plaintext, in bytes.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            max_skip: 1000,
            max_skipped_keys: 2000,
            max_messages_per_chain: 1_000_000,
            max_message_size: 1024 * 1024,
        }
    }
}

impl SessionConfig {
    /// Checks that the limits are coherent.
    pub fn validate(&self) -> SessionResult<()> {
        if self.max_messages_per_chain == 0 {
            return Err(SessionError::InvalidConfig(
                "max_messages_per_chain must be > 0".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(SessionError::InvalidConfig(
                "max_message_size must be > 0".into(),
            ));
        }
        if (self.max_skip as usize) > self.max_skipped_keys {
            return Err(SessionError::InvalidConfig(
                "max_skip cannot exceed max_skipped_keys".into(),
            ));
        }
        Ok(())
    }
}
