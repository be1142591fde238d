//! Symmetric chain ratchet.
//!
//! A chain key is never used for encryption directly. Each step derives a
//! single-use message key and the next chain key, both with HKDF-SHA256:
//!
//! ```text
//! message_key[n] = HKDF(chain_key[n], "nimbus-message-key")
//! chain_key[n+1] = HKDF(chain_key[n], "nimbus-chain-key")
//! ```

use nimbus_crypto::kdf::derive_encryption_key;
use nimbus_crypto::{NimbusError, NimbusResult, SymmetricKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

const CHAIN_KEY_INFO: &[u8] = b"nimbus-chain-key";
const MESSAGE_KEY_INFO: &[u8] = b"nimbus-message-key";

/// Chain state for one direction of a session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    counter: u32,
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKey")
            .field("key", &"[REDACTED]")
            .field("counter", &self.counter)
            .finish()
    }
}

impl ChainKey {
    /// Starts a chain at counter 0.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key, counter: 0 }
    }

    /// Restores a chain at a given counter.
    pub fn with_counter(key: [u8; 32], counter: u32) -> Self {
        Self { key, counter }
    }

    /// Counter of the next message key this chain will produce.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Raw chain key bytes, for snapshots.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Derives the message key for the current counter and the next chain.
    pub fn ratchet(&self) -> NimbusResult<(MessageKey, ChainKey)> {
        let next_counter = self
            .counter
            .checked_add(1)
            .ok_or(NimbusError::KeyOperationFailed)?;

        let message_bytes = derive_encryption_key(&self.key, MESSAGE_KEY_INFO)?;
        let next_bytes = derive_encryption_key(&self.key, CHAIN_KEY_INFO)?;

        let message_key = MessageKey {
            key: SymmetricKey::from_bytes(&message_bytes[..])?,
            counter: self.counter,
        };
        let next = ChainKey {
            key: *next_bytes,
            counter: next_counter,
        };
        Ok((message_key, next))
    }

    /// Advances to `target`, returning the message keys for every counter
    /// in between.
    ///
    /// Callers bound `target - counter()` before calling.
    pub fn skip_to(&self, target: u32) -> NimbusResult<(Vec<MessageKey>, ChainKey)> {
        if target < self.counter {
            return Err(NimbusError::InvalidInput);
        }

        let mut keys = Vec::with_capacity((target - self.counter) as usize);
        let mut current = self.clone();
        while current.counter < target {
            let (message_key, next) = current.ratchet()?;
            keys.push(message_key);
            current = next;
        }
        Ok((keys, current))
    }
}

/// Single-use key for one message.
pub struct MessageKey {
    key: SymmetricKey,
    counter: u32,
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageKey")
            .field("key", &"[REDACTED]")
            .field("counter", &self.counter)
            .finish()
    }
}

impl MessageKey {
    /// Counter this key belongs to.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The AEAD key.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Consumes the message key, keeping only the AEAD key.
    pub fn into_key(self) -> SymmetricKey {
        self.key
    }
}
