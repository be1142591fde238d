//! Established sessions.

use std::collections::BTreeMap;

use nimbus_crypto::{aead, Algorithm, PublicKey, SymmetricKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::chain::ChainKey;
use crate::config::SessionConfig;
use crate::envelope::Envelope;
use crate::error::{SessionError, SessionResult};
use crate::handshake::{Role, SessionId};
use crate::PROTOCOL_VERSION;

/// An end-to-end encrypted session with one peer.
pub struct Session {
    id: SessionId,
    role: Role,
    suite: Algorithm,
    local_identity: PublicKey,
    remote_identity: PublicKey,
    send_chain: ChainKey,
    recv_chain: ChainKey,
    skipped: BTreeMap<u32, SymmetricKey>,
    config: SessionConfig,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("suite", &self.suite)
            .field("send_counter", &self.send_chain.counter())
            .field("recv_counter", &self.recv_chain.counter())
            .field("skipped", &self.skipped.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        role: Role,
        suite: Algorithm,
        local_identity: PublicKey,
        remote_identity: PublicKey,
        send_chain: ChainKey,
        recv_chain: ChainKey,
        config: SessionConfig,
    ) -> Self {
        Self {
            id,
            role,
            suite,
            local_identity,
            remote_identity,
            send_chain,
            recv_chain,
            skipped: BTreeMap::new(),
            config,
            closed: false,
        }
    }

    /// Session identifier, identical on both ends.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Side of the handshake this session was created on.
    pub fn role(&self) -> Role {
        self.role
    }

    /// AEAD suite used for every message.
    pub fn suite(&self) -> Algorithm {
        self.suite
    }

    /// Our identity public key.
    pub fn local_identity(&self) -> &PublicKey {
        &self.local_identity
    }

    /// The peer's identity public key.
    pub fn remote_identity(&self) -> &PublicKey {
        &self.remote_identity
    }

    /// Number of messages sent so far.
    pub fn send_counter(&self) -> u32 {
        self.send_chain.counter()
    }

    /// Next in-order counter expected from the peer.
    pub fn receive_counter(&self) -> u32 {
        self.recv_chain.counter()
    }

    /// Message keys held for messages that have not arrived yet.
    pub fn skipped_keys(&self) -> usize {
        self.skipped.len()
    }

    /// Limits in force.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether [`Session::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    /// Encrypts one message under a fresh message key.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> SessionResult<Envelope> {
        self.ensure_open()?;

        if plaintext.len() > self.config.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: plaintext.len(),
                max: self.config.max_message_size,
            });
        }
        if self.send_chain.counter() >= self.config.max_messages_per_chain {
            return Err(SessionError::RekeyRequired);
        }

        let (message_key, next) = self.send_chain.ratchet()?;
        let counter = message_key.counter();
        let header = Envelope::header_for(self.suite, &self.id, counter);
        let payload = aead::encrypt(self.suite, message_key.key(), plaintext, &header)?;

        self.send_chain = next;

        debug!(session = %self.id, counter = counter, "Encrypted message");

        Ok(Envelope::new(self.suite, self.id, counter, payload))
    }

    /// Decrypts one envelope from the peer.
    ///
    /// Out-of-order envelopes are accepted within the configured skip
    /// limits. State changes only after the envelope authenticates, so a
    /// forged or corrupted envelope leaves the session untouched.
    pub fn decrypt(&mut self, envelope: &Envelope) -> SessionResult<Zeroizing<Vec<u8>>> {
        self.ensure_open()?;

        if envelope.session_id() != &self.id {
            return Err(SessionError::WrongSession);
        }
        if envelope.suite() != self.suite {
            return Err(SessionError::InvalidEnvelope("cipher suite mismatch"));
        }
        let size = envelope.payload().len().saturating_sub(self.suite.overhead());
        if size > self.config.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size,
                max: self.config.max_message_size,
            });
        }

        let counter = envelope.counter();
        let header = envelope.header();

        if let Some(key) = self.skipped.get(&counter) {
            let plaintext = aead::decrypt(self.suite, key, envelope.payload(), &header)?;
            self.skipped.remove(&counter);
            debug!(session = %self.id, counter = counter, "Decrypted delayed message");
            return Ok(plaintext);
        }

        let expected = self.recv_chain.counter();
        if counter < expected {
            return Err(SessionError::Replay(counter));
        }
        if counter >= self.config.max_messages_per_chain {
            return Err(SessionError::InvalidEnvelope("counter beyond chain limit"));
        }

        let gap = counter - expected;
        if gap > self.config.max_skip
            || self.skipped.len() + gap as usize > self.config.max_skipped_keys
        {
            return Err(SessionError::TooManySkipped);
        }

        let (skipped, chain_at_counter) = self.recv_chain.skip_to(counter)?;
        let (message_key, next) = chain_at_counter.ratchet()?;
        let plaintext = aead::decrypt(self.suite, message_key.key(), envelope.payload(), &header)?;

        self.recv_chain = next;
        for key in skipped {
            self.skipped.insert(key.counter(), key.into_key());
        }

        debug!(
            session = %self.id,
            counter = counter,
            skipped = gap,
            "Decrypted message"
        );

        Ok(plaintext)
    }

    /// Erases every key held by the session.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.send_chain.zeroize();
        self.recv_chain.zeroize();
        self.skipped.clear();
        self.closed = true;
        info!(session = %self.id, "Closed session");
    }

    /// Exports the session state for persistence.
    pub fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        self.ensure_open()?;

        Ok(SessionSnapshot {
            version: PROTOCOL_VERSION,
            session_id: self.id.to_hex(),
            role: self.role,
            suite: self.suite,
            local_identity: self.local_identity.to_base64(),
            remote_identity: self.remote_identity.to_base64(),
            send_chain_key: *self.send_chain.as_bytes(),
            send_counter: self.send_chain.counter(),
            recv_chain_key: *self.recv_chain.as_bytes(),
            recv_counter: self.recv_chain.counter(),
            skipped: self
                .skipped
                .iter()
                .map(|(counter, key)| {
                    let mut bytes = [0u8; 32];
                    bytes.copy_from_slice(key.as_bytes());
                    SkippedKey {
                        counter: *counter,
                        key: bytes,
                    }
                })
                .collect(),
        })
    }

    /// Rebuilds a session from a snapshot.
    pub fn restore(snapshot: &SessionSnapshot, config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;

        if snapshot.version != PROTOCOL_VERSION {
            return Err(SessionError::UnsupportedVersion(snapshot.version));
        }

        let id: SessionId = snapshot.session_id.parse()?;
        let mut skipped = BTreeMap::new();
        for entry in &snapshot.skipped {
            skipped.insert(entry.counter, SymmetricKey::from_bytes(&entry.key)?);
        }

        Ok(Self {
            id,
            role: snapshot.role,
            suite: snapshot.suite,
            local_identity: PublicKey::from_base64(&snapshot.local_identity)?,
            remote_identity: PublicKey::from_base64(&snapshot.remote_identity)?,
            send_chain: ChainKey::with_counter(snapshot.send_chain_key, snapshot.send_counter),
            recv_chain: ChainKey::with_counter(snapshot.recv_chain_key, snapshot.recv_counter),
            skipped,
            config,
            closed: false,
        })
    }
}

/// Serializable session state.
///
/// Holds live chain keys: store it only in encrypted form. It is zeroized
/// on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionSnapshot {
    version: u8,
    session_id: String,
    #[zeroize(skip)]
    role: Role,
    #[zeroize(skip)]
    suite: Algorithm,
    local_identity: String,
    remote_identity: String,
    send_chain_key: [u8; 32],
    send_counter: u32,
    recv_chain_key: [u8; 32],
    recv_counter: u32,
    skipped: Vec<SkippedKey>,
}

impl SessionSnapshot {
    /// Hex session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Base64 identity key of the peer.
    pub fn remote_identity(&self) -> &str {
        &self.remote_identity
    }

    /// Base64 identity key of the local side.
    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    /// Side of the handshake.
    pub fn role(&self) -> Role {
        self.role
    }
}

impl std::fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("send_counter", &self.send_counter)
            .field("recv_counter", &self.recv_counter)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SkippedKey {
    counter: u32,
    key: [u8; 32],
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::handshake::{accept, initiate};
    use nimbus_crypto::{KeyPair, NimbusError};

    fn pair_with(config: SessionConfig) -> (Session, Session) {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let (a, init) = initiate(&alice, &bob.public_key(), config).unwrap();
        let b = accept(&bob, &init, config).unwrap();
        (a, b)
    }

    fn pair() -> (Session, Session) {
        pair_with(SessionConfig::default())
    }

    #[test]
    fn test_bidirectional_exchange() {
        let (mut alice, mut bob) = pair();

        let env = alice.encrypt(b"hello bob").unwrap();
        assert_eq!(&*bob.decrypt(&env).unwrap(), b"hello bob");

        let reply = bob.encrypt(b"hello alice").unwrap();
        assert_eq!(&*alice.decrypt(&reply).unwrap(), b"hello alice");

        assert_eq!(alice.send_counter(), 1);
        assert_eq!(alice.receive_counter(), 1);
        assert_eq!(bob.receive_counter(), 1);
    }

    #[test]
    fn test_aes_gcm_suite() {
        let config = SessionConfig {
            algorithm: Algorithm::Aes256Gcm,
            ..Default::default()
        };
        let (mut alice, mut bob) = pair_with(config);
        let env = alice.encrypt(b"gcm").unwrap();
        assert_eq!(env.suite(), Algorithm::Aes256Gcm);
        assert_eq!(&*bob.decrypt(&env).unwrap(), b"gcm");
    }

    #[test]
    fn test_each_message_uses_fresh_key() {
        let (mut alice, _) = pair();
        let e1 = alice.encrypt(b"same").unwrap();
        let e2 = alice.encrypt(b"same").unwrap();
        assert_eq!(e1.counter(), 0);
        assert_eq!(e2.counter(), 1);
        assert_ne!(e1.payload(), e2.payload());
    }

    #[test]
    fn test_replay_rejected() {
        let (mut alice, mut bob) = pair();
        let env = alice.encrypt(b"once").unwrap();

        bob.decrypt(&env).unwrap();
        assert!(matches!(bob.decrypt(&env), Err(SessionError::Replay(0))));
    }

    #[test]
    fn test_out_of_order_delivery() {
        let (mut alice, mut bob) = pair();
        let envelopes: Vec<_> = (0..4)
            .map(|i| alice.encrypt(format!("msg {i}").as_bytes()).unwrap())
            .collect();

        assert_eq!(&*bob.decrypt(&envelopes[3]).unwrap(), b"msg 3");
        assert_eq!(bob.skipped_keys(), 3);

        assert_eq!(&*bob.decrypt(&envelopes[1]).unwrap(), b"msg 1");
        assert_eq!(&*bob.decrypt(&envelopes[0]).unwrap(), b"msg 0");
        assert_eq!(&*bob.decrypt(&envelopes[2]).unwrap(), b"msg 2");
        assert_eq!(bob.skipped_keys(), 0);

        assert!(matches!(
            bob.decrypt(&envelopes[1]),
            Err(SessionError::Replay(1))
        ));
    }

    #[test]
    fn test_skip_limit_per_message() {
        let config = SessionConfig {
            max_skip: 2,
            max_skipped_keys: 10,
            ..Default::default()
        };
        let (mut alice, mut bob) = pair_with(config);
        let envelopes: Vec<_> = (0..4).map(|_| alice.encrypt(b"x").unwrap()).collect();

        assert!(matches!(
            bob.decrypt(&envelopes[3]),
            Err(SessionError::TooManySkipped)
        ));
        assert_eq!(bob.receive_counter(), 0);

        bob.decrypt(&envelopes[2]).unwrap();
        assert_eq!(bob.skipped_keys(), 2);
    }

    #[test]
    fn test_skip_limit_total() {
        let config = SessionConfig {
            max_skip: 3,
            max_skipped_keys: 4,
            ..Default::default()
        };
        let (mut alice, mut bob) = pair_with(config);
        let envelopes: Vec<_> = (0..10).map(|_| alice.encrypt(b"x").unwrap()).collect();

        bob.decrypt(&envelopes[3]).unwrap();
        assert_eq!(bob.skipped_keys(), 3);

        assert!(matches!(
            bob.decrypt(&envelopes[6]),
            Err(SessionError::TooManySkipped)
        ));

        bob.decrypt(&envelopes[5]).unwrap();
        assert_eq!(bob.skipped_keys(), 4);
    }

    #[test]
    fn test_tampered_envelope_leaves_state_untouched() {
        let (mut alice, mut bob) = pair();
        let _first = alice.encrypt(b"first").unwrap();
        let second = alice.encrypt(b"second").unwrap();

        let mut bytes = second.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let forged = Envelope::from_bytes(&bytes).unwrap();

        let err = bob.decrypt(&forged).unwrap_err();
        assert_eq!(err.kind(), NimbusError::AuthenticationFailed);
        assert_eq!(bob.receive_counter(), 0);
        assert_eq!(bob.skipped_keys(), 0);

        assert_eq!(&*bob.decrypt(&second).unwrap(), b"second");
    }

    #[test]
    fn test_oversized_incoming_message_rejected() {
        let config = SessionConfig {
            max_message_size: 16,
            ..SessionConfig::default()
        };
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let (mut sender, init) =
            initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();
        let mut receiver = accept(&bob, &init, config).unwrap();

        let env = sender.encrypt(&[0x42u8; 4096]).unwrap();
        let err = receiver.decrypt(&env).unwrap_err();
        assert!(matches!(
            err,
            SessionError::MessageTooLarge { size: 4096, max: 16 }
        ));
        assert_eq!(receiver.receive_counter(), 0);

        let small = sender.encrypt(b"sixteen bytes ok").unwrap();
        assert_eq!(&*receiver.decrypt(&small).unwrap(), b"sixteen bytes ok");
    }

    #[test]
    fn test_tampered_header_fails_authentication() {
        let (mut alice, mut bob) = pair();
        alice.encrypt(b"zero").unwrap();
        let env = alice.encrypt(b"one").unwrap();

        let mut bytes = env.to_bytes();
        bytes[21] = 0;
        let moved = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(moved.counter(), 0);

        let err = bob.decrypt(&moved).unwrap_err();
        assert_eq!(err.kind(), NimbusError::AuthenticationFailed);
        assert_eq!(bob.receive_counter(), 0);
    }

    #[test]
    fn test_wrong_session_rejected() {
        let (mut alice, _) = pair();
        let (_, mut other_bob) = pair();

        let env = alice.encrypt(b"hi").unwrap();
        assert!(matches!(
            other_bob.decrypt(&env),
            Err(SessionError::WrongSession)
        ));
    }

    #[test]
    fn test_own_envelope_does_not_decrypt() {
        let (mut alice, _) = pair();
        let env = alice.encrypt(b"echo").unwrap();
        assert!(alice.decrypt(&env).is_err());
        assert_eq!(alice.receive_counter(), 0);
    }

    #[test]
    fn test_message_size_limit() {
        let config = SessionConfig {
            max_message_size: 8,
            ..Default::default()
        };
        let (mut alice, _) = pair_with(config);
        assert!(alice.encrypt(&[0u8; 8]).is_ok());
        assert!(matches!(
            alice.encrypt(&[0u8; 9]),
            Err(SessionError::MessageTooLarge { size: 9, max: 8 })
        ));
    }

    #[test]
    fn test_rekey_required_at_chain_limit() {
        let config = SessionConfig {
            max_messages_per_chain: 2,
            max_skip: 1,
            max_skipped_keys: 1,
            ..Default::default()
        };
        let (mut alice, _) = pair_with(config);
        alice.encrypt(b"1").unwrap();
        alice.encrypt(b"2").unwrap();
        assert!(matches!(
            alice.encrypt(b"3"),
            Err(SessionError::RekeyRequired)
        ));
    }

    #[test]
    fn test_close_erases_and_blocks() {
        let (mut alice, mut bob) = pair();
        let env = alice.encrypt(b"late").unwrap();
        let _ = alice.encrypt(b"later").unwrap();
        bob.decrypt(&alice.encrypt(b"skip ahead").unwrap()).unwrap();
        assert_eq!(bob.skipped_keys(), 2);

        bob.close();
        assert!(bob.is_closed());
        assert_eq!(bob.skipped_keys(), 0);
        assert!(matches!(bob.decrypt(&env), Err(SessionError::SessionClosed)));
        assert!(matches!(bob.encrypt(b"x"), Err(SessionError::SessionClosed)));
        assert!(matches!(bob.snapshot(), Err(SessionError::SessionClosed)));
    }

    #[test]
    fn test_snapshot_restore_continues() {
        let (mut alice, mut bob) = pair();
        let early = alice.encrypt(b"early").unwrap();
        let late = alice.encrypt(b"late").unwrap();
        bob.decrypt(&late).unwrap();

        let snapshot = bob.snapshot().unwrap();
        let json = serde_json::to_vec(&snapshot).unwrap();
        drop(bob);

        let restored: SessionSnapshot = serde_json::from_slice(&json).unwrap();
        let mut bob = Session::restore(&restored, SessionConfig::default()).unwrap();

        assert_eq!(bob.id(), alice.id());
        assert_eq!(bob.role(), Role::Responder);
        assert_eq!(&*bob.decrypt(&early).unwrap(), b"early");
        assert!(matches!(bob.decrypt(&late), Err(SessionError::Replay(1))));

        let reply = bob.encrypt(b"restored").unwrap();
        assert_eq!(&*alice.decrypt(&reply).unwrap(), b"restored");
    }

    #[test]
    fn test_snapshot_debug_redacted() {
        let (alice, _) = pair();
        let snapshot = alice.snapshot().unwrap();
        let debug_str = format!("{:?}", snapshot);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("chain_key"));
        assert_eq!(snapshot.session_id(), alice.id().to_hex());
    }
}
