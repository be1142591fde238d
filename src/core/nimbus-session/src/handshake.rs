//! One-message X25519 handshake.
//!
//! The initiator knows the responder's identity public key ahead of time
//! (from a contact card, a QR code, a directory). It sends a single
//! [`HandshakeInit`] and may encrypt immediately; the responder derives the
//! same session from that message alone.
//!
//! ```text
//! dh1 = DH(E, R)            ephemeral  x responder identity
//! dh2 = DH(I, R)            initiator identity x responder identity
//! T   = label || version || suite || I || R || E
//! okm = HKDF(salt = SHA256(T), ikm = dh1 || dh2, info = "nimbus-session-chains", 64)
//! id  = SHA256("nimbus-session-id" || T)[..16]
//! ```
//!
//! `okm[..32]` seeds the initiator-to-responder chain and `okm[32..]` the
//! reverse direction.

use std::fmt;
use std::str::FromStr;

use nimbus_crypto::encoding::{decode_base64, encode_base64};
use nimbus_crypto::kdf::derive_key_pair;
use nimbus_crypto::{Algorithm, KeyPair, PublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::chain::ChainKey;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::session::Session;
use crate::PROTOCOL_VERSION;

/// Protocol label mixed into every transcript.
pub const PROTOCOL_LABEL: &[u8] = b"Nimbus_X25519_HKDF_SHA256_v1";

/// Size of a session identifier.
pub const SESSION_ID_SIZE: usize = 16;

/// Size of an encoded [`HandshakeInit`].
pub const HANDSHAKE_INIT_SIZE: usize = 2 + 3 * 32;

const CHAINS_INFO: &[u8] = b"nimbus-session-chains";
const SESSION_ID_INFO: &[u8] = b"nimbus-session-id";

/// Identifier shared by both ends of a session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Wraps raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> SessionResult<Self> {
        let bytes: [u8; SESSION_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| SessionError::InvalidEnvelope("session id must be 16 bytes"))?;
        Ok(Self(bytes))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }

    /// Lowercase hex form, used as the storage name of the session.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.to_hex())
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            hex::decode(s).map_err(|_| SessionError::InvalidEnvelope("session id is not hex"))?;
        Self::from_bytes(&bytes)
    }
}

/// Which side of the handshake a session was created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent the [`HandshakeInit`].
    Initiator,
    /// Accepted the [`HandshakeInit`].
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

/// The single handshake message, sent from initiator to responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInit {
    version: u8,
    suite: Algorithm,
    initiator: PublicKey,
    responder: PublicKey,
    ephemeral: PublicKey,
}

impl HandshakeInit {
    /// AEAD suite the session will use.
    pub fn suite(&self) -> Algorithm {
        self.suite
    }

    /// Identity public key of the initiator.
    pub fn initiator(&self) -> &PublicKey {
        &self.initiator
    }

    /// Identity public key the handshake is addressed to.
    pub fn responder(&self) -> &PublicKey {
        &self.responder
    }

    /// Encodes as `version || suite || I || R || E`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HANDSHAKE_INIT_SIZE);
        out.push(self.version);
        out.push(self.suite.tag());
        out.extend_from_slice(self.initiator.as_bytes());
        out.extend_from_slice(self.responder.as_bytes());
        out.extend_from_slice(self.ephemeral.as_bytes());
        out
    }

    /// Decodes the binary form.
    pub fn from_bytes(bytes: &[u8]) -> SessionResult<Self> {
        if bytes.len() != HANDSHAKE_INIT_SIZE {
            return Err(SessionError::InvalidHandshake("wrong length"));
        }
        if bytes[0] != PROTOCOL_VERSION {
            return Err(SessionError::UnsupportedVersion(bytes[0]));
        }
        let suite =
            Algorithm::from_tag(bytes[1]).map_err(|_| SessionError::UnsupportedSuite(bytes[1]))?;

        Ok(Self {
            version: bytes[0],
            suite,
            initiator: PublicKey::from_bytes(&bytes[2..34])?,
            responder: PublicKey::from_bytes(&bytes[34..66])?,
            ephemeral: PublicKey::from_bytes(&bytes[66..98])?,
        })
    }

    /// Base64 text form.
    pub fn to_base64(&self) -> SessionResult<String> {
        Ok(encode_base64(&self.to_bytes())?)
    }

    /// Parses the Base64 text form.
    pub fn from_base64(encoded: &str) -> SessionResult<Self> {
        let bytes = decode_base64(encoded)?;
        Self::from_bytes(&bytes)
    }

    fn transcript(&self) -> Vec<u8> {
        let mut transcript = Vec::with_capacity(PROTOCOL_LABEL.len() + HANDSHAKE_INIT_SIZE);
        transcript.extend_from_slice(PROTOCOL_LABEL);
        transcript.extend_from_slice(&self.to_bytes());
        transcript
    }
}

struct SessionSecrets {
    id: SessionId,
    initiator_to_responder: Zeroizing<[u8; 32]>,
    responder_to_initiator: Zeroizing<[u8; 32]>,
}

fn derive_secrets(
    dh1: &[u8; 32],
    dh2: &[u8; 32],
    init: &HandshakeInit,
) -> SessionResult<SessionSecrets> {
    let transcript = init.transcript();
    let salt = Sha256::digest(&transcript);

    let mut ikm = Zeroizing::new([0u8; 64]);
    ikm[..32].copy_from_slice(dh1);
    ikm[32..].copy_from_slice(dh2);

    let (initiator_to_responder, responder_to_initiator) =
        derive_key_pair(&ikm[..], Some(&salt[..]), CHAINS_INFO)?;

    let mut hasher = Sha256::new();
    hasher.update(SESSION_ID_INFO);
    hasher.update(&transcript);
    let digest = hasher.finalize();

    Ok(SessionSecrets {
        id: SessionId::from_bytes(&digest[..SESSION_ID_SIZE])?,
        initiator_to_responder,
        responder_to_initiator,
    })
}

/// Starts a session with `peer`, returning it with the message to send.
///
/// The ephemeral secret is dropped (and zeroized) before this returns.
pub fn initiate(
    identity: &KeyPair,
    peer: &PublicKey,
    config: SessionConfig,
) -> SessionResult<(Session, HandshakeInit)> {
    config.validate()?;

    let ephemeral = KeyPair::generate()?;
    let init = HandshakeInit {
        version: PROTOCOL_VERSION,
        suite: config.algorithm,
        initiator: identity.public_key(),
        responder: *peer,
        ephemeral: ephemeral.public_key(),
    };

    let dh1 = ephemeral.diffie_hellman(peer)?;
    let dh2 = identity.diffie_hellman(peer)?;
    drop(ephemeral);

    let secrets = derive_secrets(&dh1, &dh2, &init)?;

    let session = Session::new(
        secrets.id,
        Role::Initiator,
        init.suite,
        init.initiator,
        init.responder,
        ChainKey::new(*secrets.initiator_to_responder),
        ChainKey::new(*secrets.responder_to_initiator),
        config,
    );

    info!(
        session = %secrets.id,
        suite = %init.suite,
        peer = %peer.fingerprint(),
        "Initiated session"
    );

    Ok((session, init))
}

/// Accepts a [`HandshakeInit`] addressed to `identity`.
pub fn accept(
    identity: &KeyPair,
    init: &HandshakeInit,
    config: SessionConfig,
) -> SessionResult<Session> {
    config.validate()?;

    if !init.responder.ct_eq(&identity.public_key()) {
        debug!("Rejected handshake addressed to another identity");
        return Err(SessionError::NotForThisIdentity);
    }

    let dh1 = identity.diffie_hellman(&init.ephemeral)?;
    let dh2 = identity.diffie_hellman(&init.initiator)?;

    let secrets = derive_secrets(&dh1, &dh2, init)?;

    let session = Session::new(
        secrets.id,
        Role::Responder,
        init.suite,
        init.responder,
        init.initiator,
        ChainKey::new(*secrets.responder_to_initiator),
        ChainKey::new(*secrets.initiator_to_responder),
        config,
    );

    info!(
        session = %secrets.id,
        suite = %init.suite,
        peer = %init.initiator.fingerprint(),
        "Accepted session"
    );

    Ok(session)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn identities() -> (KeyPair, KeyPair) {
        (KeyPair::generate().unwrap(), KeyPair::generate().unwrap())
    }

    #[test]
    fn test_both_sides_agree() {
        let (alice, bob) = identities();

        let (alice_session, init) =
            initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();
        let bob_session = accept(&bob, &init, SessionConfig::default()).unwrap();

        assert_eq!(alice_session.id(), bob_session.id());
        assert_eq!(alice_session.role(), Role::Initiator);
        assert_eq!(bob_session.role(), Role::Responder);
        assert_eq!(alice_session.remote_identity(), &bob.public_key());
        assert_eq!(bob_session.remote_identity(), &alice.public_key());
        assert_eq!(bob_session.suite(), Algorithm::XChaCha20Poly1305);
    }

    #[test]
    fn test_fresh_ephemeral_per_handshake() {
        let (alice, bob) = identities();

        let (s1, init1) = initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();
        let (s2, init2) = initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();

        assert_ne!(init1, init2);
        assert_ne!(s1.id(), s2.id());
    }

    #[test]
    fn test_wrong_responder_rejected() {
        let (alice, bob) = identities();
        let mallory = KeyPair::generate().unwrap();

        let (_, init) = initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();
        let result = accept(&mallory, &init, SessionConfig::default());
        assert!(matches!(result, Err(SessionError::NotForThisIdentity)));
    }

    #[test]
    fn test_suite_follows_initiator_config() {
        let (alice, bob) = identities();
        let config = SessionConfig {
            algorithm: Algorithm::Aes256Gcm,
            ..Default::default()
        };

        let (_, init) = initiate(&alice, &bob.public_key(), config).unwrap();
        assert_eq!(init.suite(), Algorithm::Aes256Gcm);

        let bob_session = accept(&bob, &init, SessionConfig::default()).unwrap();
        assert_eq!(bob_session.suite(), Algorithm::Aes256Gcm);
    }

    #[test]
    fn test_init_wire_format() {
        let (alice, bob) = identities();
        let (_, init) = initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();

        let bytes = init.to_bytes();
        assert_eq!(bytes.len(), HANDSHAKE_INIT_SIZE);
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], Algorithm::XChaCha20Poly1305.tag());
        assert_eq!(&bytes[2..34], alice.public_key().as_bytes());
        assert_eq!(&bytes[34..66], bob.public_key().as_bytes());

        assert_eq!(HandshakeInit::from_bytes(&bytes).unwrap(), init);
        assert_eq!(
            HandshakeInit::from_base64(&init.to_base64().unwrap()).unwrap(),
            init
        );
    }

    #[test]
    fn test_malformed_init_rejected() {
        let (alice, bob) = identities();
        let (_, init) = initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();
        let bytes = init.to_bytes();

        assert!(matches!(
            HandshakeInit::from_bytes(&bytes[..97]),
            Err(SessionError::InvalidHandshake(_))
        ));

        let mut wrong_version = bytes.clone();
        wrong_version[0] = 9;
        assert!(matches!(
            HandshakeInit::from_bytes(&wrong_version),
            Err(SessionError::UnsupportedVersion(9))
        ));

        let mut wrong_suite = bytes;
        wrong_suite[1] = 0x42;
        assert!(matches!(
            HandshakeInit::from_bytes(&wrong_suite),
            Err(SessionError::UnsupportedSuite(0x42))
        ));
    }

    #[test]
    fn test_tampered_ephemeral_diverges() {
        let (alice, bob) = identities();
        let (alice_session, init) =
            initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();

        let mut bytes = init.to_bytes();
        let other = KeyPair::generate().unwrap().public_key();
        bytes[66..98].copy_from_slice(other.as_bytes());
        let forged = HandshakeInit::from_bytes(&bytes).unwrap();

        let bob_session = accept(&bob, &forged, SessionConfig::default()).unwrap();
        assert_ne!(alice_session.id(), bob_session.id());
    }

    #[test]
    fn test_low_order_ephemeral_rejected() {
        let (alice, bob) = identities();
        let (_, init) = initiate(&alice, &bob.public_key(), SessionConfig::default()).unwrap();

        let mut bytes = init.to_bytes();
        bytes[66..98].fill(0);
        let forged = HandshakeInit::from_bytes(&bytes).unwrap();

        let err = accept(&bob, &forged, SessionConfig::default()).unwrap_err();
        assert_eq!(err.kind(), nimbus_crypto::NimbusError::KeyOperationFailed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (alice, bob) = identities();
        let config = SessionConfig {
            max_messages_per_chain: 0,
            ..Default::default()
        };
        assert!(matches!(
            initiate(&alice, &bob.public_key(), config),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_session_id_text_form() {
        let id = SessionId::from_bytes(&[0xABu8; SESSION_ID_SIZE]).unwrap();
        assert_eq!(id.to_string(), "ab".repeat(16));
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("zz".parse::<SessionId>().is_err());
        assert!("abab".parse::<SessionId>().is_err());
    }
}
