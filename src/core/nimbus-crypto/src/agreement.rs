//! X25519 key agreement.
//!
//! [`KeyPair`] holds a static X25519 secret and is used both for long-term
//! identities and for per-handshake ephemeral keys.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::encoding::decode_base64;
use crate::error::{NimbusError, NimbusResult};
use crate::random::fill_random;

/// Size of an X25519 public key, secret key or shared secret.
pub const X25519_KEY_SIZE: usize = 32;

/// An X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; X25519_KEY_SIZE]);

impl PublicKey {
    /// Creates a public key from exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> NimbusResult<Self> {
        let bytes: [u8; X25519_KEY_SIZE] =
            bytes.try_into().map_err(|_| NimbusError::InvalidLength)?;
        Ok(Self(bytes))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.0
    }

    /// Encodes the key as padded standard Base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parses a key from its Base64 form.
    pub fn from_base64(encoded: &str) -> NimbusResult<Self> {
        let bytes = decode_base64(encoded)?;
        Self::from_bytes(&bytes)
    }

    /// Short hex fingerprint (first 16 bytes of SHA-256) for out-of-band
    /// verification.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..16])
    }

    /// Compares two public keys in constant time.
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// An X25519 key pair.
///
/// The secret half is zeroized on drop by `x25519-dalek`.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the OS random source.
    pub fn generate() -> NimbusResult<Self> {
        let mut seed = Zeroizing::new([0u8; X25519_KEY_SIZE]);
        fill_random(&mut seed[..])?;
        Ok(Self::from_secret(StaticSecret::from(*seed)))
    }

    /// Restores a key pair from its 32 secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> NimbusResult<Self> {
        let mut raw = Zeroizing::new([0u8; X25519_KEY_SIZE]);
        if bytes.len() != X25519_KEY_SIZE {
            return Err(NimbusError::InvalidLength);
        }
        raw.copy_from_slice(bytes);
        Ok(Self::from_secret(StaticSecret::from(*raw)))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey(DalekPublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Returns the public half.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Exports the secret bytes for wrapped persistence.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; X25519_KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Computes the X25519 shared secret with `peer`.
    ///
    /// Fails with [`NimbusError::KeyOperationFailed`] when the peer key is a
    /// low-order point, which would yield an all-zero secret.
    pub fn diffie_hellman(
        &self,
        peer: &PublicKey,
    ) -> NimbusResult<Zeroizing<[u8; X25519_KEY_SIZE]>> {
        let shared = self
            .secret
            .diffie_hellman(&DalekPublicKey::from(peer.0));
        if !shared.was_contributory() {
            return Err(NimbusError::KeyOperationFailed);
        }
        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
