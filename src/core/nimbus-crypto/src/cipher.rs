//! Authenticated cipher implementations.
//!
//! [`CryptoCipher`] is the common interface for the AEAD algorithms Nimbus
//! supports. Callers that know the algorithm at compile time use the
//! implementations directly; the tagged formats in [`crate::aead`] dispatch
//! through them at runtime.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::aead::{Algorithm, KEY_SIZE};
use crate::error::{NimbusError, NimbusResult};
use crate::random::{fill_random, generate_key, NONCE_192_BIT_SIZE, NONCE_96_BIT_SIZE};

/// Symmetric cipher providing confidentiality and authenticity.
pub trait CryptoCipher {
    /// Key type used for encryption and decryption.
    type Key;
    /// Nonce type used for encryption and decryption.
    type Nonce: AsRef<[u8]>;

    /// Algorithm implemented by this cipher.
    const ALGORITHM: Algorithm;
    /// Size of the key in bytes.
    const KEY_SIZE: usize;
    /// Size of the nonce in bytes.
    const NONCE_SIZE: usize;

    /// Creates a key from raw bytes.
    fn key_from_bytes(key: &[u8]) -> NimbusResult<Self::Key>;

    /// Creates a nonce from raw bytes.
    fn nonce_from_bytes(nonce: &[u8]) -> NimbusResult<Self::Nonce>;

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    ///
    /// Returns `ciphertext || tag`.
    fn encrypt(
        key: &Self::Key,
        nonce: &Self::Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> NimbusResult<Vec<u8>>;

    /// Decrypts `ciphertext || tag` and verifies `aad`.
    fn decrypt(
        key: &Self::Key,
        nonce: &Self::Nonce,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> NimbusResult<Zeroizing<Vec<u8>>>;

    /// Generates a new random key.
    fn generate_key() -> NimbusResult<Self::Key>;

    /// Generates a new random nonce.
    fn generate_nonce() -> NimbusResult<Self::Nonce>;
}

fn key_array(key: &[u8]) -> NimbusResult<Zeroizing<[u8; KEY_SIZE]>> {
    if key.len() != KEY_SIZE {
        return Err(NimbusError::InvalidLength);
    }
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    bytes.copy_from_slice(key);
    Ok(bytes)
}

/// AES-256-GCM with 96-bit random nonces.
#[derive(Debug, Clone, Copy)]
pub struct Aes256GcmCipher;

impl CryptoCipher for Aes256GcmCipher {
    type Key = Zeroizing<[u8; KEY_SIZE]>;
    type Nonce = [u8; NONCE_96_BIT_SIZE];

    const ALGORITHM: Algorithm = Algorithm::Aes256Gcm;
    const KEY_SIZE: usize = KEY_SIZE;
    const NONCE_SIZE: usize = NONCE_96_BIT_SIZE;

    fn key_from_bytes(key: &[u8]) -> NimbusResult<Self::Key> {
        key_array(key)
    }

    fn nonce_from_bytes(nonce: &[u8]) -> NimbusResult<Self::Nonce> {
        nonce.try_into().map_err(|_| NimbusError::InvalidLength)
    }

    fn encrypt(
        key: &Self::Key,
        nonce: &Self::Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> NimbusResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|_| NimbusError::InvalidLength)?;
        cipher
            .encrypt(
                aes_gcm::Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| NimbusError::CryptographicFailure)
    }

    fn decrypt(
        key: &Self::Key,
        nonce: &Self::Nonce,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> NimbusResult<Zeroizing<Vec<u8>>> {
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|_| NimbusError::InvalidLength)?;
        cipher
            .decrypt(
                aes_gcm::Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| NimbusError::AuthenticationFailed)
    }

    fn generate_key() -> NimbusResult<Self::Key> {
        generate_key()
    }

    fn generate_nonce() -> NimbusResult<Self::Nonce> {
        let mut nonce = [0u8; NONCE_96_BIT_SIZE];
        fill_random(&mut nonce)?;
        Ok(nonce)
    }
}

/// XChaCha20-Poly1305 with 192-bit random nonces.
///
/// The extended nonce makes random nonces safe for a practically unbounded
/// number of messages under one key, so this is the default algorithm.
#[derive(Debug, Clone, Copy)]
pub struct XChaCha20Poly1305Cipher;

impl CryptoCipher for XChaCha20Poly1305Cipher {
    type Key = Zeroizing<[u8; KEY_SIZE]>;
    type Nonce = [u8; NONCE_192_BIT_SIZE];

    const ALGORITHM: Algorithm = Algorithm::XChaCha20Poly1305;
    const KEY_SIZE: usize = KEY_SIZE;
    const NONCE_SIZE: usize = NONCE_192_BIT_SIZE;

    fn key_from_bytes(key: &[u8]) -> NimbusResult<Self::Key> {
        key_array(key)
    }

    fn nonce_from_bytes(nonce: &[u8]) -> NimbusResult<Self::Nonce> {
        nonce.try_into().map_err(|_| NimbusError::InvalidLength)
    }

    fn encrypt(
        key: &Self::Key,
        nonce: &Self::Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> NimbusResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|_| NimbusError::InvalidLength)?;
        cipher
            .encrypt(
                XNonce::from_slice(nonce),
                chacha20poly1305::aead::Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| NimbusError::CryptographicFailure)
    }

    fn decrypt(
        key: &Self::Key,
        nonce: &Self::Nonce,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> NimbusResult<Zeroizing<Vec<u8>>> {
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|_| NimbusError::InvalidLength)?;
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                chacha20poly1305::aead::Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| NimbusError::AuthenticationFailed)
    }

    fn generate_key() -> NimbusResult<Self::Key> {
        generate_key()
    }

    fn generate_nonce() -> NimbusResult<Self::Nonce> {
        let mut nonce = [0u8; NONCE_192_BIT_SIZE];
        fill_random(&mut nonce)?;
        Ok(nonce)
    }
}
