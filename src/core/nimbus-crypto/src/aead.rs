//! Authenticated encryption with associated data (AEAD).
//!
//! Two layouts are produced here:
//!
//! - **untagged**: `nonce || ciphertext || tag`, for callers that already
//!   record the algorithm elsewhere (the session envelope header does).
//! - **tagged**: `algorithm_tag (1 byte) || nonce || ciphertext || tag`,
//!   self-describing, used for material stored at rest.
//!
//! Tag `0x01` is AES-256-GCM (12-byte nonce), tag `0x02` is
//! XChaCha20-Poly1305 (24-byte nonce). Both use 32-byte keys and 16-byte
//! authentication tags. A fresh random nonce is generated per call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::cipher::{Aes256GcmCipher, CryptoCipher, XChaCha20Poly1305Cipher};
use crate::error::{NimbusError, NimbusResult};
use crate::keys::SymmetricKey;

/// Size of a symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of an authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Supported AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// AES-256-GCM (hardware accelerated on most desktop CPUs).
    Aes256Gcm,
    /// XChaCha20-Poly1305 (constant-time in software, safe random nonces).
    #[default]
    XChaCha20Poly1305,
}

impl Algorithm {
    /// Wire tag identifying the algorithm.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Aes256Gcm => 0x01,
            Self::XChaCha20Poly1305 => 0x02,
        }
    }

    /// Resolves a wire tag.
    pub fn from_tag(tag: u8) -> NimbusResult<Self> {
        match tag {
            0x01 => Ok(Self::Aes256Gcm),
            0x02 => Ok(Self::XChaCha20Poly1305),
            _ => Err(NimbusError::InvalidInput),
        }
    }

    /// Nonce size in bytes.
    pub const fn nonce_size(self) -> usize {
        match self {
            Self::Aes256Gcm => Aes256GcmCipher::NONCE_SIZE,
            Self::XChaCha20Poly1305 => XChaCha20Poly1305Cipher::NONCE_SIZE,
        }
    }

    /// Bytes added to a plaintext by [`encrypt`].
    pub const fn overhead(self) -> usize {
        self.nonce_size() + TAG_SIZE
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes256Gcm => write!(f, "aes256-gcm"),
            Self::XChaCha20Poly1305 => write!(f, "xchacha20-poly1305"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = NimbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes256-gcm" => Ok(Self::Aes256Gcm),
            "xchacha20-poly1305" => Ok(Self::XChaCha20Poly1305),
            _ => Err(NimbusError::InvalidInput),
        }
    }
}

fn encrypt_with<C>(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> NimbusResult<Vec<u8>>
where
    C: CryptoCipher,
{
    let cipher_key = C::key_from_bytes(key.as_bytes())?;
    let nonce = C::generate_nonce()?;
    let ciphertext = C::encrypt(&cipher_key, &nonce, plaintext, aad)?;

    let mut output = Vec::with_capacity(C::NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(nonce.as_ref());
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt_with<C>(key: &SymmetricKey, data: &[u8], aad: &[u8]) -> NimbusResult<Zeroizing<Vec<u8>>>
where
    C: CryptoCipher,
{
    if data.len() < C::NONCE_SIZE + TAG_SIZE {
        return Err(NimbusError::InvalidLength);
    }

    let cipher_key = C::key_from_bytes(key.as_bytes())?;
    let (nonce_bytes, ciphertext) = data.split_at(C::NONCE_SIZE);
    let nonce = C::nonce_from_bytes(nonce_bytes)?;
    C::decrypt(&cipher_key, &nonce, ciphertext, aad)
}

/// Encrypts `plaintext` with a random nonce.
///
/// Output format: `nonce || ciphertext || tag`.
pub fn encrypt(
    algorithm: Algorithm,
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: &[u8],
) -> NimbusResult<Vec<u8>> {
    match algorithm {
        Algorithm::Aes256Gcm => encrypt_with::<Aes256GcmCipher>(key, plaintext, aad),
        Algorithm::XChaCha20Poly1305 => {
            encrypt_with::<XChaCha20Poly1305Cipher>(key, plaintext, aad)
        },
    }
}

/// Decrypts data produced by [`encrypt`].
///
/// The plaintext is wrapped in `Zeroizing` for automatic memory cleanup.
pub fn decrypt(
    algorithm: Algorithm,
    key: &SymmetricKey,
    data: &[u8],
    aad: &[u8],
) -> NimbusResult<Zeroizing<Vec<u8>>> {
    match algorithm {
        Algorithm::Aes256Gcm => decrypt_with::<Aes256GcmCipher>(key, data, aad),
        Algorithm::XChaCha20Poly1305 => decrypt_with::<XChaCha20Poly1305Cipher>(key, data, aad),
    }
}

/// Encrypts `plaintext` into the self-describing tagged format.
///
/// Output format: `algorithm_tag || nonce || ciphertext || tag`.
pub fn seal(
    algorithm: Algorithm,
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: &[u8],
) -> NimbusResult<Vec<u8>> {
    let body = encrypt(algorithm, key, plaintext, aad)?;

    let mut output = Vec::with_capacity(1 + body.len());
    output.push(algorithm.tag());
    output.extend_from_slice(&body);
    Ok(output)
}

/// Decrypts data produced by [`seal`], dispatching on the algorithm tag.
pub fn open(key: &SymmetricKey, sealed: &[u8], aad: &[u8]) -> NimbusResult<Zeroizing<Vec<u8>>> {
    let (&tag, body) = sealed.split_first().ok_or(NimbusError::InvalidLength)?;
    let algorithm = Algorithm::from_tag(tag)?;
    decrypt(algorithm, key, body, aad)
}

/// Returns the algorithm recorded in a sealed blob without decrypting it.
pub fn sealed_algorithm(sealed: &[u8]) -> NimbusResult<Algorithm> {
    let tag = sealed.first().ok_or(NimbusError::InvalidLength)?;
    Algorithm::from_tag(*tag)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    const BOTH: [Algorithm; 2] = [Algorithm::Aes256Gcm, Algorithm::XChaCha20Poly1305];

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        for alg in BOTH {
            let key = SymmetricKey::generate().unwrap();
            let ciphertext = encrypt(alg, &key, b"Hello, Nimbus!", b"").unwrap();
            let decrypted = decrypt(alg, &key, &ciphertext, b"").unwrap();
            assert_eq!(&*decrypted, b"Hello, Nimbus!");
        }
    }

    #[test]
    fn test_ciphertext_format() {
        for alg in BOTH {
            let key = SymmetricKey::generate().unwrap();
            let ciphertext = encrypt(alg, &key, b"test", b"").unwrap();
            assert_eq!(ciphertext.len(), alg.overhead() + 4);

            let sealed = seal(alg, &key, b"test", b"").unwrap();
            assert_eq!(sealed[0], alg.tag());
            assert_eq!(sealed.len(), 1 + alg.overhead() + 4);
        }
    }

    #[test]
    fn test_seal_open_with_aad() {
        for alg in BOTH {
            let key = SymmetricKey::generate().unwrap();
            let sealed = seal(alg, &key, b"secret data", b"record:1").unwrap();
            assert_eq!(sealed_algorithm(&sealed).unwrap(), alg);

            let opened = open(&key, &sealed, b"record:1").unwrap();
            assert_eq!(&*opened, b"secret data");

            let wrong = open(&key, &sealed, b"record:2");
            assert_eq!(wrong.unwrap_err(), NimbusError::AuthenticationFailed);
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = SymmetricKey::generate().unwrap();
        let key2 = SymmetricKey::generate().unwrap();

        let sealed = seal(Algorithm::default(), &key1, b"secret", b"").unwrap();
        let result = open(&key2, &sealed, b"");
        assert_eq!(result.unwrap_err(), NimbusError::AuthenticationFailed);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        for alg in BOTH {
            let key = SymmetricKey::generate().unwrap();
            let mut ciphertext = encrypt(alg, &key, b"secret data", b"").unwrap();
            let last = ciphertext.len() - 1;
            ciphertext[alg.nonce_size()] ^= 0xFF;
            ciphertext[last] ^= 0x01;

            let result = decrypt(alg, &key, &ciphertext, b"");
            assert_eq!(result.unwrap_err(), NimbusError::AuthenticationFailed);
        }
    }

    #[test]
    fn test_truncated_input() {
        let key = SymmetricKey::generate().unwrap();

        let result = decrypt(Algorithm::Aes256Gcm, &key, &[0u8; 27], b"");
        assert_eq!(result.unwrap_err(), NimbusError::InvalidLength);

        let result = open(&key, &[], b"");
        assert_eq!(result.unwrap_err(), NimbusError::InvalidLength);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let key = SymmetricKey::generate().unwrap();
        let mut sealed = seal(Algorithm::Aes256Gcm, &key, b"x", b"").unwrap();
        sealed[0] = 0x7F;

        assert_eq!(open(&key, &sealed, b"").unwrap_err(), NimbusError::InvalidInput);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = SymmetricKey::generate().unwrap();
        let sealed = seal(Algorithm::XChaCha20Poly1305, &key, b"", b"").unwrap();
        assert!(open(&key, &sealed, b"").unwrap().is_empty());
    }

    #[test]
    fn test_algorithm_text_form() {
        for alg in BOTH {
            let parsed: Algorithm = alg.to_string().parse().unwrap();
            assert_eq!(parsed, alg);
        }
        assert!("rot13".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::default(), Algorithm::XChaCha20Poly1305);
    }

    #[test]
    fn test_algorithm_serde_names() {
        let json = serde_json::to_string(&Algorithm::Aes256Gcm).unwrap();
        assert_eq!(json, "\"aes256-gcm\"");
    }
}
