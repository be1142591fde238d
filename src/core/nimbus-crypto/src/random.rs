//! Cryptographically secure random generation.
//!
//! Uses the operating system's CSPRNG. Every generator is fallible: an
//! unavailable entropy source surfaces as
//! [`NimbusError::RandomGenerationFailed`] instead of a panic.

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::aead::KEY_SIZE;
use crate::error::{NimbusError, NimbusResult};

/// Nonce size for 96-bit nonces (AES-GCM).
pub const NONCE_96_BIT_SIZE: usize = 12;

/// Nonce size for 192-bit nonces (XChaCha20-Poly1305).
pub const NONCE_192_BIT_SIZE: usize = 24;

/// A secure random number generator that can fail gracefully.
pub trait SecureRandomSource {
    /// Error reported by the underlying generator.
    type Error;

    /// Fills `dest` with cryptographically secure random bytes.
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Self::Error>;

    /// Generates a cryptographically secure random `u64`.
    fn try_next_u64(&mut self) -> Result<u64, Self::Error>;
}

impl SecureRandomSource for OsRng {
    type Error = rand::Error;

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Self::Error> {
        RngCore::try_fill_bytes(self, dest)
    }

    fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
        let mut buf = [0u8; 8];
        RngCore::try_fill_bytes(self, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

fn secure_fill<R: SecureRandomSource>(rng: &mut R, dest: &mut [u8]) -> NimbusResult<()> {
    rng.try_fill_bytes(dest)
        .map_err(|_| NimbusError::RandomGenerationFailed)
}

fn secure_random_bytes<R: SecureRandomSource>(
    rng: &mut R,
    byte_count: usize,
) -> NimbusResult<Vec<u8>> {
    let mut buffer = vec![0u8; byte_count];
    secure_fill(rng, &mut buffer)?;
    Ok(buffer)
}

fn secure_random_u64<R: SecureRandomSource>(rng: &mut R) -> NimbusResult<u64> {
    rng.try_next_u64()
        .map_err(|_| NimbusError::RandomGenerationFailed)
}

/// Fills the given buffer with secure random bytes.
pub fn fill_random(dest: &mut [u8]) -> NimbusResult<()> {
    secure_fill(&mut OsRng, dest)
}

/// Generates `len` secure random bytes.
pub fn generate_bytes(len: usize) -> NimbusResult<Vec<u8>> {
    secure_random_bytes(&mut OsRng, len)
}

/// Generates a random 256-bit key.
///
/// The key is wrapped in `Zeroizing` to ensure it is cleared from memory when dropped.
pub fn generate_key() -> NimbusResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    secure_fill(&mut OsRng, &mut key[..])?;
    Ok(key)
}

/// Generates a random nonce of `byte_count` bytes.
pub fn generate_nonce(byte_count: usize) -> NimbusResult<Vec<u8>> {
    secure_random_bytes(&mut OsRng, byte_count)
}

/// Generates a 96-bit nonce suitable for AES-GCM.
pub fn generate_aes_gcm_nonce() -> NimbusResult<Vec<u8>> {
    generate_nonce(NONCE_96_BIT_SIZE)
}

/// Generates a 192-bit nonce suitable for XChaCha20-Poly1305.
pub fn generate_extended_nonce() -> NimbusResult<Vec<u8>> {
    generate_nonce(NONCE_192_BIT_SIZE)
}

/// Generates a cryptographically secure random `u64`.
pub fn generate_random_u64() -> NimbusResult<u64> {
    secure_random_u64(&mut OsRng)
}
