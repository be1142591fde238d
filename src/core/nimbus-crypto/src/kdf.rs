//! HKDF-SHA256 key derivation (RFC 5869).
//!
//! Every derivation in Nimbus goes through here: session chain keys from the
//! handshake secret, message keys from chain keys, wrapping keys from the
//! master key. Distinct `info` strings keep those key spaces separate.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::KEY_SIZE;
use crate::error::{NimbusError, NimbusResult};

/// Largest output HKDF-SHA256 can produce.
pub const MAX_OUTPUT_SIZE: usize = 255 * 32;

/// Derives `length` bytes with HKDF-SHA256.
///
/// # Arguments
///
/// * `ikm` - Input key material
/// * `salt` - Optional salt; `None` uses a zero-filled salt
/// * `info` - Context string binding the output to one purpose
/// * `length` - Output size, between 1 and [`MAX_OUTPUT_SIZE`]
pub fn derive_key(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    length: usize,
) -> NimbusResult<Zeroizing<Vec<u8>>> {
    if length == 0 || length > MAX_OUTPUT_SIZE {
        return Err(NimbusError::InvalidInput);
    }

    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hkdf.expand(info, &mut okm)
        .map_err(|_| NimbusError::KeyOperationFailed)?;

    Ok(okm)
}

/// Derives a single 32-byte key with no salt.
pub fn derive_encryption_key(
    secret: &[u8],
    info: &[u8],
) -> NimbusResult<Zeroizing<[u8; KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(None, secret);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, &mut key[..])
        .map_err(|_| NimbusError::KeyOperationFailed)?;
    Ok(key)
}

/// Derives one 32-byte key per `info` string.
pub fn derive_multiple_keys(
    secret: &[u8],
    infos: &[&[u8]],
) -> NimbusResult<Vec<Zeroizing<[u8; KEY_SIZE]>>> {
    infos
        .iter()
        .map(|info| derive_encryption_key(secret, info))
        .collect()
}

/// Derives two independent 32-byte keys from one HKDF expansion.
///
/// The first half of the 64-byte output becomes the first key.
pub fn derive_key_pair(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> NimbusResult<(Zeroizing<[u8; KEY_SIZE]>, Zeroizing<[u8; KEY_SIZE]>)> {
    let okm = derive_key(ikm, salt, info, KEY_SIZE * 2)?;

    let mut first = Zeroizing::new([0u8; KEY_SIZE]);
    let mut second = Zeroizing::new([0u8; KEY_SIZE]);
    first.copy_from_slice(&okm[..KEY_SIZE]);
    second.copy_from_slice(&okm[KEY_SIZE..]);
    Ok((first, second))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let key1 = derive_key(b"ikm", Some(b"salt"), b"info", 32).unwrap();
        let key2 = derive_key(b"ikm", Some(b"salt"), b"info", 32).unwrap();
        assert_eq!(*key1, *key2);
    }

    #[test]
    fn test_info_and_salt_separate_outputs() {
        let base = derive_key(b"ikm", Some(b"salt"), b"info", 32).unwrap();
        let other_info = derive_key(b"ikm", Some(b"salt"), b"other", 32).unwrap();
        let other_salt = derive_key(b"ikm", Some(b"pepper"), b"info", 32).unwrap();

        assert_ne!(*base, *other_info);
        assert_ne!(*base, *other_salt);
    }

    #[test]
    fn test_output_length_bounds() {
        assert_eq!(
            derive_key(b"ikm", None, b"info", 0).unwrap_err(),
            NimbusError::InvalidInput
        );
        assert_eq!(
            derive_key(b"ikm", None, b"info", MAX_OUTPUT_SIZE + 1).unwrap_err(),
            NimbusError::InvalidInput
        );
        assert_eq!(
            derive_key(b"ikm", None, b"info", MAX_OUTPUT_SIZE).unwrap().len(),
            MAX_OUTPUT_SIZE
        );
    }

    #[test]
    fn test_encryption_key_matches_generic_derivation() {
        let fixed = derive_encryption_key(b"master", b"ctx").unwrap();
        let generic = derive_key(b"master", None, b"ctx", KEY_SIZE).unwrap();
        assert_eq!(&fixed[..], &generic[..]);
    }

    #[test]
    fn test_derive_multiple_keys() {
        let infos: &[&[u8]] = &[b"key1", b"key2", b"key3"];
        let keys = derive_multiple_keys(b"master secret", infos).unwrap();

        assert_eq!(keys.len(), 3);
        assert_ne!(*keys[0], *keys[1]);
        assert_ne!(*keys[1], *keys[2]);
    }

    #[test]
    fn test_derive_key_pair_halves() {
        let (a, b) = derive_key_pair(b"shared", Some(b"salt"), b"chains").unwrap();
        let full = derive_key(b"shared", Some(b"salt"), b"chains", 64).unwrap();

        assert_eq!(&a[..], &full[..32]);
        assert_eq!(&b[..], &full[32..]);
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_hkdf_rfc5869_test_vector() {
        let ikm = hex::decode("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b").unwrap();
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = derive_key(&ikm, Some(&salt), &info, 42).unwrap();

        let expected = hex::decode(
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865",
        )
        .unwrap();
        assert_eq!(&*okm, &expected);
    }
}
