//! Secret key types.
//!
//! Both types zeroize on drop, never print their bytes in `Debug`, and
//! compare in constant time.

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::KEY_SIZE;
use crate::error::{NimbusError, NimbusResult};
use crate::random::generate_key;

macro_rules! secret_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Zeroize, ZeroizeOnDrop)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl $name {
            /// Generates a fresh random key.
            pub fn generate() -> NimbusResult<Self> {
                let key = generate_key()?;
                Ok(Self { bytes: *key })
            }

            /// Creates a key from exactly 32 raw bytes.
            pub fn from_bytes(bytes: &[u8]) -> NimbusResult<Self> {
                let bytes: [u8; KEY_SIZE] =
                    bytes.try_into().map_err(|_| NimbusError::InvalidLength)?;
                Ok(Self { bytes })
            }

            /// Returns the raw key bytes.
            #[inline]
            pub fn as_bytes(&self) -> &[u8] {
                &self.bytes
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.bytes[..].ct_eq(&other.bytes[..]).into()
            }
        }

        impl Eq for $name {}

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

secret_key!(
    /// A 256-bit symmetric key for AEAD encryption or chain derivation.
    SymmetricKey
);

secret_key!(
    /// The root key of a device keystore.
    ///
    /// It is generated once at initialization, stored only in wrapped form
    /// and held in memory while the seal is open.
    MasterKey
);

impl MasterKey {
    /// Derives a purpose-bound symmetric key with HKDF-SHA256.
    pub fn derive(&self, info: &[u8]) -> NimbusResult<SymmetricKey> {
        let derived = crate::kdf::derive_encryption_key(&self.bytes, info)?;
        SymmetricKey::from_bytes(&derived[..])
    }
}
