//! # Nimbus Crypto
//!
//! Core cryptographic primitives for the Nimbus end-to-end encryption toolkit.
//!
//! This crate provides low-level cryptographic operations including:
//! - Authenticated encryption (AES-256-GCM, XChaCha20-Poly1305)
//! - Key agreement (X25519)
//! - Key derivation (HKDF-SHA256)
//! - Secure random generation
//! - Constant-time comparison and Base64 encoding helpers
//!
//! Every secret type zeroizes itself on drop and redacts itself in `Debug`
//! output.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod agreement;
pub mod cipher;
pub mod constant_time;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod random;

pub use aead::Algorithm;
pub use agreement::{KeyPair, PublicKey};
pub use cipher::{Aes256GcmCipher, CryptoCipher, XChaCha20Poly1305Cipher};
pub use constant_time::ct_eq;
pub use error::{NimbusError, NimbusResult};
pub use keys::{MasterKey, SymmetricKey};
