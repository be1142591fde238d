//! # Nimbus Keys
//!
//! Key lifecycle management: everything a device keeps long term.
//!
//! ## Features
//!
//! - Named symmetric keys with versioning, rotation schedules, retirement
//!   and destruction of individual versions
//! - Encrypt/decrypt, rewrap and data key generation under named keys
//! - X25519 identity keys for session handshakes
//! - Persistence of established sessions
//!
//! Every secret is wrapped before it reaches storage, under a key derived
//! from the [`MasterKey`](nimbus_crypto::MasterKey) and bound to the record
//! it protects.
//!
//! ## Ciphertext Format
//!
//! Data encrypted under a named key is encoded as `nimbus:v{version}:{base64}`,
//! so the key version needed for decryption travels with the ciphertext.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod policy;
pub mod store;

pub use error::{KeyError, KeyResult};
pub use policy::{
    DataKey, IdentityInfo, KeyInfo, KeyPolicy, KeyState, KeyUpdate, KeyVersionInfo, SessionInfo,
};
pub use store::KeyStore;
