//! # Nimbus Session
//!
//! End-to-end encrypted sessions between two X25519 identities.
//!
//! A session is established with a one-message handshake
//! ([`handshake::initiate`] / [`handshake::accept`]) and then carries
//! messages as [`Envelope`]s. Each direction has its own chain key; every
//! message consumes a fresh message key, so compromising the current chain
//! state does not expose earlier messages.
//!
//! ```text
//! Alice                                   Bob
//!   initiate(alice_id, bob_pub) ──HandshakeInit──▶ accept(bob_id, init)
//!   encrypt(msg) ───────────────Envelope──────────▶ decrypt(env)
//!   decrypt(env) ◀──────────────Envelope─────────── encrypt(reply)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod session;

pub use config::SessionConfig;
pub use envelope::Envelope;
pub use error::SessionError;
pub use handshake::{accept, initiate, HandshakeInit, Role, SessionId};
pub use session::{Session, SessionSnapshot};

/// Version byte carried by handshakes and envelopes.
pub const PROTOCOL_VERSION: u8 = 1;
