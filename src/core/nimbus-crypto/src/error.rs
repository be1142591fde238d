//! Cryptographic error types.
//!
//! The taxonomy is intentionally coarse: variants carry no payload so that
//! an error can never echo key material, plaintext or partial secrets back
//! to the caller.

use thiserror::Error;

/// Result type used across the Nimbus crates.
pub type NimbusResult<T> = Result<T, NimbusError>;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum NimbusError {
    /// A cryptographic primitive failed for an internal reason.
    #[error("cryptographic operation failed")]
    CryptographicFailure,

    /// Authentication tag, verifier or peer check did not match.
    #[error("authentication verification failed")]
    AuthenticationFailed,

    /// Key generation, agreement or derivation failed.
    #[error("key operation failed")]
    KeyOperationFailed,

    /// Malformed or unsupported input.
    #[error("invalid input provided")]
    InvalidInput,

    /// Input had the wrong size.
    #[error("invalid data length")]
    InvalidLength,

    /// The secure random source could not produce bytes.
    #[error("secure random generation failed")]
    RandomGenerationFailed,

    /// Failure outside of cryptography (storage, clock, I/O).
    #[error("system operation failed")]
    SystemError,
}
