//! # Nimbus Storage
//!
//! Storage abstraction for Nimbus key material.
//!
//! Backends store opaque byte values under `/`-separated string keys. Callers
//! are expected to encrypt values before they reach a backend; backends only
//! guarantee durability, prefix listing and best-effort erasure.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use memory::MemoryBackend;
