//! Text encodings for binary data.
//!
//! Public keys, handshake messages and envelopes travel as Base64 text when
//! the transport cannot carry bytes. The standard padded alphabet is used.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{NimbusError, NimbusResult};

/// Largest input accepted by [`Base64`] encoding.
pub const BASE64_MAX_INPUT_SIZE: usize = usize::MAX / 4;

/// A reversible binary-to-text encoding.
pub trait Encoder {
    /// Error reported by the encoder.
    type Error;

    /// Encodes `data` as text.
    ///
    /// # Errors
    ///
    /// Returns an error if the input exceeds [`Encoder::max_input_size`].
    fn encode(&self, data: &[u8]) -> Result<String, Self::Error>;

    /// Decodes text produced by [`Encoder::encode`].
    fn decode(&self, data: &str) -> Result<Vec<u8>, Self::Error>;

    /// Largest input `encode` accepts.
    fn max_input_size(&self) -> usize;
}

/// Standard padded Base64 (RFC 4648 section 4).
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64;

impl Encoder for Base64 {
    type Error = NimbusError;

    fn encode(&self, data: &[u8]) -> Result<String, Self::Error> {
        if data.len() > self.max_input_size() {
            return Err(NimbusError::InvalidLength);
        }
        Ok(STANDARD.encode(data))
    }

    fn decode(&self, data: &str) -> Result<Vec<u8>, Self::Error> {
        STANDARD
            .decode(data.trim())
            .map_err(|_| NimbusError::InvalidInput)
    }

    fn max_input_size(&self) -> usize {
        BASE64_MAX_INPUT_SIZE
    }
}

fn encode_with<E>(encoder: &E, data: &[u8]) -> NimbusResult<String>
where
    E: Encoder<Error = NimbusError>,
{
    encoder.encode(data)
}

fn decode_with<E>(encoder: &E, data: &str) -> NimbusResult<Vec<u8>>
where
    E: Encoder<Error = NimbusError>,
{
    encoder.decode(data)
}

/// Encodes bytes as a Base64 string.
///
/// # Errors
///
/// Returns [`NimbusError::InvalidLength`] if the input is too large.
pub fn encode_base64(data: &[u8]) -> NimbusResult<String> {
    encode_with(&Base64, data)
}

/// Decodes a Base64 string. Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`NimbusError::InvalidInput`] for malformed Base64.
pub fn decode_base64(data: &str) -> NimbusResult<Vec<u8>> {
    decode_with(&Base64, data)
}
