//! Envelope wire format.
//!
//! ```text
//! +---------+-------+------------+-------------+-------+------------+-----+
//! | version | suite | session_id | counter BE  | nonce | ciphertext | tag |
//! |   1     |   1   |    16      |     4       | 12/24 |     n      | 16  |
//! +---------+-------+------------+-------------+-------+------------+-----+
//! \_______________ header (22 bytes, AAD) ______/
//! ```

use nimbus_crypto::encoding::{decode_base64, encode_base64};
use nimbus_crypto::Algorithm;

use crate::error::{SessionError, SessionResult};
use crate::handshake::{SessionId, SESSION_ID_SIZE};
use crate::PROTOCOL_VERSION;

/// Size of the authenticated envelope header.
pub const ENVELOPE_HEADER_SIZE: usize = 2 + SESSION_ID_SIZE + 4;

/// One encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    suite: Algorithm,
    session_id: SessionId,
    counter: u32,
    payload: Vec<u8>,
}

impl Envelope {
    pub(crate) fn new(suite: Algorithm, session_id: SessionId, counter: u32, payload: Vec<u8>) -> Self {
        Self {
            suite,
            session_id,
            counter,
            payload,
        }
    }

    /// Builds the header that is authenticated as AAD.
    pub(crate) fn header_for(
        suite: Algorithm,
        session_id: &SessionId,
        counter: u32,
    ) -> [u8; ENVELOPE_HEADER_SIZE] {
        let mut header = [0u8; ENVELOPE_HEADER_SIZE];
        header[0] = PROTOCOL_VERSION;
        header[1] = suite.tag();
        header[2..2 + SESSION_ID_SIZE].copy_from_slice(session_id.as_bytes());
        header[2 + SESSION_ID_SIZE..].copy_from_slice(&counter.to_be_bytes());
        header
    }

    /// AEAD suite named in the header.
    pub fn suite(&self) -> Algorithm {
        self.suite
    }

    /// Session the envelope belongs to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Position of the message in the sender's chain.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// `nonce || ciphertext || tag`.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The authenticated header.
    pub fn header(&self) -> [u8; ENVELOPE_HEADER_SIZE] {
        Self::header_for(self.suite, &self.session_id, self.counter)
    }

    /// Encodes header and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes the binary form. Authentication happens on decryption.
    pub fn from_bytes(bytes: &[u8]) -> SessionResult<Self> {
        if bytes.len() < ENVELOPE_HEADER_SIZE {
            return Err(SessionError::InvalidEnvelope("truncated header"));
        }
        if bytes[0] != PROTOCOL_VERSION {
            return Err(SessionError::UnsupportedVersion(bytes[0]));
        }
        let suite =
            Algorithm::from_tag(bytes[1]).map_err(|_| SessionError::UnsupportedSuite(bytes[1]))?;

        let (header, payload) = bytes.split_at(ENVELOPE_HEADER_SIZE);
        if payload.len() < suite.overhead() {
            return Err(SessionError::InvalidEnvelope("truncated payload"));
        }

        let session_id = SessionId::from_bytes(&header[2..2 + SESSION_ID_SIZE])?;
        let mut counter = [0u8; 4];
        counter.copy_from_slice(&header[2 + SESSION_ID_SIZE..]);

        Ok(Self {
            suite,
            session_id,
            counter: u32::from_be_bytes(counter),
            payload: payload.to_vec(),
        })
    }

    /// Base64 text form.
    pub fn to_base64(&self) -> SessionResult<String> {
        Ok(encode_base64(&self.to_bytes())?)
    }

    /// Parses the Base64 text form.
    pub fn from_base64(encoded: &str) -> SessionResult<Self> {
        let bytes = decode_base64(encoded)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        let id = SessionId::from_bytes(&[7u8; SESSION_ID_SIZE]).unwrap();
        let payload = vec![0x5Au8; Algorithm::Aes256Gcm.overhead() + 3];
        Envelope::new(Algorithm::Aes256Gcm, id, 0x0102_0304, payload)
    }

    #[test]
    fn test_header_layout() {
        let header = sample().header();
        assert_eq!(header.len(), 22);
        assert_eq!(header[0], PROTOCOL_VERSION);
        assert_eq!(header[1], 0x01);
        assert_eq!(&header[2..18], &[7u8; 16]);
        assert_eq!(&header[18..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_encoded() {
        let envelope = sample();
        let bytes = envelope.to_bytes();
        assert_eq!(bytes.len(), ENVELOPE_HEADER_SIZE + envelope.payload().len());
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);

        let text = envelope.to_base64().unwrap();
        assert_eq!(Envelope::from_base64(&text).unwrap(), envelope);
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Envelope::from_bytes(&bytes[..10]),
            Err(SessionError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            Envelope::from_bytes(&bytes[..ENVELOPE_HEADER_SIZE + 20]),
            Err(SessionError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_unknown_version_and_suite() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 2;
        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(SessionError::UnsupportedVersion(2))
        ));

        bytes[0] = PROTOCOL_VERSION;
        bytes[1] = 0x09;
        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(SessionError::UnsupportedSuite(0x09))
        ));
    }

    #[test]
    fn test_bad_base64() {
        assert!(matches!(
            Envelope::from_base64("not base64!"),
            Err(SessionError::Crypto(_))
        ));
    }
}
