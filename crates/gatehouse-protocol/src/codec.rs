//! Codec for encoding and decoding Gatehouse envelopes.
//!
//! Envelopes travel as one JSON document per transport frame. Decoding checks
//! the frame size first, then the tags, then the payload fields.

use thiserror::Error;

use crate::envelope::Envelope;

/// Default maximum frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope parsed but its payload is invalid.
    #[error("Invalid envelope: {0}")]
    Invalid(&'static str),
}

/// Encode an envelope to its JSON text form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode an envelope from a frame using the default size limit.
///
/// # Errors
///
/// Returns an error if the frame is too large, malformed, or invalid.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    decode_with_limit(data, MAX_FRAME_SIZE)
}

/// Decode an envelope from a frame, rejecting frames above `max_frame_size`.
///
/// # Errors
///
/// Returns an error if the frame is too large, malformed, or invalid.
pub fn decode_with_limit(data: &[u8], max_frame_size: usize) -> Result<Envelope, ProtocolError> {
    if data.len() > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: data.len(),
            max: max_frame_size,
        });
    }

    let envelope: Envelope = serde_json::from_slice(data)?;
    envelope.validate().map_err(ProtocolError::Invalid)?;
    Ok(envelope)
}

/// Envelope codec carrying its own size limit.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl EnvelopeCodec {
    /// Create a new codec instance with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Maximum accepted frame size in bytes.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<String, ProtocolError> {
        encode(envelope)
    }

    /// Decode an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        decode_with_limit(data, self.max_frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeKind, Status};

    #[test]
    fn test_decode_client_decision() {
        let text = r#"{"type":"join-room","status":"approved","data":{"room_id":"42","username":"grape-40213"},"is_owner":true}"#;
        let envelope = decode(text.as_bytes()).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::JoinRoom);
        assert_eq!(envelope.status, Status::Approved);
        assert_eq!(envelope.room_id(), "42");
        assert_eq!(envelope.username(), "grape-40213");
    }

    #[test]
    fn test_encode_decode_preserves_envelope() {
        let envelope = Envelope::join_pending("42", "kiwi-10001");
        let encoded = encode(&envelope).unwrap();
        assert_eq!(decode(encoded.as_bytes()).unwrap(), envelope);
    }

    #[test]
    fn test_decode_missing_data() {
        let text = r#"{"type":"join-room","status":"pending","is_owner":false}"#;
        match decode(text.as_bytes()) {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_room() {
        let text = r#"{"type":"join-room","status":"pending","data":{"room_id":"","username":"a"},"is_owner":false}"#;
        match decode(text.as_bytes()) {
            Err(ProtocolError::Invalid(_)) => {}
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let codec = EnvelopeCodec::with_max_frame_size(16);
        let encoded = encode(&Envelope::join_pending("42", "kiwi-10001")).unwrap();

        match codec.decode(encoded.as_bytes()) {
            Err(ProtocolError::FrameTooLarge { max: 16, .. }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode(b"not json"), Err(ProtocolError::Json(_))));
    }
}
