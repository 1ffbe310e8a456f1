//! Transport abstraction traits for Gatehouse.
//!
//! A connection is split into a [`FrameReader`] and a [`FrameWriter`] so the
//! inbound and outbound pumps can each own one half and run concurrently.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A data frame as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Frame payload as bytes, regardless of the frame kind.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(data) => &data[..],
        }
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Incoming frame exceeds the configured limit.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next data frame.
    ///
    /// Control frames are handled internally. Returns `None` if the
    /// connection is closed cleanly.
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a data frame.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send a close frame and shut the sending half down.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A bidirectional connection that can be split into independent halves.
pub trait Duplex: Send + 'static {
    /// Receiving half.
    type Reader: FrameReader + 'static;
    /// Sending half.
    type Writer: FrameWriter + 'static;

    /// Split the connection.
    fn split(self) -> (Self::Reader, Self::Writer);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[test]
    fn test_frame_bytes() {
        let text = Frame::from("hello");
        let binary = Frame::Binary(Bytes::from_static(b"hello"));
        assert_eq!(text.as_bytes(), binary.as_bytes());
        assert_eq!(text.len(), 5);
        assert!(Frame::from("").is_empty());
    }
}
