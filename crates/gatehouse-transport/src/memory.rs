//! In-memory transport.
//!
//! [`pair`] returns a [`MemoryTransport`] that plays the server side of a
//! connection and a [`MemoryPeer`] that plays the client. Used by the pump and
//! hub tests, and handy for embedding the relay without a network stack.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{Duplex, Frame, FrameReader, FrameWriter, TransportError};

/// What the server side wrote, as observed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A data frame.
    Frame(Frame),
    /// The server sent a close frame.
    Close,
}

/// Create a connected transport/peer pair with the given buffer capacity.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryTransport, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

    (
        MemoryTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
        },
        MemoryPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        },
    )
}

/// Server side of an in-memory connection.
pub struct MemoryTransport {
    inbound: mpsc::Receiver<Result<Frame, TransportError>>,
    outbound: mpsc::Sender<Delivery>,
}

impl Duplex for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader {
                inbound: self.inbound,
            },
            MemoryWriter {
                outbound: self.outbound,
                closed: false,
            },
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Receiving half of an in-memory connection.
pub struct MemoryReader {
    inbound: mpsc::Receiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Sending half of an in-memory connection.
pub struct MemoryWriter {
    outbound: mpsc::Sender<Delivery>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(Delivery::Frame(frame))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.outbound
            .send(Delivery::Close)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::Sender<Result<Frame, TransportError>>>,
    outbound: mpsc::Receiver<Delivery>,
}

impl MemoryPeer {
    /// Send a frame to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer already disconnected or the server side
    /// dropped its reader.
    pub async fn send(&self, frame: impl Into<Frame>) -> Result<(), TransportError> {
        let inbound = self.inbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        inbound
            .send(Ok(frame.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Make the server side's next read fail with `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side dropped its reader.
    pub async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        let inbound = self.inbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        inbound
            .send(Err(error))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Hang up. The server side reads a clean end of stream.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next thing the server side wrote.
    ///
    /// Returns `None` once the server side dropped its writer.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.outbound.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_to_server() {
        let (transport, peer) = pair(8);
        let (mut reader, _writer) = transport.split();

        peer.send("hello").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::from("hello")));
    }

    #[tokio::test]
    async fn test_server_to_peer_and_close() {
        let (transport, mut peer) = pair(8);
        let (_reader, mut writer) = transport.split();

        writer.write_frame(Frame::from("hi")).await.unwrap();
        writer.close().await.unwrap();
        // Closing twice is a no-op
        writer.close().await.unwrap();

        assert_eq!(peer.recv().await, Some(Delivery::Frame(Frame::from("hi"))));
        assert_eq!(peer.recv().await, Some(Delivery::Close));
        assert!(writer.write_frame(Frame::from("late")).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let (transport, mut peer) = pair(8);
        let (mut reader, _writer) = transport.split();

        peer.disconnect();
        assert_eq!(reader.read_frame().await.unwrap(), None);
        assert!(peer.send("after").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let (transport, peer) = pair(8);
        let (mut reader, _writer) = transport.split();

        peer.fail(TransportError::ReceiveFailed("reset".into()))
            .await
            .unwrap();
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }
}
