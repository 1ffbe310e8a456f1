//! # gatehouse-transport
//!
//! Transport abstraction layer for the Gatehouse room relay.
//!
//! This crate provides a unified interface for the transports a connection
//! can run over:
//!
//! - **WebSocket** - upgraded axum sockets, used by the server
//! - **Memory** - channel-backed pairs for tests and embedding
//!
//! ## Transport Abstraction
//!
//! Every transport implements [`Duplex`], which splits into a
//! [`FrameReader`] and a [`FrameWriter`] so that reading and writing can run
//! in separate tasks.
//!
//! ```rust,ignore
//! use gatehouse_transport::{Duplex, FrameReader};
//!
//! async fn drain(conn: impl Duplex) {
//!     let (mut reader, _writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.read_frame().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, Duplex, Frame, FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
