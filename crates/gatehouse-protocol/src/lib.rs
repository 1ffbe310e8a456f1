//! # gatehouse-protocol
//!
//! Wire protocol definitions for the Gatehouse room relay.
//!
//! Every frame on the wire carries one JSON [`Envelope`]:
//!
//! ```json
//! {
//!   "type": "create-room" | "join-room",
//!   "status": "success" | "pending" | "approved" | "rejected",
//!   "data": { "room_id": "42", "username": "kiwi-12345" },
//!   "is_owner": true
//! }
//! ```
//!
//! ## Example
//!
//! ```rust
//! use gatehouse_protocol::{codec, Envelope};
//!
//! let envelope = Envelope::approve("42", "kiwi-12345");
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(encoded.as_bytes()).unwrap();
//! assert_eq!(envelope, decoded);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, EnvelopeCodec, ProtocolError};
pub use envelope::{validate_room_id, validate_username, Envelope, EnvelopeKind, Status, Subject};
