//! # gatehouse-core
//!
//! Rooms, admission, and the hub that coordinates them.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Room** - Registry of rooms and their members
//! - **Admission** - The pending/approved/rejected state machine
//! - **Hub** - Single task that owns the registry and serializes all requests
//! - **Connection** - Inbound and outbound pumps bridging a transport to the hub
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  HubRequest   ┌─────────────┐     ┌──────────────┐
//! │   Inbound   │──────────────▶│     Hub     │────▶│ RoomRegistry │
//! │    pump     │               └─────────────┘     └──────────────┘
//! └─────────────┘                      │
//!                                      │ outbound queue
//!                                      ▼
//!                               ┌─────────────┐
//!                               │  Outbound   │
//!                               │    pump     │
//!                               └─────────────┘
//! ```

pub mod admission;
pub mod connection;
pub mod hub;
pub mod message;
pub mod room;

pub use admission::{AdmissionError, AdmissionStatus, Decision};
pub use connection::{
    attach, spawn_connection, ConnectionOptions, ConnectionTasks, PumpExit,
    DEFAULT_OUTBOUND_CAPACITY,
};
pub use hub::{AdmissionDelivery, Hub, HubConfig, HubError, HubHandle, HubStats};
pub use message::{Admission, HubRequest, Registration};
pub use room::{Member, Removal, Room, RoomId, RoomRegistry};
