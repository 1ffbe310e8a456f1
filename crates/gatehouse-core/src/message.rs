//! Internal message types for Gatehouse.
//!
//! These are the requests connection actors and the HTTP front end send to
//! the hub. Replies travel back through per-member outbound queues or through
//! one-shot channels carried in the request.

use gatehouse_protocol::Envelope;
use gatehouse_transport::ConnectionId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::hub::HubStats;
use crate::room::RoomId;

/// Sending side of a member's outbound queue. Owned by the hub.
pub type Outbound = mpsc::Sender<Arc<Envelope>>;

/// Receiving side of a member's outbound queue. Owned by the outbound pump.
pub type OutboundReceiver = mpsc::Receiver<Arc<Envelope>>;

/// Who is connecting, and where to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Connection identity.
    pub connection_id: ConnectionId,
    /// Room to create or join.
    pub room_id: RoomId,
    /// Display name, used as the subject of admission decisions.
    pub username: String,
    /// Whether the front end expects this connection to create the room.
    pub requested_owner: bool,
}

impl Registration {
    /// Registration for a connection that creates `room_id`.
    #[must_use]
    pub fn owner(room_id: impl Into<RoomId>, username: impl Into<String>) -> Self {
        Self {
            connection_id: ConnectionId::generate(),
            room_id: room_id.into(),
            username: username.into(),
            requested_owner: true,
        }
    }

    /// Registration for a connection that joins an existing `room_id`.
    #[must_use]
    pub fn joiner(room_id: impl Into<RoomId>, username: impl Into<String>) -> Self {
        Self {
            requested_owner: false,
            ..Self::owner(room_id, username)
        }
    }

    /// Use a specific connection identity.
    #[must_use]
    pub fn with_connection_id(mut self, connection_id: impl Into<ConnectionId>) -> Self {
        self.connection_id = connection_id.into();
        self
    }
}

/// A registration together with the queue the hub writes replies into.
#[derive(Debug)]
pub struct Admission {
    pub registration: Registration,
    pub outbound: Outbound,
}

impl Admission {
    /// Create an admission and the receiving side of its outbound queue.
    #[must_use]
    pub fn channel(registration: Registration, capacity: usize) -> (Self, OutboundReceiver) {
        let (outbound, receiver) = mpsc::channel(capacity);
        (
            Self {
                registration,
                outbound,
            },
            receiver,
        )
    }
}

/// A request processed by the hub loop.
#[derive(Debug)]
pub enum HubRequest {
    /// Create a room or join an existing one.
    Register(Admission),

    /// Remove a connection from its room. Idempotent.
    Unregister {
        room_id: RoomId,
        connection_id: ConnectionId,
    },

    /// Relay an envelope received from `origin`.
    Broadcast {
        origin: ConnectionId,
        envelope: Envelope,
    },

    /// Ask whether a room currently exists.
    RoomExists {
        room_id: RoomId,
        reply: oneshot::Sender<bool>,
    },

    /// Ask for hub statistics.
    Stats { reply: oneshot::Sender<HubStats> },
}

impl HubRequest {
    /// Short request name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            HubRequest::Register(_) => "register",
            HubRequest::Unregister { .. } => "unregister",
            HubRequest::Broadcast { .. } => "broadcast",
            HubRequest::RoomExists { .. } => "room_exists",
            HubRequest::Stats { .. } => "stats",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_roles() {
        let owner = Registration::owner("42", "kiwi-10001");
        assert!(owner.requested_owner);
        assert!(owner.connection_id.as_str().starts_with("conn_"));

        let joiner = Registration::joiner("42", "grape-20002").with_connection_id("conn-b");
        assert!(!joiner.requested_owner);
        assert_eq!(joiner.connection_id.as_str(), "conn-b");
        assert_eq!(joiner.room_id, "42");
    }

    #[tokio::test]
    async fn test_admission_channel() {
        let (admission, mut receiver) = Admission::channel(Registration::owner("42", "a"), 4);
        admission
            .outbound
            .try_send(Arc::new(Envelope::room_created("42", "a")))
            .unwrap();
        assert_eq!(receiver.recv().await.unwrap().room_id(), "42");

        drop(admission);
        assert!(receiver.recv().await.is_none());
    }
}
