//! Room registry for Gatehouse.
//!
//! Rooms are named broadcast domains with one owner and any number of other
//! members. The registry is owned by the hub task and is never shared, so
//! nothing here locks.
//!
//! Two invariants hold after every public mutation:
//!
//! - a room is present iff it has at least one member,
//! - a room's owner is the member that created it; it is never reassigned.

use gatehouse_transport::ConnectionId;
use std::collections::HashMap;
use tracing::debug;

use crate::admission::{AdmissionError, AdmissionStatus, Decision};
use crate::message::{Admission, Outbound};

pub use gatehouse_protocol::validate_room_id;

/// A room identifier.
pub type RoomId = String;

/// A connection as tracked by the registry.
#[derive(Debug)]
pub struct Member {
    id: ConnectionId,
    username: String,
    room_id: RoomId,
    status: AdmissionStatus,
    is_owner: bool,
    outbound: Outbound,
}

impl Member {
    /// Member that creates its room.
    #[must_use]
    pub fn owner(admission: Admission) -> Self {
        Self::from_admission(admission, AdmissionStatus::Approved, true)
    }

    /// Member waiting for the owner's decision.
    #[must_use]
    pub fn pending(admission: Admission) -> Self {
        Self::from_admission(admission, AdmissionStatus::Pending, false)
    }

    fn from_admission(admission: Admission, status: AdmissionStatus, is_owner: bool) -> Self {
        let Admission {
            registration,
            outbound,
        } = admission;
        Self {
            id: registration.connection_id,
            username: registration.username,
            room_id: registration.room_id,
            status,
            is_owner,
            outbound,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn status(&self) -> AdmissionStatus {
        self.status
    }

    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// The member's outbound queue.
    #[must_use]
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Apply an owner decision to this member.
    ///
    /// # Errors
    ///
    /// Returns an error if the member is not pending.
    pub fn decide(&mut self, decision: Decision) -> Result<AdmissionStatus, AdmissionError> {
        self.status = self.status.decide(decision)?;
        Ok(self.status)
    }
}

/// A room and its members.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<ConnectionId, Member>,
    /// Creator of the room. `None` once the owner has left.
    owner: Option<ConnectionId>,
}

impl Room {
    /// Create a room owned by `owner`.
    fn new(id: RoomId, owner: Member) -> Self {
        let owner_id = owner.id.clone();
        let mut members = HashMap::new();
        members.insert(owner_id.clone(), owner);
        Self {
            id,
            members,
            owner: Some(owner_id),
        }
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    #[must_use]
    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Member> {
        self.members.get(connection_id)
    }

    pub fn get_mut(&mut self, connection_id: &ConnectionId) -> Option<&mut Member> {
        self.members.get_mut(connection_id)
    }

    /// Id of the owner, if still present.
    #[must_use]
    pub fn owner_id(&self) -> Option<&ConnectionId> {
        self.owner.as_ref()
    }

    /// The owner, if still present.
    #[must_use]
    pub fn owner(&self) -> Option<&Member> {
        self.owner.as_ref().and_then(|id| self.members.get(id))
    }

    /// Iterate over members in no particular order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Find the pending member named `username`.
    #[must_use]
    pub fn pending_by_username(&self, username: &str) -> Option<&Member> {
        self.members
            .values()
            .find(|m| m.status.is_pending() && m.username == username)
    }

    /// Number of members awaiting a decision.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.members.values().filter(|m| m.status.is_pending()).count()
    }

    fn insert(&mut self, member: Member) {
        self.members.insert(member.id.clone(), member);
    }

    fn remove(&mut self, connection_id: &ConnectionId) -> Option<Member> {
        let removed = self.members.remove(connection_id);
        if removed.is_some() && self.owner.as_ref() == Some(connection_id) {
            debug!(room = %self.id, connection = %connection_id, "Room owner left");
            self.owner = None;
        }
        removed
    }
}

/// Outcome of removing a member from the registry.
#[derive(Debug)]
pub enum Removal {
    /// No such room.
    RoomMissing,
    /// The room exists but the connection is not a member.
    MemberMissing,
    /// The member was removed. Dropping it closes its outbound queue.
    Removed {
        member: Member,
        /// Whether the room was deleted because it became empty.
        room_deleted: bool,
    },
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of rooms.
    pub rooms: usize,
    /// Number of members across all rooms.
    pub members: usize,
    /// Number of members awaiting a decision.
    pub pending: usize,
}

/// Mapping from room id to room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Check if there are no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Create a room with the admitted connection as its owner.
    ///
    /// Returns the admission back if the room already exists.
    pub fn create(&mut self, admission: Admission) -> Result<&mut Room, Admission> {
        use std::collections::hash_map::Entry;

        match self.rooms.entry(admission.registration.room_id.clone()) {
            Entry::Occupied(_) => Err(admission),
            Entry::Vacant(slot) => {
                let owner = Member::owner(admission);
                debug!(room = %owner.room_id, connection = %owner.id, "Creating room");
                let id = slot.key().clone();
                Ok(slot.insert(Room::new(id, owner)))
            }
        }
    }

    /// Add the admitted connection to its existing room as a pending member.
    ///
    /// Returns the admission back if the room does not exist or already holds
    /// its connection id.
    pub fn join(&mut self, admission: Admission) -> Result<&mut Room, Admission> {
        let registration = &admission.registration;
        let Some(room) = self.rooms.get_mut(&registration.room_id) else {
            return Err(admission);
        };
        if room.contains(&registration.connection_id) {
            return Err(admission);
        }
        room.insert(Member::pending(admission));
        Ok(room)
    }

    /// Remove a member, deleting its room if that leaves it empty.
    pub fn remove(&mut self, room_id: &str, connection_id: &ConnectionId) -> Removal {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Removal::RoomMissing;
        };
        let Some(member) = room.remove(connection_id) else {
            return Removal::MemberMissing;
        };

        let room_deleted = room.is_empty();
        if room_deleted {
            self.rooms.remove(room_id);
            debug!(room = %room_id, "Deleted empty room");
        }

        Removal::Removed {
            member,
            room_deleted,
        }
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.rooms.len(),
            members: self.rooms.values().map(Room::len).sum(),
            pending: self.rooms.values().map(Room::pending_count).sum(),
        }
    }

    /// Verify the registry invariants.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        for (id, room) in &self.rooms {
            assert!(!room.is_empty(), "room {id} is present but empty");
            let owners: Vec<_> = room.members().filter(|m| m.is_owner()).collect();
            assert!(owners.len() <= 1, "room {id} has {} owners", owners.len());
            if let Some(owner) = owners.first() {
                assert_eq!(room.owner_id(), Some(owner.id()), "room {id} owner mismatch");
                assert!(owner.status().is_approved());
            }
            for member in room.members() {
                assert_eq!(member.room_id(), id);
            }
        }
    }
}
