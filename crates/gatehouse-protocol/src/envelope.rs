//! Envelope types for the Gatehouse protocol.
//!
//! An envelope is the single message shape exchanged between clients and the
//! hub. It is a JSON object tagged by `type` and `status`; both tags are closed
//! enums, so an unknown tag fails at decode time instead of being routed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum room identifier length.
pub const MAX_ROOM_ID_LENGTH: usize = 64;

/// Maximum username length.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Validate a room identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    if room_id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if !room_id.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// Validate a username.
///
/// # Errors
///
/// Returns an error message if the username is invalid.
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.is_empty() {
        return Err("Username cannot be empty");
    }
    if username.len() > MAX_USERNAME_LENGTH {
        return Err("Username too long");
    }
    if username.chars().any(char::is_control) {
        return Err("Username contains control characters");
    }
    Ok(())
}

/// What the envelope is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    /// A room was created; only ever sent to the room owner.
    CreateRoom,
    /// Everything about joining an existing room.
    JoinRoom,
}

impl EnvelopeKind {
    /// Wire tag of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::CreateRoom => "create-room",
            EnvelopeKind::JoinRoom => "join-room",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope status.
///
/// `Approved` and `Rejected` carry an owner's admission decision; the hub
/// routes them to the subject and the owner only. Every other status is
/// relayed to the approved members of the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Pending,
    Approved,
    Rejected,
}

impl Status {
    /// Wire tag of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The room and member an envelope refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    /// Target room.
    pub room_id: String,
    /// Member the envelope talks about.
    pub username: String,
}

impl Subject {
    /// Create a new subject.
    #[must_use]
    pub fn new(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            username: username.into(),
        }
    }
}

/// A protocol envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Envelope status.
    pub status: Status,
    /// Room and member this envelope refers to.
    pub data: Subject,
    /// Whether the member named in `data` owns the room.
    pub is_owner: bool,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(kind: EnvelopeKind, status: Status, data: Subject, is_owner: bool) -> Self {
        Self {
            kind,
            status,
            data,
            is_owner,
        }
    }

    /// Acknowledgment sent to the owner of a freshly created room.
    #[must_use]
    pub fn room_created(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self::new(
            EnvelopeKind::CreateRoom,
            Status::Success,
            Subject::new(room_id, username),
            true,
        )
    }

    /// Join acknowledgment, sent to the joiner and forwarded to the owner.
    #[must_use]
    pub fn join_pending(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self::new(
            EnvelopeKind::JoinRoom,
            Status::Pending,
            Subject::new(room_id, username),
            false,
        )
    }

    /// Owner decision admitting `username`.
    #[must_use]
    pub fn approve(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self::new(
            EnvelopeKind::JoinRoom,
            Status::Approved,
            Subject::new(room_id, username),
            false,
        )
    }

    /// Owner decision refusing `username`.
    #[must_use]
    pub fn reject(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self::new(
            EnvelopeKind::JoinRoom,
            Status::Rejected,
            Subject::new(room_id, username),
            false,
        )
    }

    /// Target room.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.data.room_id
    }

    /// Member the envelope talks about.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.data.username
    }

    /// Check the payload fields.
    ///
    /// # Errors
    ///
    /// Returns an error message if the room id or username is invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        validate_room_id(&self.data.room_id)?;
        validate_username(&self.data.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_created_wire_shape() {
        let envelope = Envelope::room_created("42", "kiwi-12345");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "create-room",
                "status": "success",
                "data": {"room_id": "42", "username": "kiwi-12345"},
                "is_owner": true
            })
        );
    }

    #[test]
    fn test_unknown_tags_rejected() {
        let bad_type = json!({
            "type": "leave-room",
            "status": "success",
            "data": {"room_id": "42", "username": "a"},
            "is_owner": false
        });
        assert!(serde_json::from_value::<Envelope>(bad_type).is_err());

        let bad_status = json!({
            "type": "join-room",
            "status": "maybe",
            "data": {"room_id": "42", "username": "a"},
            "is_owner": false
        });
        assert!(serde_json::from_value::<Envelope>(bad_status).is_err());
    }

    #[test]
    fn test_room_id_validation() {
        assert!(validate_room_id("42").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("room 42").is_err());
        assert!(validate_room_id(&"9".repeat(MAX_ROOM_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_username_validation() {
        assert!(validate_username("grape-40213").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("a\nb").is_err());
    }
}
