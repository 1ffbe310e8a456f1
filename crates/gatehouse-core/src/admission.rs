//! Admission state machine.
//!
//! Every non-owner member enters its room as `Pending` and is moved exactly
//! once to `Approved` or `Rejected` by the room owner. Both outcomes are
//! terminal. The owner is created `Approved`.

use gatehouse_protocol::Status;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Admission status of a room member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionStatus {
    /// Waiting for the owner's decision. Receives no room traffic.
    Pending,
    /// Admitted. Receives room traffic.
    Approved,
    /// Refused. The member is removed from its room.
    Rejected,
}

/// An owner's decision about a pending member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Map an envelope status to a decision, if it carries one.
    #[must_use]
    pub fn from_status(status: Status) -> Option<Self> {
        match status {
            Status::Approved => Some(Decision::Approve),
            Status::Rejected => Some(Decision::Reject),
            Status::Success | Status::Pending => None,
        }
    }
}

/// Admission errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The member is no longer pending.
    #[error("Member already {0}")]
    AlreadyDecided(AdmissionStatus),
}

impl AdmissionStatus {
    /// Apply a decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the status is not `Pending`; decided statuses
    /// never change.
    pub fn decide(self, decision: Decision) -> Result<AdmissionStatus, AdmissionError> {
        match (self, decision) {
            (AdmissionStatus::Pending, Decision::Approve) => Ok(AdmissionStatus::Approved),
            (AdmissionStatus::Pending, Decision::Reject) => Ok(AdmissionStatus::Rejected),
            (decided, _) => Err(AdmissionError::AlreadyDecided(decided)),
        }
    }

    /// Whether the member awaits a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, AdmissionStatus::Pending)
    }

    /// Whether the member may see room traffic.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, AdmissionStatus::Approved)
    }

    /// Get the status name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionStatus::Pending => "pending",
            AdmissionStatus::Approved => "approved",
            AdmissionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AdmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
