//! The hub: single coordinator for all room state.
//!
//! The hub runs as one task and processes [`HubRequest`]s strictly one at a
//! time, so mutations of a room never interleave and a `RoomExists` query
//! observes every registration enqueued before it. The [`RoomRegistry`] lives
//! inside the task; everything else talks to it through a [`HubHandle`].

use gatehouse_protocol::Envelope;
use gatehouse_transport::ConnectionId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::admission::{AdmissionStatus, Decision};
use crate::message::{Admission, HubRequest, Outbound};
use crate::room::{Member, Removal, RoomId, RoomRegistry};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("Hub is not running")]
    Closed,
}

/// How admission traffic (join notices to the owner, decision confirmations)
/// is delivered to a member's outbound queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionDelivery {
    /// Wait for queue space. A stalled recipient stalls the whole hub.
    Blocking,
    /// Never wait; a full queue evicts the recipient like ordinary
    /// backpressure.
    #[default]
    Evict,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the request channel into the hub.
    pub request_capacity: usize,
    /// Delivery policy for admission traffic.
    pub admission_delivery: AdmissionDelivery,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_capacity: 1024,
            admission_delivery: AdmissionDelivery::Evict,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of rooms.
    pub rooms: usize,
    /// Number of members across all rooms.
    pub members: usize,
    /// Number of members awaiting a decision.
    pub pending: usize,
    /// Envelopes enqueued to members since start.
    pub relayed: u64,
    /// Members evicted for backpressure since start.
    pub evicted: u64,
}

/// The central coordinator.
pub struct Hub {
    registry: RoomRegistry,
    requests: mpsc::Receiver<HubRequest>,
    /// Requests the hub issued to itself; drained before the next external one.
    deferred: VecDeque<HubRequest>,
    config: HubConfig,
    relayed: u64,
    evicted: u64,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> (Self, HubHandle) {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> (Self, HubHandle) {
        info!("Creating hub with config: {:?}", config);
        let (sender, requests) = mpsc::channel(config.request_capacity.max(1));
        let hub = Self {
            registry: RoomRegistry::new(),
            requests,
            deferred: VecDeque::new(),
            config,
            relayed: 0,
            evicted: 0,
        };
        (hub, HubHandle { requests: sender })
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::with_config(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process requests until every [`HubHandle`] is dropped.
    ///
    /// Dropping the hub afterwards closes every remaining outbound queue.
    pub async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            self.handle(request).await;
        }
        info!(rooms = self.registry.len(), "Hub stopped");
    }

    /// Process one request and everything it defers.
    pub(crate) async fn handle(&mut self, request: HubRequest) {
        self.dispatch(request).await;
        while let Some(deferred) = self.deferred.pop_front() {
            self.dispatch(deferred).await;
        }
    }

    async fn dispatch(&mut self, request: HubRequest) {
        trace!(request = request.name(), "Processing request");
        match request {
            HubRequest::Register(admission) => self.register(admission).await,
            HubRequest::Unregister {
                room_id,
                connection_id,
            } => self.unregister(&room_id, &connection_id),
            HubRequest::Broadcast { origin, envelope } => self.broadcast(origin, envelope).await,
            HubRequest::RoomExists { room_id, reply } => {
                let exists = self.registry.contains(&room_id);
                debug!(room = %room_id, exists, "Room existence query");
                let _ = reply.send(exists);
            }
            HubRequest::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn stats(&self) -> HubStats {
        let registry = self.registry.stats();
        HubStats {
            rooms: registry.rooms,
            members: registry.members,
            pending: registry.pending,
            relayed: self.relayed,
            evicted: self.evicted,
        }
    }

    async fn register(&mut self, admission: Admission) {
        let room_id = admission.registration.room_id.clone();
        let username = admission.registration.username.clone();
        let connection_id = admission.registration.connection_id.clone();

        let admission = match self.registry.create(admission) {
            Ok(room) => {
                info!(room = %room_id, connection = %connection_id, username = %username, "Room created");
                if let Some(owner) = room.owner() {
                    if enqueue_reply(owner, Envelope::room_created(&room_id, &username)) {
                        self.relayed += 1;
                    }
                }
                return;
            }
            Err(admission) => admission,
        };

        if admission.registration.requested_owner {
            warn!(
                room = %room_id,
                connection = %connection_id,
                "Room already exists, joining as member"
            );
        }

        let notice = Envelope::join_pending(&room_id, &username);
        let owner = match self.registry.join(admission) {
            Ok(room) => {
                debug!(room = %room_id, connection = %connection_id, username = %username, "Member pending");
                if let Some(member) = room.get(&connection_id) {
                    if enqueue_reply(member, notice.clone()) {
                        self.relayed += 1;
                    }
                }
                room.owner()
                    .map(|owner| (owner.id().clone(), owner.outbound().clone()))
            }
            Err(_rejected) => {
                warn!(
                    room = %room_id,
                    connection = %connection_id,
                    "Connection already registered, ignoring request"
                );
                return;
            }
        };

        match owner {
            Some((owner_id, outbound)) => {
                debug!(room = %room_id, owner = %owner_id, username = %username, "Notifying room owner");
                self.deliver_admission(&room_id, &owner_id, outbound, Arc::new(notice))
                    .await;
            }
            None => debug!(room = %room_id, "Room has no owner to notify"),
        }
    }

    fn unregister(&mut self, room_id: &str, connection_id: &ConnectionId) {
        match self.registry.remove(room_id, connection_id) {
            Removal::RoomMissing => {
                debug!(room = %room_id, connection = %connection_id, "Room does not exist, ignoring unregister");
            }
            Removal::MemberMissing => {
                debug!(room = %room_id, connection = %connection_id, "Connection already unregistered, ignoring");
            }
            Removal::Removed {
                member,
                room_deleted,
            } => {
                debug!(
                    room = %room_id,
                    connection = %connection_id,
                    username = %member.username(),
                    room_deleted,
                    "Unregistered connection"
                );
            }
        }
    }

    async fn broadcast(&mut self, origin: ConnectionId, envelope: Envelope) {
        if !self.registry.contains(envelope.room_id()) {
            warn!(room = %envelope.room_id(), connection = %origin, "Broadcast to non-existent room");
            return;
        }

        let envelope = Arc::new(envelope);
        match Decision::from_status(envelope.status) {
            Some(decision) => self.relay_decision(&origin, decision, envelope).await,
            None => self.relay(&origin, envelope),
        }
    }

    /// Apply an owner's decision and confirm it to the subject and the owner.
    async fn relay_decision(
        &mut self,
        origin: &ConnectionId,
        decision: Decision,
        envelope: Arc<Envelope>,
    ) {
        let room_id = envelope.room_id().to_string();
        let username = envelope.username();
        let Some(room) = self.registry.get_mut(&room_id) else {
            return;
        };

        if room.owner_id() != Some(origin) {
            warn!(
                room = %room_id,
                connection = %origin,
                status = %envelope.status,
                "Admission decision from non-owner ignored"
            );
            return;
        }

        let Some(subject_id) = room.pending_by_username(username).map(|m| m.id().clone()) else {
            warn!(room = %room_id, username = %username, "No pending member matches admission decision");
            return;
        };

        // Subject and owner each take one delivery
        let mut remaining = 2u8;
        let mut subject_outbound = None;
        if let Some(subject) = room.get_mut(&subject_id) {
            match subject.decide(decision) {
                Ok(AdmissionStatus::Approved) => {
                    debug!(room = %room_id, username = %username, "Member approved");
                    subject_outbound = Some(subject.outbound().clone());
                }
                Ok(_) => {
                    debug!(room = %room_id, username = %username, "Member rejected");
                    self.deferred.push_back(HubRequest::Unregister {
                        room_id: room_id.clone(),
                        connection_id: subject_id.clone(),
                    });
                }
                Err(e) => {
                    warn!(room = %room_id, username = %username, error = %e, "Admission decision not applied");
                    return;
                }
            }
            remaining -= 1;
        }

        let owner = room
            .owner()
            .filter(|owner| owner.id() != &subject_id)
            .map(|owner| (owner.id().clone(), owner.outbound().clone()));

        if let Some(outbound) = subject_outbound {
            self.deliver_admission(&room_id, &subject_id, outbound, Arc::clone(&envelope))
                .await;
        }
        if let Some((owner_id, outbound)) = owner {
            self.deliver_admission(&room_id, &owner_id, outbound, Arc::clone(&envelope))
                .await;
            remaining -= 1;
        }

        if remaining == 0 {
            debug!(room = %room_id, username = %envelope.username(), "Admission decision relayed");
        } else {
            warn!(
                room = %room_id,
                username = %envelope.username(),
                remaining,
                "Admission decision reached fewer targets than expected"
            );
        }
    }

    /// Relay an ordinary envelope to every approved member of its room.
    fn relay(&mut self, origin: &ConnectionId, envelope: Arc<Envelope>) {
        let room_id = envelope.room_id();
        let Some(room) = self.registry.get(room_id) else {
            return;
        };

        match room.get(origin) {
            Some(member) if member.status().is_approved() => {}
            Some(member) => {
                debug!(
                    room = %room_id,
                    connection = %origin,
                    status = %member.status(),
                    "Broadcast from unadmitted member dropped"
                );
                return;
            }
            None => {
                warn!(room = %room_id, connection = %origin, "Broadcast from non-member dropped");
                return;
            }
        }

        let mut delivered = 0u64;
        let mut stalled = Vec::new();
        for member in room.members() {
            if !member.status().is_approved() {
                continue;
            }
            match member.outbound().try_send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    stalled.push((member.id().clone(), "outbound queue full"));
                }
                Err(TrySendError::Closed(_)) => {
                    stalled.push((member.id().clone(), "outbound queue closed"));
                }
            }
        }

        self.relayed += delivered;
        trace!(room = %room_id, recipients = delivered, "Relayed envelope");

        for (connection_id, reason) in stalled {
            self.evict(room_id, &connection_id, reason);
        }
    }

    /// Enqueue admission traffic according to the configured policy.
    ///
    /// Returns `false` if the target was evicted instead.
    async fn deliver_admission(
        &mut self,
        room_id: &str,
        target: &ConnectionId,
        outbound: Outbound,
        envelope: Arc<Envelope>,
    ) -> bool {
        let delivered = match self.config.admission_delivery {
            AdmissionDelivery::Blocking => outbound.send(envelope).await.is_ok(),
            AdmissionDelivery::Evict => outbound.try_send(envelope).is_ok(),
        };
        drop(outbound);

        if delivered {
            self.relayed += 1;
        } else {
            self.evict(room_id, target, "admission delivery failed");
        }
        delivered
    }

    /// Remove a member without going through unregister.
    fn evict(&mut self, room_id: &str, connection_id: &ConnectionId, reason: &'static str) {
        if let Removal::Removed {
            member,
            room_deleted,
        } = self.registry.remove(room_id, connection_id)
        {
            self.evicted += 1;
            debug!(
                room = %room_id,
                connection = %connection_id,
                username = %member.username(),
                reason,
                room_deleted,
                "Evicted member"
            );
        }
    }
}

/// Enqueue a reply on a member's (fresh) queue.
fn enqueue_reply(member: &Member, envelope: Envelope) -> bool {
    match member.outbound().try_send(Arc::new(envelope)) {
        Ok(()) => true,
        Err(e) => {
            debug!(connection = %member.id(), error = %e, "Failed to enqueue reply");
            false
        }
    }
}

/// Cloneable handle for submitting requests to the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    requests: mpsc::Sender<HubRequest>,
}

impl HubHandle {
    async fn send(&self, request: HubRequest) -> Result<(), HubError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Create a room or join an existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn register(&self, admission: Admission) -> Result<(), HubError> {
        self.send(HubRequest::Register(admission)).await
    }

    /// Remove a connection from its room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn unregister(
        &self,
        room_id: impl Into<RoomId>,
        connection_id: ConnectionId,
    ) -> Result<(), HubError> {
        self.send(HubRequest::Unregister {
            room_id: room_id.into(),
            connection_id,
        })
        .await
    }

    /// Relay an envelope received from `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn broadcast(&self, origin: ConnectionId, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubRequest::Broadcast { origin, envelope }).await
    }

    /// Check whether a room exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn room_exists(&self, room_id: impl Into<RoomId>) -> Result<bool, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubRequest::RoomExists {
            room_id: room_id.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Get hub statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubRequest::Stats { reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Check if the hub has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}
