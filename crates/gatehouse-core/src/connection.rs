//! Connection actor.
//!
//! Each connection runs two tasks that share nothing but the hub handle:
//!
//! - the **inbound pump** reads frames, decodes them, and submits
//!   `Broadcast` requests. However it ends, it unregisters the connection
//!   exactly once.
//! - the **outbound pump** drains the member's queue onto the transport and
//!   sends a close frame once the hub drops the queue.
//!
//! The outbound pump holds a [`Shutdown`] guard; the inbound pump stops
//! reading as soon as that guard is dropped, so a connection whose queue was
//! closed by the hub is torn down even if the peer keeps sending.

use gatehouse_protocol::{EnvelopeCodec, ProtocolError};
use gatehouse_transport::{ConnectionId, Duplex, Frame, FrameReader, FrameWriter, TransportError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::hub::{HubError, HubHandle};
use crate::message::{Admission, OutboundReceiver, Registration};
use crate::room::RoomId;

/// Default capacity of a member's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Per-connection settings.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Capacity of the outbound queue.
    pub outbound_capacity: usize,
    /// Codec used by both pumps.
    pub codec: EnvelopeCodec,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            codec: EnvelopeCodec::default(),
        }
    }
}

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// The peer closed the transport.
    Closed,
    /// Reading from the transport failed.
    ReadFailed(TransportError),
    /// The peer sent a frame that is not a valid envelope.
    Malformed(ProtocolError),
    /// The hub is gone.
    HubStopped,
    /// The hub closed the outbound queue.
    QueueClosed,
    /// The outbound pump stopped, so reading was abandoned.
    OutboundStopped,
    /// Writing to the transport failed.
    WriteFailed(TransportError),
}

impl PumpExit {
    /// Whether the pump stopped because of an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            PumpExit::ReadFailed(_) | PumpExit::Malformed(_) | PumpExit::WriteFailed(_)
        )
    }
}

/// Held by the outbound pump; dropping it stops the inbound pump.
#[derive(Debug)]
pub struct Shutdown(oneshot::Sender<()>);

/// Signal observed by the inbound pump.
#[derive(Debug)]
pub struct ShutdownSignal(oneshot::Receiver<()>);

/// Create a linked shutdown guard and signal.
#[must_use]
pub fn shutdown_pair() -> (Shutdown, ShutdownSignal) {
    let (sender, receiver) = oneshot::channel();
    (Shutdown(sender), ShutdownSignal(receiver))
}

/// Join handles for both pumps of a connection.
#[derive(Debug)]
pub struct ConnectionTasks {
    pub inbound: JoinHandle<PumpExit>,
    pub outbound: JoinHandle<PumpExit>,
}

/// Read, decode, relay. Unregisters the connection on the way out.
pub async fn inbound_pump<R: FrameReader>(
    mut reader: R,
    hub: HubHandle,
    connection_id: ConnectionId,
    room_id: RoomId,
    codec: EnvelopeCodec,
    shutdown: ShutdownSignal,
) -> PumpExit {
    let mut shutdown = shutdown.0;
    let exit = loop {
        let read = tokio::select! {
            read = reader.read_frame() => read,
            _ = &mut shutdown => break PumpExit::OutboundStopped,
        };
        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => break PumpExit::Closed,
            Err(e) => break PumpExit::ReadFailed(e),
        };

        let envelope = match codec.decode(frame.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => break PumpExit::Malformed(e),
        };

        trace!(
            connection = %connection_id,
            kind = %envelope.kind,
            status = %envelope.status,
            "Received envelope"
        );
        if hub.broadcast(connection_id.clone(), envelope).await.is_err() {
            break PumpExit::HubStopped;
        }
    };
    drop(reader);

    if exit.is_error() {
        warn!(connection = %connection_id, room = %room_id, reason = ?exit, "Inbound pump failed");
    } else {
        debug!(connection = %connection_id, room = %room_id, reason = ?exit, "Inbound pump stopped");
    }

    if let Err(e) = hub.unregister(room_id, connection_id.clone()).await {
        debug!(connection = %connection_id, error = %e, "Unregister not delivered");
    }
    exit
}

/// Drain the outbound queue onto the transport.
///
/// `_shutdown` is released when this returns.
pub async fn outbound_pump<W: FrameWriter>(
    mut writer: W,
    mut queue: OutboundReceiver,
    connection_id: ConnectionId,
    codec: EnvelopeCodec,
    _shutdown: Shutdown,
) -> PumpExit {
    while let Some(envelope) = queue.recv().await {
        let text = match codec.encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Failed to encode envelope");
                continue;
            }
        };
        if let Err(e) = writer.write_frame(Frame::Text(text)).await {
            debug!(connection = %connection_id, error = %e, "Outbound pump failed");
            return PumpExit::WriteFailed(e);
        }
    }

    if let Err(e) = writer.close().await {
        debug!(connection = %connection_id, error = %e, "Failed to send close frame");
    }
    debug!(connection = %connection_id, "Outbound pump stopped");
    PumpExit::QueueClosed
}

/// Spawn both pumps for an already registered connection.
pub fn spawn_connection<D: Duplex>(
    hub: HubHandle,
    transport: D,
    connection_id: ConnectionId,
    room_id: RoomId,
    queue: OutboundReceiver,
    codec: EnvelopeCodec,
) -> ConnectionTasks {
    let (reader, writer) = transport.split();
    let (shutdown, signal) = shutdown_pair();
    let outbound = tokio::spawn(outbound_pump(
        writer,
        queue,
        connection_id.clone(),
        codec,
        shutdown,
    ));
    let inbound = tokio::spawn(inbound_pump(
        reader,
        hub,
        connection_id,
        room_id,
        codec,
        signal,
    ));
    ConnectionTasks { inbound, outbound }
}

/// Register a connection with the hub and start its pumps.
///
/// # Errors
///
/// Returns an error if the hub has stopped. The transport is dropped.
pub async fn attach<D: Duplex>(
    hub: &HubHandle,
    transport: D,
    registration: Registration,
    options: &ConnectionOptions,
) -> Result<ConnectionTasks, HubError> {
    let connection_id = registration.connection_id.clone();
    let room_id = registration.room_id.clone();
    if let Some(addr) = transport.remote_addr() {
        debug!(connection = %connection_id, room = %room_id, remote = %addr, "Attaching connection");
    }

    let (admission, queue) = Admission::channel(registration, options.outbound_capacity.max(1));
    hub.register(admission).await?;

    Ok(spawn_connection(
        hub.clone(),
        transport,
        connection_id,
        room_id,
        queue,
        options.codec,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use gatehouse_protocol::{decode, encode, Envelope, Status};
    use gatehouse_transport::memory::{self, Delivery, MemoryPeer};
    use std::time::Duration;

    async fn recv_envelope(peer: &mut MemoryPeer) -> Envelope {
        match peer.recv().await {
            Some(Delivery::Frame(frame)) => decode(frame.as_bytes()).unwrap(),
            other => panic!("Expected frame, got {:?}", other),
        }
    }

    async fn connect(
        hub: &HubHandle,
        registration: Registration,
    ) -> (MemoryPeer, ConnectionTasks) {
        let (transport, peer) = memory::pair(16);
        let tasks = attach(hub, transport, registration, &ConnectionOptions::default())
            .await
            .unwrap();
        (peer, tasks)
    }

    #[tokio::test]
    async fn test_admission_flow_over_pumps() {
        let (hub, _task) = Hub::spawn(HubConfig::default());

        let (mut alice, _a) = connect(&hub, Registration::owner("42", "alice")).await;
        assert_eq!(recv_envelope(&mut alice).await, Envelope::room_created("42", "alice"));

        let (mut bob, _b) = connect(&hub, Registration::joiner("42", "bob")).await;
        assert_eq!(recv_envelope(&mut bob).await.status, Status::Pending);
        assert_eq!(recv_envelope(&mut alice).await.username(), "bob");

        alice
            .send(encode(&Envelope::approve("42", "bob")).unwrap())
            .await
            .unwrap();
        assert_eq!(recv_envelope(&mut bob).await.status, Status::Approved);
        assert_eq!(recv_envelope(&mut alice).await.status, Status::Approved);
    }

    #[tokio::test]
    async fn test_rejection_closes_transport() {
        let (hub, _task) = Hub::spawn(HubConfig::default());

        let (mut alice, _a) = connect(&hub, Registration::owner("42", "alice")).await;
        recv_envelope(&mut alice).await;
        let (mut carol, tasks) = connect(&hub, Registration::joiner("42", "carol")).await;
        recv_envelope(&mut carol).await;
        recv_envelope(&mut alice).await;

        alice
            .send(encode(&Envelope::reject("42", "carol")).unwrap())
            .await
            .unwrap();
        assert_eq!(recv_envelope(&mut alice).await.status, Status::Rejected);
        assert_eq!(carol.recv().await, Some(Delivery::Close));
        assert!(matches!(tasks.outbound.await.unwrap(), PumpExit::QueueClosed));
        assert!(matches!(tasks.inbound.await.unwrap(), PumpExit::OutboundStopped));

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.members, 1);
    }

    #[tokio::test]
    async fn test_rejected_peer_ignoring_close_is_dropped() {
        let (hub, _task) = Hub::spawn(HubConfig::default());

        let (mut alice, _a) = connect(&hub, Registration::owner("42", "alice")).await;
        recv_envelope(&mut alice).await;
        let (mut carol, tasks) = connect(&hub, Registration::joiner("42", "carol")).await;
        recv_envelope(&mut carol).await;
        recv_envelope(&mut alice).await;

        alice
            .send(encode(&Envelope::reject("42", "carol")).unwrap())
            .await
            .unwrap();
        assert_eq!(recv_envelope(&mut alice).await.status, Status::Rejected);
        assert_eq!(carol.recv().await, Some(Delivery::Close));

        // Ignore the close frame and keep talking
        for _ in 0..5 {
            let _ = carol
                .send(encode(&Envelope::approve("42", "carol")).unwrap())
                .await;
        }

        let exit = tokio::time::timeout(Duration::from_secs(1), tasks.inbound)
            .await
            .expect("inbound pump outlived its queue")
            .unwrap();
        assert!(matches!(exit, PumpExit::OutboundStopped));
        assert!(!exit.is_error());
        assert!(carol.send("{}").await.is_err());

        // Nothing the rejected peer sent reached the owner
        assert!(tokio::time::timeout(Duration::from_millis(50), alice.recv())
            .await
            .is_err());
        assert_eq!(hub.stats().await.unwrap().members, 1);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (mut alice, tasks) = connect(&hub, Registration::owner("42", "alice")).await;
        recv_envelope(&mut alice).await;

        alice.disconnect();
        assert!(matches!(tasks.inbound.await.unwrap(), PumpExit::Closed));
        assert!(matches!(tasks.outbound.await.unwrap(), PumpExit::QueueClosed));
        assert_eq!(alice.recv().await, Some(Delivery::Close));
        assert!(!hub.room_exists("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_frame_unregisters() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (mut alice, tasks) = connect(&hub, Registration::owner("42", "alice")).await;
        recv_envelope(&mut alice).await;

        alice.send("{not json").await.unwrap();
        assert!(matches!(tasks.inbound.await.unwrap(), PumpExit::Malformed(_)));
        assert!(!hub.room_exists("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_failure_unregisters() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (mut alice, tasks) = connect(&hub, Registration::owner("42", "alice")).await;
        recv_envelope(&mut alice).await;

        alice
            .fail(TransportError::ReceiveFailed("reset".into()))
            .await
            .unwrap();
        let exit = tasks.inbound.await.unwrap();
        assert!(exit.is_error());
        assert!(matches!(exit, PumpExit::ReadFailed(_)));
        assert!(!hub.room_exists("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_attach_after_hub_stopped() {
        let (hub_actor, hub) = Hub::new();
        drop(hub_actor);

        let (transport, _peer) = memory::pair(4);
        let result = attach(
            &hub,
            transport,
            Registration::owner("42", "alice"),
            &ConnectionOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(HubError::Closed)));
    }
}
