//! Metrics collection and export for Gatehouse.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use gatehouse_core::{HubHandle, HubStats};
use gatehouse_transport::{Duplex, Frame, FrameReader, FrameWriter, TransportError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "gatehouse_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "gatehouse_connections_active";
    pub const ENVELOPES_TOTAL: &str = "gatehouse_envelopes_total";
    pub const ENVELOPES_BYTES: &str = "gatehouse_envelopes_bytes";
    pub const ROOMS_ACTIVE: &str = "gatehouse_rooms_active";
    pub const MEMBERS_PENDING: &str = "gatehouse_members_pending";
    pub const RELAYED_TOTAL: &str = "gatehouse_relayed_total";
    pub const EVICTIONS_TOTAL: &str = "gatehouse_evictions_total";
    pub const ERRORS_TOTAL: &str = "gatehouse_errors_total";
}

/// How often hub statistics are sampled into gauges.
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::ENVELOPES_TOTAL, "Total number of envelope frames");
    metrics::describe_counter!(names::ENVELOPES_BYTES, "Total bytes of envelope frames");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_gauge!(
        names::MEMBERS_PENDING,
        "Members waiting for an admission decision"
    );
    metrics::describe_counter!(names::RELAYED_TOTAL, "Envelopes enqueued by the hub");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Members evicted for a full or closed queue"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an envelope frame.
pub fn record_envelope(bytes: usize, direction: &'static str) {
    counter!(names::ENVELOPES_TOTAL, "direction" => direction).increment(1);
    counter!(names::ENVELOPES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Publish a hub statistics sample.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.rooms as f64);
    gauge!(names::MEMBERS_PENDING).set(stats.pending as f64);
    counter!(names::RELAYED_TOTAL).absolute(stats.relayed);
    counter!(names::EVICTIONS_TOTAL).absolute(stats.evicted);
}

/// Sample hub statistics every `interval` until the hub stops.
pub fn spawn_stats_poller(hub: HubHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match hub.stats().await {
                Ok(stats) => record_hub_stats(&stats),
                Err(e) => {
                    debug!(error = %e, "Stopping stats poller");
                    break;
                }
            }
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// Transport wrapper that counts frames in both directions.
///
/// The guard travels with the writer, so the active connection gauge drops
/// when the outbound pump ends.
pub struct Metered<D> {
    inner: D,
    guard: ConnectionMetricsGuard,
}

impl<D: Duplex> Metered<D> {
    #[must_use]
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            guard: ConnectionMetricsGuard::new(),
        }
    }
}

impl<D: Duplex> Duplex for Metered<D> {
    type Reader = MeteredReader<D::Reader>;
    type Writer = MeteredWriter<D::Writer>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = self.inner.split();
        (
            MeteredReader { inner: reader },
            MeteredWriter {
                inner: writer,
                _guard: self.guard,
            },
        )
    }

    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }
}

pub struct MeteredReader<R> {
    inner: R,
}

#[async_trait]
impl<R: FrameReader> FrameReader for MeteredReader<R> {
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        let result = self.inner.read_frame().await;
        match &result {
            Ok(Some(frame)) => record_envelope(frame.len(), "inbound"),
            Ok(None) => {}
            Err(TransportError::FrameTooLarge { .. }) => record_error("frame_too_large"),
            Err(_) => record_error("transport_read"),
        }
        result
    }
}

pub struct MeteredWriter<W> {
    inner: W,
    _guard: ConnectionMetricsGuard,
}

#[async_trait]
impl<W: FrameWriter> FrameWriter for MeteredWriter<W> {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let len = frame.len();
        let result = self.inner.write_frame(frame).await;
        match &result {
            Ok(()) => record_envelope(len, "outbound"),
            Err(_) => record_error("transport_write"),
        }
        result
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_transport::memory::{self, Delivery};

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic
        let _guard = ConnectionMetricsGuard::new();
    }

    #[tokio::test]
    async fn test_metered_passes_frames_through() {
        let (transport, mut peer) = memory::pair(4);
        let metered = Metered::new(transport);
        assert_eq!(metered.remote_addr().as_deref(), Some("memory"));

        let (mut reader, mut writer) = metered.split();
        peer.send("in").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::from("in")));

        writer.write_frame(Frame::from("out")).await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(peer.recv().await, Some(Delivery::Frame(Frame::from("out"))));
        assert_eq!(peer.recv().await, Some(Delivery::Close));
    }

    #[test]
    fn test_record_hub_stats() {
        // No recorder installed: recording is a no-op
        record_hub_stats(&HubStats {
            rooms: 1,
            members: 2,
            pending: 1,
            relayed: 3,
            evicted: 0,
        });
    }
}
