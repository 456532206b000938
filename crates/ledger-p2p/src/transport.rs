//! Contract with the multiplexed transport that owns the physical connection.
//!
//! Framing, encryption, keep-alive and socket I/O live behind [`Transport`].
//! The peer only drives it through these operations and receives inbound
//! frames through the [`InboundHandler`] it installs on start.

use crate::error::{PeerError, TransportError};
use crate::message::ChannelId;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Byte-level multiplexed connection.
///
/// Every operation must be safe to call concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start reading and writing, delivering inbound frames to `handler`.
    async fn start(&self, handler: Arc<dyn InboundHandler>) -> Result<(), TransportError>;

    /// Stop everything and close the connection.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Deliver every already queued outbound frame, then close the
    /// connection.
    async fn flush_stop(&self);

    /// Queue `bytes` on `channel`, waiting up to the transport's send timeout
    /// for room. Returns `false` if the queue stayed full.
    async fn send(&self, channel: ChannelId, bytes: Bytes) -> bool;

    /// Queue `bytes` on `channel` only if there is room right now.
    fn try_send(&self, channel: ChannelId, bytes: Bytes) -> bool;

    /// Whether the send queue of `channel` has room.
    fn can_send(&self, channel: ChannelId) -> bool;

    /// Snapshot of per-channel connection state.
    fn status(&self) -> ConnectionStatus;

    /// Close the raw connection without the stop sequence.
    fn close(&self) -> Result<(), TransportError>;

    /// Remote address of the underlying connection.
    fn remote_addr(&self) -> SocketAddr;
}

/// Callbacks the transport invokes for inbound traffic.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// Called once per received frame, in arrival order.
    ///
    /// `payload` may be reused by the transport once this returns. Awaiting
    /// this call is the connection's backpressure point. An `Err` is fatal
    /// for the connection and has already been reported upstream.
    async fn on_receive(&self, channel: ChannelId, payload: &[u8]) -> Result<(), PeerError>;

    /// Called when the transport fails on its own.
    fn on_error(&self, error: TransportError);
}

/// Connection state snapshot.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    /// Time since the connection was established.
    pub duration: Duration,
    /// Per-channel state.
    pub channels: Vec<ChannelStatus>,
}

impl ConnectionStatus {
    /// Total frames waiting in outbound queues across channels.
    pub fn pending_send_total(&self) -> usize {
        self.channels.iter().map(|c| c.send_queue_size).sum()
    }
}

/// State of one channel's outbound queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    pub id: ChannelId,
    pub send_queue_capacity: usize,
    pub send_queue_size: usize,
    pub priority: i32,
    pub recently_sent: i64,
}
