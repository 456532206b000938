//! The peer: one authenticated connection multiplexing many logical channels.
//!
//! A [`Peer`] owns the dispatch queues and processors of every channel that
//! both sides support, the transport handle, and the lifecycle
//! `Created → Running → Stopping → Stopped`. Inbound traffic flows through
//! [`crate::dispatch`]; outbound traffic goes through [`Peer::send`] and
//! [`Peer::try_send`].

use crate::config::PeerConfig;
use crate::dispatch::{spawn_channel_processor, DispatchQueues, InboundRouter};
use crate::error::{PeerError, PeerResult, TransportError};
use crate::identity::{NetAddress, NodeId, NodeInfo};
use crate::message::{ChannelId, Message};
use crate::metadata::{DataValue, PeerData};
use crate::metrics::{MetricLabelCache, Metrics};
use crate::reactor::ChannelTable;
use crate::transport::{ConnectionStatus, Transport};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Callback invoked when a peer hits a fatal error.
///
/// The peer-management layer is expected to stop and remove the peer.
pub type PeerErrorCallback = Arc<dyn Fn(Arc<Peer>, PeerError) + Send + Sync>;

/// Peer lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not started.
    Created,
    /// Transport and processors running.
    Running,
    /// Stop in progress.
    Stopping,
    /// Fully stopped.
    Stopped,
}

/// The raw connection and how it was obtained.
pub struct PeerConn {
    outbound: bool,
    persistent: bool,
    transport: Arc<dyn Transport>,
    socket_addr: NetAddress,
    ip: IpAddr,
}

impl PeerConn {
    /// `socket_addr` is the dialed address for outbound connections and the
    /// accepted address for inbound ones.
    pub fn new(
        outbound: bool,
        persistent: bool,
        transport: Arc<dyn Transport>,
        socket_addr: NetAddress,
    ) -> Self {
        let ip = transport.remote_addr().ip();
        Self {
            outbound,
            persistent,
            transport,
            socket_addr,
            ip,
        }
    }
}

/// Builder for [`Peer`].
pub struct PeerBuilder {
    conn: PeerConn,
    node_info: NodeInfo,
    table: ChannelTable,
    config: PeerConfig,
    metrics: Option<Arc<Metrics>>,
    labels: Option<Arc<MetricLabelCache>>,
    on_error: Option<PeerErrorCallback>,
}

impl PeerBuilder {
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Report to these metrics instead of unexported ones.
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share a label cache between peers.
    pub fn label_cache(mut self, labels: Arc<MetricLabelCache>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(Arc<Peer>, PeerError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Create the peer and one dispatch queue per channel supported by both
    /// the remote node and the local channel table.
    pub fn build(self) -> PeerResult<Arc<Peer>> {
        self.config.validate()?;

        let channels = self.node_info.channels.clone();
        let registered: Vec<ChannelId> = self
            .table
            .channel_ids()
            .filter(|id| channels.contains(id))
            .collect();
        let queues = Arc::new(DispatchQueues::new(
            registered,
            self.config.dispatch_queue_capacity,
        ));
        let id_label = self.node_info.node_id.to_string();

        Ok(Arc::new(Peer {
            conn: self.conn,
            node_info: self.node_info,
            channels,
            table: self.table,
            queues,
            config: self.config,
            data: PeerData::new(),
            metrics: self.metrics.unwrap_or_default(),
            labels: self.labels.unwrap_or_default(),
            on_error: self.on_error,
            state: RwLock::new(LifecycleState::Created),
            transition: tokio::sync::Mutex::new(()),
            quit: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            processors: Arc::new(AtomicUsize::new(0)),
            flushed: AtomicBool::new(false),
            removal_failed: AtomicBool::new(false),
            id_label,
        }))
    }
}

/// A connected remote node.
///
/// Before using a peer the connection must have completed its handshake.
pub struct Peer {
    conn: PeerConn,
    node_info: NodeInfo,
    /// Channels the remote supports, cached from `node_info`.
    channels: Vec<ChannelId>,
    table: ChannelTable,
    queues: Arc<DispatchQueues>,
    config: PeerConfig,
    data: PeerData,
    metrics: Arc<Metrics>,
    labels: Arc<MetricLabelCache>,
    on_error: Option<PeerErrorCallback>,
    state: RwLock<LifecycleState>,
    /// Serializes start and stop.
    transition: tokio::sync::Mutex<()>,
    quit: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Live channel processors.
    processors: Arc<AtomicUsize>,
    flushed: AtomicBool,
    removal_failed: AtomicBool,
    id_label: String,
}

impl Peer {
    pub fn builder(conn: PeerConn, node_info: NodeInfo, table: ChannelTable) -> PeerBuilder {
        PeerBuilder {
            conn,
            node_info,
            table,
            config: PeerConfig::default(),
            metrics: None,
            labels: None,
            on_error: None,
        }
    }

    // ---------------------------------------------------------------
    // Lifecycle

    /// Start the transport, then one processor per registered channel and
    /// the metrics reporter.
    ///
    /// If the transport fails to start the peer stays `Created` and nothing
    /// is spawned.
    pub async fn start(self: &Arc<Self>) -> PeerResult<()> {
        let _guard = self.transition.lock().await;
        self.expect_state(LifecycleState::Created)?;

        let router = Arc::new(InboundRouter::new(
            Arc::downgrade(self),
            Arc::clone(&self.queues),
        ));
        self.conn.transport.start(router).await?;

        let mut tasks = Vec::new();
        for (channel, rx) in self.queues.take_receivers() {
            let Some(binding) = self.table.get(channel).cloned() else {
                continue;
            };
            tasks.push(spawn_channel_processor(
                Arc::clone(self),
                channel,
                binding,
                rx,
                self.quit.clone(),
                Arc::clone(&self.processors),
            ));
        }
        tasks.push(tokio::spawn(metrics_reporter(
            Arc::clone(self),
            self.quit.clone(),
        )));
        *self.tasks.lock() = tasks;
        *self.state.write() = LifecycleState::Running;

        info!(
            peer = %self.id(),
            addr = %self.conn.socket_addr.dial_string(),
            outbound = self.conn.outbound,
            channels = ?self.queues.channel_ids(),
            "Peer started"
        );
        Ok(())
    }

    /// Deliver every send accepted so far, then close the connection.
    ///
    /// Must complete before [`Peer::stop`] is called. Only the first call on
    /// a running peer has an effect.
    pub async fn flush_stop(&self) {
        if !self.is_running() {
            warn!(
                peer = %self.id(),
                state = ?self.state(),
                "flush_stop on a peer that is not running, ignoring"
            );
            return;
        }
        if self.flushed.swap(true, Ordering::SeqCst) {
            warn!(peer = %self.id(), "flush_stop called more than once, ignoring");
            return;
        }
        debug!(peer = %self.id(), "Flushing and stopping connection");
        self.conn.transport.flush_stop().await;
    }

    /// Stop the transport, signal every processor to quit and wait for them.
    ///
    /// Payloads still queued are discarded. A reactor call in progress is not
    /// interrupted; if it outlives the configured stop timeout its task is
    /// left to finish on its own. When called from one of this peer's
    /// reactors, the calling processor is not waited for.
    pub async fn stop(&self) -> PeerResult<()> {
        let _guard = self.transition.lock().await;
        self.expect_state(LifecycleState::Running)?;
        *self.state.write() = LifecycleState::Stopping;

        if let Err(e) = self.conn.transport.stop().await {
            debug!(peer = %self.id(), error = %e, "Error while stopping peer");
        }
        self.quit.cancel();

        let current = tokio::task::try_id();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock())
            .into_iter()
            .filter(|task| Some(task.id()) != current)
            .collect();
        let count = tasks.len();
        if tokio::time::timeout(self.config.stop_timeout(), futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(
                peer = %self.id(),
                tasks = count,
                timeout = ?self.config.stop_timeout(),
                "Peer tasks still running after stop timeout"
            );
        }

        *self.state.write() = LifecycleState::Stopped;
        info!(peer = %self.id(), "Peer stopped");
        Ok(())
    }

    /// Close the raw connection. For peers that were never started.
    pub fn close_conn(&self) -> Result<(), TransportError> {
        self.conn.transport.close()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    fn expect_state(&self, expected: LifecycleState) -> PeerResult<()> {
        let actual = self.state();
        if actual != expected {
            return Err(PeerError::InvalidState { expected, actual });
        }
        Ok(())
    }

    /// Report a fatal error to the supervisor callback.
    pub(crate) fn report_error(self: &Arc<Self>, error: PeerError) {
        error!(peer = %self.id(), error = %error, "Peer error");
        if let Some(callback) = &self.on_error {
            callback(Arc::clone(self), error);
        }
    }

    // ---------------------------------------------------------------
    // Identity and status

    /// The peer's node id.
    pub fn id(&self) -> NodeId {
        self.node_info.node_id
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    /// Whether we dialed this peer.
    pub fn is_outbound(&self) -> bool {
        self.conn.outbound
    }

    /// Whether we redial this peer when it disconnects.
    pub fn is_persistent(&self) -> bool {
        self.conn.persistent
    }

    /// Address of the socket. For outbound peers it is the dialed address,
    /// for inbound peers the address returned by the connection; in neither
    /// case the listen address from the peer's node info.
    pub fn socket_addr(&self) -> &NetAddress {
        &self.conn.socket_addr
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.conn.ip
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.transport.remote_addr()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.conn.transport.status()
    }

    /// Channels the remote node supports.
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// Channels with a dispatch queue and processor.
    pub fn registered_channels(&self) -> Vec<ChannelId> {
        self.queues.channel_ids()
    }

    /// Number of channel processor tasks still alive.
    pub fn running_processors(&self) -> usize {
        self.processors.load(Ordering::SeqCst)
    }

    /// Whether the remote node reported knowing `channel`.
    pub fn has_channel(&self, channel: ChannelId) -> bool {
        if self.channels.contains(&channel) {
            return true;
        }
        debug!(
            peer = %self.id(),
            channel,
            channels = ?self.channels,
            "Unknown channel for peer"
        );
        false
    }

    /// Whether the send queue of `channel` has room.
    pub fn can_send(&self, channel: ChannelId) -> bool {
        self.is_running() && self.conn.transport.can_send(channel)
    }

    // ---------------------------------------------------------------
    // Sending

    /// Send `message` on `channel`, waiting up to the transport's send
    /// timeout for queue space.
    ///
    /// Returns `false` if the peer is not running, the channel is unknown
    /// to the peer, the message fails to encode or the queue stayed full.
    pub async fn send(&self, channel: ChannelId, message: &dyn Message) -> bool {
        let Some((bytes, label)) = self.prepare_send(channel, message) else {
            return false;
        };
        let len = bytes.len();
        let sent = self.conn.transport.send(channel, bytes).await;
        if sent {
            self.record_send(channel, &label, len);
        }
        sent
    }

    /// Like [`Peer::send`] but returns `false` immediately if the queue is
    /// full.
    pub fn try_send(&self, channel: ChannelId, message: &dyn Message) -> bool {
        let Some((bytes, label)) = self.prepare_send(channel, message) else {
            return false;
        };
        let len = bytes.len();
        let sent = self.conn.transport.try_send(channel, bytes);
        if sent {
            self.record_send(channel, &label, len);
        }
        sent
    }

    /// Checks, wraps and encodes an outbound message. `None` means the send
    /// fails without touching the transport.
    fn prepare_send(&self, channel: ChannelId, message: &dyn Message) -> Option<(Bytes, Arc<str>)> {
        if !self.is_running() || !self.has_channel(channel) {
            return None;
        }
        let label = self.labels.message_label(message.type_name());

        let wrapped;
        let message: &dyn Message = match message.as_wrapper() {
            Some(wrapper) => {
                wrapped = wrapper.wrap();
                &*wrapped
            }
            None => message,
        };

        match message.encode() {
            Ok(bytes) => Some((bytes, label)),
            Err(e) => {
                error!(peer = %self.id(), channel, error = %e, "Failed to encode message to send");
                None
            }
        }
    }

    fn record_send(&self, channel: ChannelId, label: &str, len: usize) {
        self.metrics
            .peer_send_bytes_total
            .with_label_values(&[&self.id_label, self.labels.channel_label(channel)])
            .inc_by(len as f64);
        self.metrics
            .message_send_bytes_total
            .with_label_values(&[label])
            .inc_by(len as f64);
    }

    pub(crate) fn record_receive(&self, channel: ChannelId, type_name: &'static str, len: usize) {
        self.metrics
            .peer_receive_bytes_total
            .with_label_values(&[&self.id_label, self.labels.channel_label(channel)])
            .inc_by(len as f64);
        let label = self.labels.message_label(type_name);
        self.metrics
            .message_receive_bytes_total
            .with_label_values(&[label.as_ref()])
            .inc_by(len as f64);
    }

    // ---------------------------------------------------------------
    // Metadata

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<DataValue> {
        self.data.get(key)
    }

    /// Typed value stored under `key`.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.data.get_as(key)
    }

    /// Store `value` under `key`.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.data.set(key, value)
    }

    pub fn data(&self) -> &PeerData {
        &self.data
    }

    /// Record that removing this peer failed once.
    pub fn set_removal_failed(&self) {
        self.removal_failed.store(true, Ordering::SeqCst);
    }

    pub fn removal_failed(&self) -> bool {
        self.removal_failed.load(Ordering::SeqCst)
    }

    // ---------------------------------------------------------------
    // Metrics

    /// Publish the pending-send and dispatch queue gauges.
    pub fn report_metrics(&self) {
        let status = self.conn.transport.status();
        self.metrics
            .peer_pending_send_bytes
            .with_label_values(&[&self.id_label])
            .set(status.pending_send_total() as f64);

        for (channel, depth) in self.queues.depths() {
            self.metrics
                .peer_dispatch_queue_depth
                .with_label_values(&[&self.id_label, self.labels.channel_label(channel)])
                .set(depth as f64);
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.conn.outbound { "out" } else { "in" };
        write!(
            f,
            "Peer{{{} {} {}}}",
            self.conn.socket_addr.dial_string(),
            self.id(),
            direction
        )
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id())
            .field("socket_addr", &self.conn.socket_addr)
            .field("outbound", &self.conn.outbound)
            .field("persistent", &self.conn.persistent)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Periodically publish queue gauges until the peer quits.
async fn metrics_reporter(peer: Arc<Peer>, quit: CancellationToken) {
    let period = peer.config.metrics_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = quit.cancelled() => return,
            _ = ticker.tick() => peer.report_metrics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::message::{Decode, Envelope, MessageType, Wrap};
    use crate::reactor::Reactor;
    use crate::transport::{ChannelStatus, InboundHandler};
    use async_trait::async_trait;

    #[derive(Default)]
    struct StubTransport {
        sends: AtomicUsize,
        fail_start: bool,
        pending: usize,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn start(&self, _handler: Arc<dyn InboundHandler>) -> Result<(), TransportError> {
            if self.fail_start {
                return Err(TransportError::Other("refused".into()));
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn flush_stop(&self) {}

        async fn send(&self, _channel: ChannelId, _bytes: Bytes) -> bool {
            self.sends.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn try_send(&self, _channel: ChannelId, _bytes: Bytes) -> bool {
            self.sends.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn can_send(&self, _channel: ChannelId) -> bool {
            true
        }

        fn status(&self) -> ConnectionStatus {
            ConnectionStatus {
                duration: Default::default(),
                channels: vec![ChannelStatus {
                    id: 0x20,
                    send_queue_size: self.pending,
                    ..Default::default()
                }],
            }
        }

        fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn remote_addr(&self) -> SocketAddr {
            "192.0.2.7:26656".parse().unwrap()
        }
    }

    #[derive(Debug)]
    struct Note(Vec<u8>);

    impl Message for Note {
        fn encode(&self) -> Result<Bytes, CodecError> {
            Ok(Bytes::copy_from_slice(&self.0))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Decode for Note {
        fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
            Ok(Note(bytes.to_vec()))
        }
    }

    #[derive(Debug)]
    struct Unencodable;

    impl Message for Unencodable {
        fn encode(&self) -> Result<Bytes, CodecError> {
            Err(CodecError::Invalid("cannot encode".into()))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Encodes through its envelope.
    #[derive(Debug)]
    struct Inner;

    impl Message for Inner {
        fn encode(&self) -> Result<Bytes, CodecError> {
            Err(CodecError::Invalid("must be wrapped".into()))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_wrapper(&self) -> Option<&dyn Wrap> {
            Some(self)
        }
    }

    impl Wrap for Inner {
        fn wrap(&self) -> Box<dyn Message> {
            Box::new(Note(vec![0xee]))
        }
    }

    struct Noop;

    #[async_trait]
    impl Reactor for Noop {
        async fn receive(&self, _envelope: Envelope) {}
    }

    fn peer_with(transport: Arc<StubTransport>, remote_channels: Vec<ChannelId>) -> Arc<Peer> {
        let id = NodeId::from_public_key(b"remote");
        let conn = PeerConn::new(
            true,
            false,
            transport.clone(),
            NetAddress::new(id, transport.remote_addr()),
        );
        let table = ChannelTable::builder()
            .register(0x20, Arc::new(Noop), MessageType::of::<Note>())
            .unwrap()
            .register(0x30, Arc::new(Noop), MessageType::of::<Note>())
            .unwrap()
            .build();
        Peer::builder(conn, NodeInfo::new(id, "testnet", remote_channels), table)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let peer = peer_with(Arc::new(StubTransport::default()), vec![0x20]);
        assert_eq!(peer.state(), LifecycleState::Created);

        peer.start().await.unwrap();
        assert!(peer.is_running());
        assert_eq!(peer.running_processors(), 1);
        assert!(matches!(
            peer.start().await,
            Err(PeerError::InvalidState {
                expected: LifecycleState::Created,
                actual: LifecycleState::Running,
            })
        ));

        peer.stop().await.unwrap();
        assert_eq!(peer.state(), LifecycleState::Stopped);
        assert_eq!(peer.running_processors(), 0);
        assert!(peer.stop().await.is_err());
    }

    #[test]
    fn test_oversized_queue_capacity_rejected_by_build() {
        let transport = Arc::new(StubTransport::default());
        let id = NodeId::from_public_key(b"remote");
        let conn = PeerConn::new(
            true,
            false,
            transport.clone(),
            NetAddress::new(id, transport.remote_addr()),
        );
        let table = ChannelTable::builder()
            .register(0x20, Arc::new(Noop), MessageType::of::<Note>())
            .unwrap()
            .build();
        let config = PeerConfig {
            dispatch_queue_capacity: usize::MAX,
            ..PeerConfig::default()
        };

        let result = Peer::builder(conn, NodeInfo::new(id, "testnet", vec![0x20]), table)
            .config(config)
            .build();
        assert!(matches!(result, Err(PeerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_failed_start_stays_created() {
        let transport = Arc::new(StubTransport {
            fail_start: true,
            ..Default::default()
        });
        let peer = peer_with(transport, vec![0x20]);

        assert!(matches!(peer.start().await, Err(PeerError::Transport(_))));
        assert_eq!(peer.state(), LifecycleState::Created);
        assert!(peer.tasks.lock().is_empty());
        // Receivers were not handed out.
        assert_eq!(peer.queues.take_receivers().len(), 1);
    }

    #[tokio::test]
    async fn test_send_requires_running_and_known_channel() {
        let transport = Arc::new(StubTransport::default());
        let peer = peer_with(transport.clone(), vec![0x20]);
        let msg = Note(vec![1, 2, 3]);

        assert!(!peer.try_send(0x20, &msg));
        peer.start().await.unwrap();

        assert!(peer.try_send(0x20, &msg));
        assert!(peer.send(0x20, &msg).await);
        assert!(!peer.try_send(0x21, &msg));
        assert!(!peer.try_send(0x20, &Unencodable));
        assert_eq!(transport.sends.load(Ordering::SeqCst), 2);

        peer.stop().await.unwrap();
        assert!(!peer.send(0x20, &msg).await);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_applies_wrapper() {
        let transport = Arc::new(StubTransport::default());
        let peer = peer_with(transport.clone(), vec![0x20]);
        peer.start().await.unwrap();

        assert!(peer.try_send(0x20, &Inner));
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
        peer.stop().await.unwrap();
    }

    #[test]
    fn test_registered_channels_intersect_remote() {
        let peer = peer_with(Arc::new(StubTransport::default()), vec![0x20, 0x21]);
        assert_eq!(peer.registered_channels(), vec![0x20]);
        assert_eq!(peer.channels(), &[0x20, 0x21]);
        assert!(peer.has_channel(0x21));
        assert!(!peer.has_channel(0x30));
    }

    #[test]
    fn test_accessors() {
        let peer = peer_with(Arc::new(StubTransport::default()), vec![0x20]);
        assert!(peer.is_outbound());
        assert!(!peer.is_persistent());
        assert_eq!(peer.remote_ip(), "192.0.2.7".parse::<IpAddr>().unwrap());
        assert_eq!(peer.socket_addr().port, 26656);
        assert!(peer.to_string().ends_with(" out}"));

        peer.set("syncing", true);
        assert_eq!(peer.get_as::<bool>("syncing").as_deref(), Some(&true));

        assert!(!peer.removal_failed());
        peer.set_removal_failed();
        assert!(peer.removal_failed());
    }

    #[test]
    fn test_report_metrics_sets_pending_gauge() {
        let transport = Arc::new(StubTransport {
            pending: 5,
            ..Default::default()
        });
        let peer = peer_with(transport, vec![0x20]);
        peer.report_metrics();

        let gauge = peer
            .metrics
            .peer_pending_send_bytes
            .with_label_values(&[&peer.id().to_string()]);
        assert_eq!(gauge.get(), 5.0);
    }
}
