//! Test harness for integration tests.
//!
//! Provides an in-memory transport, recording reactors, an error collector
//! and a builder that wires them into a started-or-not [`Peer`].

use crate::fixtures::random_node_id;
use async_trait::async_trait;
use bytes::Bytes;
use ledger_p2p::{
    ChannelId, ChannelStatus, ChannelTable, ConnectionStatus, Envelope, InboundHandler, Message,
    MessageType, Metrics, NetAddress, NodeId, NodeInfo, Peer, PeerConfig, PeerConn, PeerError,
    Reactor, TransportError, Transport,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Upper bound for any single wait in the suites.
pub const WAIT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber once per process. `RUST_LOG` applies.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ledger_p2p=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Await `fut`, failing the test if it takes longer than [`WAIT`].
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    timeout(WAIT, fut).await.expect("operation timed out")
}

// ---------------------------------------------------------------
// Transport

/// Operations the peer invoked on a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Start,
    Stop,
    FlushStop,
    Send(ChannelId, Bytes),
    TrySend(ChannelId, Bytes),
    Close,
}

/// In-memory transport.
///
/// Outbound frames sit in per-channel queues of `send_queue_capacity` until
/// [`MockTransport::drain`] or `flush_stop` takes them. Inbound frames are
/// injected with [`MockTransport::deliver`].
pub struct MockTransport {
    remote: SocketAddr,
    send_queue_capacity: usize,
    send_timeout: Duration,
    fail_start: AtomicBool,
    closed: AtomicBool,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    calls: Mutex<Vec<TransportCall>>,
    queues: Mutex<HashMap<ChannelId, VecDeque<Bytes>>>,
    flushed: Mutex<Vec<(ChannelId, Bytes)>>,
    space: Notify,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            remote: "10.0.0.7:26656".parse().expect("valid socket address"),
            send_queue_capacity: 16,
            send_timeout: Duration::from_millis(100),
            fail_start: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            handler: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            queues: Mutex::new(HashMap::new()),
            flushed: Mutex::new(Vec::new()),
            space: Notify::new(),
        }
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remote = remote;
        self
    }

    /// Make the next `start` fail.
    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Number of send and try_send calls.
    pub fn send_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Send(..) | TransportCall::TrySend(..)))
            .count()
    }

    /// Frames handed to the write path by `flush_stop`, in queue order.
    pub fn flushed(&self) -> Vec<(ChannelId, Bytes)> {
        self.flushed.lock().clone()
    }

    /// Frames currently queued on `channel`.
    pub fn queued(&self, channel: ChannelId) -> Vec<Bytes> {
        self.queues
            .lock()
            .get(&channel)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every frame queued on `channel`, as the writer would.
    pub fn drain(&self, channel: ChannelId) -> Vec<Bytes> {
        let drained = self
            .queues
            .lock()
            .get_mut(&channel)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        self.space.notify_waiters();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn handler(&self) -> Arc<dyn InboundHandler> {
        self.handler
            .lock()
            .clone()
            .expect("transport not started")
    }

    /// Hand an inbound frame to the installed handler, as the reader would.
    pub async fn deliver(&self, channel: ChannelId, payload: &[u8]) -> Result<(), PeerError> {
        let handler = self.handler();
        handler.on_receive(channel, payload).await
    }

    /// Report a transport failure to the installed handler.
    pub fn fail(&self, error: TransportError) {
        self.handler().on_error(error);
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    fn push_if_room(&self, channel: ChannelId, bytes: &Bytes) -> bool {
        let mut queues = self.queues.lock();
        let queue = queues.entry(channel).or_default();
        if queue.len() >= self.send_queue_capacity {
            return false;
        }
        queue.push_back(bytes.clone());
        true
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self, handler: Arc<dyn InboundHandler>) -> Result<(), TransportError> {
        self.record(TransportCall::Start);
        if self.fail_start.load(Ordering::SeqCst) {
            debug!(remote = %self.remote, "Mock transport refusing start");
            return Err(TransportError::Other("start refused".into()));
        }
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Stop);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStopped);
        }
        Ok(())
    }

    async fn flush_stop(&self) {
        self.record(TransportCall::FlushStop);
        let mut queues = self.queues.lock();
        let mut channels: Vec<_> = queues.keys().copied().collect();
        channels.sort_unstable();
        let mut flushed = self.flushed.lock();
        for channel in channels {
            if let Some(queue) = queues.get_mut(&channel) {
                flushed.extend(queue.drain(..).map(|bytes| (channel, bytes)));
            }
        }
        debug!(frames = flushed.len(), "Mock transport flushed");
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn send(&self, channel: ChannelId, bytes: Bytes) -> bool {
        self.record(TransportCall::Send(channel, bytes.clone()));
        let deadline = Instant::now() + self.send_timeout;
        loop {
            if self.is_closed() {
                return false;
            }
            let notified = self.space.notified();
            if self.push_if_room(channel, &bytes) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    fn try_send(&self, channel: ChannelId, bytes: Bytes) -> bool {
        self.record(TransportCall::TrySend(channel, bytes.clone()));
        !self.is_closed() && self.push_if_room(channel, &bytes)
    }

    fn can_send(&self, channel: ChannelId) -> bool {
        !self.is_closed()
            && self
                .queues
                .lock()
                .get(&channel)
                .map_or(true, |q| q.len() < self.send_queue_capacity)
    }

    fn status(&self) -> ConnectionStatus {
        let queues = self.queues.lock();
        let mut channels: Vec<ChannelStatus> = queues
            .iter()
            .map(|(id, q)| ChannelStatus {
                id: *id,
                send_queue_capacity: self.send_queue_capacity,
                send_queue_size: q.len(),
                ..Default::default()
            })
            .collect();
        channels.sort_by_key(|c| c.id);
        ConnectionStatus {
            duration: Duration::from_secs(1),
            channels,
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

// ---------------------------------------------------------------
// Reactors

/// A message a [`RecordingReactor`] was handed.
#[derive(Debug)]
pub struct Received {
    pub channel: ChannelId,
    pub src: NodeId,
    pub message: Box<dyn Message>,
}

/// Reactor that records every envelope it receives.
///
/// With a gate, each call records its envelope and then waits for a permit,
/// which lets tests hold a processor inside its handler.
#[derive(Default)]
pub struct RecordingReactor {
    received: Mutex<Vec<Received>>,
    gate: Option<Arc<Semaphore>>,
    arrived: Notify,
}

impl RecordingReactor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A reactor whose calls block until [`RecordingReactor::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Default::default()
        })
    }

    /// Let `n` blocked or future calls return.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    /// Run `f` over the received messages.
    pub fn with_received<R>(&self, f: impl FnOnce(&[Received]) -> R) -> R {
        f(&self.received.lock())
    }

    /// Received messages downcast to `T`, skipping other types.
    pub fn messages<T: Message + Clone>(&self) -> Vec<T> {
        self.received
            .lock()
            .iter()
            .filter_map(|r| r.message.downcast_ref::<T>().cloned())
            .collect()
    }

    /// Wait until at least `n` messages arrived. `false` on timeout.
    pub async fn wait_for(&self, n: usize) -> bool {
        let deadline = Instant::now() + WAIT;
        loop {
            let notified = self.arrived.notified();
            if self.count() >= n {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count() >= n;
            }
        }
    }
}

#[async_trait]
impl Reactor for RecordingReactor {
    async fn receive(&self, envelope: Envelope) {
        self.received.lock().push(Received {
            channel: envelope.channel_id,
            src: envelope.src.id(),
            message: envelope.message,
        });
        self.arrived.notify_waiters();
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

/// Reactor that stops the sending peer from inside its handler and
/// records how long the stop took.
#[derive(Default)]
pub struct StoppingReactor {
    outcome: Mutex<Option<(Duration, Result<(), PeerError>)>>,
}

impl StoppingReactor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Duration of the stop and whether it succeeded, once it returned.
    pub fn outcome(&self) -> Option<(Duration, bool)> {
        self.outcome
            .lock()
            .as_ref()
            .map(|(elapsed, result)| (*elapsed, result.is_ok()))
    }
}

#[async_trait]
impl Reactor for StoppingReactor {
    async fn receive(&self, envelope: Envelope) {
        let started = Instant::now();
        let result = envelope.src.stop().await;
        *self.outcome.lock() = Some((started.elapsed(), result));
    }
}

/// Reactor that panics on every message.
pub struct PanickingReactor;

#[async_trait]
impl Reactor for PanickingReactor {
    async fn receive(&self, envelope: Envelope) {
        panic!("reactor rejected message on channel {:#04x}", envelope.channel_id);
    }
}

// ---------------------------------------------------------------
// Errors

/// Collects errors passed to the peer's error callback.
#[derive(Default)]
pub struct ErrorSink {
    errors: Mutex<Vec<(NodeId, PeerError)>>,
    arrived: Notify,
}

impl ErrorSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, peer: NodeId, error: PeerError) {
        self.errors.lock().push((peer, error));
        self.arrived.notify_waiters();
    }

    pub fn count(&self) -> usize {
        self.errors.lock().len()
    }

    /// Whether any collected error satisfies `predicate`.
    pub fn any(&self, predicate: impl Fn(&PeerError) -> bool) -> bool {
        self.errors.lock().iter().any(|(_, e)| predicate(e))
    }

    /// Ids of the peers that reported errors, in order.
    pub fn peers(&self) -> Vec<NodeId> {
        self.errors.lock().iter().map(|(id, _)| *id).collect()
    }

    /// Wait until an error arrives. `false` on timeout.
    pub async fn wait_for_error(&self) -> bool {
        let deadline = Instant::now() + WAIT;
        loop {
            let notified = self.arrived.notified();
            if self.count() > 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count() > 0;
            }
        }
    }
}

// ---------------------------------------------------------------
// Peers

/// A peer wired to a [`MockTransport`] and an [`ErrorSink`].
pub struct TestPeer {
    pub peer: Arc<Peer>,
    pub transport: Arc<MockTransport>,
    pub errors: Arc<ErrorSink>,
}

impl TestPeer {
    pub fn builder() -> TestPeerBuilder {
        TestPeerBuilder::default()
    }

    /// Start the peer, failing the test on error.
    pub async fn started(self) -> Self {
        within(self.peer.start()).await.expect("peer start");
        self
    }
}

/// Builder for [`TestPeer`].
pub struct TestPeerBuilder {
    node_id: NodeId,
    remote_channels: Vec<ChannelId>,
    bindings: Vec<(ChannelId, Arc<dyn Reactor>, MessageType)>,
    config: PeerConfig,
    transport: Option<MockTransport>,
    metrics: Option<Arc<Metrics>>,
    outbound: bool,
}

impl Default for TestPeerBuilder {
    fn default() -> Self {
        Self {
            node_id: random_node_id(),
            remote_channels: Vec::new(),
            bindings: Vec::new(),
            config: PeerConfig {
                stop_timeout_ms: 1_000,
                ..PeerConfig::default()
            },
            transport: None,
            metrics: None,
            outbound: true,
        }
    }
}

impl TestPeerBuilder {
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    /// Channels the remote announces in its node info.
    pub fn remote_channels(mut self, channels: &[ChannelId]) -> Self {
        self.remote_channels = channels.to_vec();
        self
    }

    /// Register a reactor locally.
    pub fn channel(
        mut self,
        channel: ChannelId,
        reactor: Arc<dyn Reactor>,
        message_type: MessageType,
    ) -> Self {
        self.bindings.push((channel, reactor, message_type));
        self
    }

    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: MockTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn inbound(mut self) -> Self {
        self.outbound = false;
        self
    }

    pub fn build(self) -> TestPeer {
        let mut table = ChannelTable::builder();
        for (channel, reactor, message_type) in self.bindings {
            table = table
                .register(channel, reactor, message_type)
                .expect("distinct channels");
        }

        let transport = Arc::new(self.transport.unwrap_or_default());
        let socket_addr = NetAddress::new(self.node_id, transport.remote_addr());
        let conn = PeerConn::new(
            self.outbound,
            false,
            Arc::clone(&transport) as Arc<dyn Transport>,
            socket_addr,
        );
        let node_info = NodeInfo::new(self.node_id, "test-chain", self.remote_channels)
            .with_moniker("remote");

        let errors = ErrorSink::new();
        let sink = Arc::clone(&errors);
        let mut builder = Peer::builder(conn, node_info, table.build())
            .config(self.config)
            .on_error(move |peer, error| sink.push(peer.id(), error));
        if let Some(metrics) = self.metrics {
            builder = builder.metrics(metrics);
        }

        TestPeer {
            peer: builder.build().expect("valid peer"),
            transport,
            errors,
        }
    }
}
