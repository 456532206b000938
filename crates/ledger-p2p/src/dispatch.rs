//! Inbound dispatch: per-channel queues, the transport receive callback and
//! the channel processors that drain the queues.
//!
//! ```text
//! transport ──on_receive──▶ InboundRouter ──▶ DispatchQueue[ch] ──▶ processor[ch] ──▶ reactor
//! ```
//!
//! Each registered channel has exactly one queue and one processor, so
//! delivery is FIFO within a channel and independent across channels.

use crate::error::{PeerError, PeerResult, TransportError};
use crate::message::{ChannelId, Envelope, Message};
use crate::peer::Peer;
use crate::reactor::{ChannelBinding, MAX_CHANNELS};
use crate::transport::InboundHandler;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Bounded inbound queues of one peer, indexed by channel id.
pub(crate) struct DispatchQueues {
    senders: Box<[Option<mpsc::Sender<Bytes>>; MAX_CHANNELS]>,
    receivers: Mutex<Vec<(ChannelId, mpsc::Receiver<Bytes>)>>,
    capacity: usize,
}

impl DispatchQueues {
    /// One queue of `capacity` payloads per channel.
    pub(crate) fn new(channels: impl IntoIterator<Item = ChannelId>, capacity: usize) -> Self {
        let mut senders: Box<[Option<mpsc::Sender<Bytes>>; MAX_CHANNELS]> =
            Box::new(std::array::from_fn(|_| None));
        let mut receivers = Vec::new();
        for channel in channels {
            let (tx, rx) = mpsc::channel(capacity);
            senders[channel as usize] = Some(tx);
            receivers.push((channel, rx));
        }
        Self {
            senders,
            receivers: Mutex::new(receivers),
            capacity,
        }
    }

    pub(crate) fn sender(&self, channel: ChannelId) -> Option<&mpsc::Sender<Bytes>> {
        self.senders[channel as usize].as_ref()
    }

    /// Channels that have a queue, ascending.
    pub(crate) fn channel_ids(&self) -> Vec<ChannelId> {
        self.senders
            .iter()
            .enumerate()
            .filter(|(_, tx)| tx.is_some())
            .map(|(id, _)| id as ChannelId)
            .collect()
    }

    /// Hand the consuming ends to the processors. Empty after the first call.
    pub(crate) fn take_receivers(&self) -> Vec<(ChannelId, mpsc::Receiver<Bytes>)> {
        std::mem::take(&mut *self.receivers.lock())
    }

    /// Payloads waiting in each queue.
    pub(crate) fn depths(&self) -> Vec<(ChannelId, usize)> {
        self.senders
            .iter()
            .enumerate()
            .filter_map(|(id, tx)| {
                tx.as_ref()
                    .map(|tx| (id as ChannelId, self.capacity - tx.capacity()))
            })
            .collect()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Receive and error callbacks installed on the transport.
pub(crate) struct InboundRouter {
    peer: Weak<Peer>,
    queues: Arc<DispatchQueues>,
}

impl InboundRouter {
    pub(crate) fn new(peer: Weak<Peer>, queues: Arc<DispatchQueues>) -> Self {
        Self { peer, queues }
    }

    fn report(&self, error: PeerError) {
        match self.peer.upgrade() {
            Some(peer) => peer.report_error(error),
            None => warn!(error = %error, "Inbound error for a dropped peer"),
        }
    }
}

#[async_trait]
impl InboundHandler for InboundRouter {
    async fn on_receive(&self, channel: ChannelId, payload: &[u8]) -> Result<(), PeerError> {
        // The transport reuses its read buffer once we return.
        let bytes = Bytes::copy_from_slice(payload);

        let Some(tx) = self.queues.sender(channel) else {
            self.report(PeerError::UnknownChannel(channel));
            return Err(PeerError::UnknownChannel(channel));
        };

        trace!(channel, len = bytes.len(), "Queueing inbound payload");
        if tx.send(bytes).await.is_err() {
            // Processor already gone; the peer is stopping or has failed.
            debug!(channel, "Dropping inbound payload for closed channel");
        }
        Ok(())
    }

    fn on_error(&self, error: TransportError) {
        self.report(PeerError::Transport(error));
    }
}

/// Counts a live processor until dropped with its task.
struct ProcessorGuard(Arc<AtomicUsize>);

impl ProcessorGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for ProcessorGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawn the processor for one channel behind a recovery boundary.
///
/// A decode failure or a panic in the reactor ends the task and is reported
/// through the peer's error callback instead of unwinding further.
pub(crate) fn spawn_channel_processor(
    peer: Arc<Peer>,
    channel: ChannelId,
    binding: ChannelBinding,
    rx: mpsc::Receiver<Bytes>,
    quit: CancellationToken,
    live: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    let guard = ProcessorGuard::new(live);
    tokio::spawn(async move {
        let _guard = guard;
        let processor = process_channel(Arc::clone(&peer), channel, binding, rx, quit);
        let result = match AssertUnwindSafe(processor).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(PeerError::Panic(panic_message(panic.as_ref()))),
        };
        if let Err(error) = result {
            peer.report_error(error);
        }
    })
}

async fn process_channel(
    peer: Arc<Peer>,
    channel: ChannelId,
    binding: ChannelBinding,
    mut rx: mpsc::Receiver<Bytes>,
    quit: CancellationToken,
) -> PeerResult<()> {
    debug!(peer = %peer.id(), channel, "Channel processor started");
    loop {
        let payload = tokio::select! {
            biased;
            _ = quit.cancelled() => break,
            next = rx.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
        };

        let decoded = binding
            .message_type
            .decode(&payload)
            .map_err(|source| PeerError::Decode {
                channel,
                type_name: binding.message_type.name(),
                source,
            })?;
        let message = unwrap_envelope(channel, decoded)?;

        peer.record_receive(channel, message.type_name(), payload.len());

        binding
            .reactor
            .receive(Envelope {
                channel_id: channel,
                src: Arc::clone(&peer),
                message,
            })
            .await;
    }
    // Whatever is still queued is dropped with the receiver.
    debug!(peer = %peer.id(), channel, pending = rx.len(), "Channel processor stopped");
    Ok(())
}

fn unwrap_envelope(channel: ChannelId, decoded: Box<dyn Message>) -> PeerResult<Box<dyn Message>> {
    let unwrapped = match decoded.as_unwrapper() {
        Some(envelope) => Some(
            envelope
                .unwrap_message()
                .map_err(|source| PeerError::Unwrap { channel, source })?,
        ),
        None => None,
    };
    Ok(unwrapped.unwrap_or(decoded))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
