//! # ledger-p2p
//!
//! Per-connection peer for the P2P layer of a ledger node.
//!
//! This crate provides:
//! - Multiplexing of logical channels over one authenticated connection
//! - Per-channel dispatch queues and processors with in-order delivery
//! - Blocking and best-effort send paths
//! - Peer lifecycle (start, flush-stop, stop) with crash-fast error reporting
//! - Prometheus metrics for per-peer and per-message traffic
//!
//! Framing, encryption and socket I/O belong to the [`Transport`]
//! implementation; message handling belongs to the [`Reactor`]s registered
//! in a [`ChannelTable`].

pub mod config;
mod dispatch;
mod error;
mod identity;
mod message;
mod metadata;
pub mod metrics;
mod peer;
mod reactor;
mod transport;

pub use config::PeerConfig;
pub use error::{CodecError, PeerError, PeerResult, TransportError};
pub use identity::{NetAddress, NodeId, NodeInfo, NODE_ID_LEN};
pub use message::{ChannelId, Decode, Envelope, Message, MessageType, Unwrap, Wrap};
pub use metadata::{DataValue, PeerData};
pub use metrics::{MetricLabelCache, Metrics, MetricsError};
pub use peer::{LifecycleState, Peer, PeerBuilder, PeerConn, PeerErrorCallback};
pub use reactor::{ChannelBinding, ChannelTable, ChannelTableBuilder, Reactor, MAX_CHANNELS};
pub use transport::{ChannelStatus, ConnectionStatus, InboundHandler, Transport};

/// Protocol version announced in node info.
pub const PROTOCOL_VERSION: (u8, u8, u8) = (0, 1, 0);
