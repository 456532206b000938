//! Peer metrics backed by Prometheus.

use crate::message::ChannelId;
use crate::reactor::MAX_CHANNELS;
use dashmap::DashMap;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use std::sync::Arc;
use thiserror::Error;

/// Metric namespace.
pub const METRICS_NAMESPACE: &str = "p2p";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Counters and gauges updated by peers.
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Bytes received from a peer, by channel.
    pub peer_receive_bytes_total: CounterVec,
    /// Bytes sent to a peer, by channel.
    pub peer_send_bytes_total: CounterVec,
    /// Bytes received, by message type.
    pub message_receive_bytes_total: CounterVec,
    /// Bytes sent, by message type.
    pub message_send_bytes_total: CounterVec,
    /// Bytes waiting in a peer's outbound queues.
    pub peer_pending_send_bytes: GaugeVec,
    /// Inbound payloads waiting in a peer's dispatch queue, by channel.
    pub peer_dispatch_queue_depth: GaugeVec,
}

impl Metrics {
    /// Create the collectors and register them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, MetricsError> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.peer_receive_bytes_total.clone()))?;
        registry.register(Box::new(metrics.peer_send_bytes_total.clone()))?;
        registry.register(Box::new(metrics.message_receive_bytes_total.clone()))?;
        registry.register(Box::new(metrics.message_send_bytes_total.clone()))?;
        registry.register(Box::new(metrics.peer_pending_send_bytes.clone()))?;
        registry.register(Box::new(metrics.peer_dispatch_queue_depth.clone()))?;
        Ok(metrics)
    }

    /// Collectors that are never exported.
    pub fn nop() -> Self {
        Self::unregistered().expect("static metric definitions are valid")
    }

    fn unregistered() -> Result<Self, MetricsError> {
        let counter = |name: &str, help: &str, labels: &[&str]| {
            CounterVec::new(Opts::new(name, help).namespace(METRICS_NAMESPACE), labels)
        };
        let gauge = |name: &str, help: &str, labels: &[&str]| {
            GaugeVec::new(Opts::new(name, help).namespace(METRICS_NAMESPACE), labels)
        };

        Ok(Self {
            peer_receive_bytes_total: counter(
                "peer_receive_bytes_total",
                "Number of bytes received from a given peer, per channel.",
                &["peer_id", "ch_id"],
            )?,
            peer_send_bytes_total: counter(
                "peer_send_bytes_total",
                "Number of bytes sent to a given peer, per channel.",
                &["peer_id", "ch_id"],
            )?,
            message_receive_bytes_total: counter(
                "message_receive_bytes_total",
                "Number of bytes of each message type received.",
                &["message_type"],
            )?,
            message_send_bytes_total: counter(
                "message_send_bytes_total",
                "Number of bytes of each message type sent.",
                &["message_type"],
            )?,
            peer_pending_send_bytes: gauge(
                "peer_pending_send_bytes",
                "Pending bytes to be sent to a given peer.",
                &["peer_id"],
            )?,
            peer_dispatch_queue_depth: gauge(
                "peer_dispatch_queue_depth",
                "Inbound messages waiting to be processed, per peer and channel.",
                &["peer_id", "ch_id"],
            )?,
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::nop()
    }
}

/// Memoized metric label values.
///
/// Deriving a label from a type name allocates, and it is done on every
/// send and receive. Cached labels are shared, not copied.
#[derive(Debug)]
pub struct MetricLabelCache {
    message_labels: DashMap<&'static str, Arc<str>>,
    channel_labels: Box<[String; MAX_CHANNELS]>,
}

impl MetricLabelCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            message_labels: DashMap::new(),
            channel_labels: Box::new(std::array::from_fn(|id| format!("{:#x}", id))),
        }
    }

    /// Label for a message type name, e.g. `consensus::Vote` → `consensus_Vote`.
    pub fn message_label(&self, type_name: &'static str) -> Arc<str> {
        if let Some(label) = self.message_labels.get(type_name) {
            return Arc::clone(&label);
        }
        Arc::clone(
            &self
                .message_labels
                .entry(type_name)
                .or_insert_with(|| message_label_for(type_name).into()),
        )
    }

    /// Label for a channel id, e.g. `0x20`.
    pub fn channel_label(&self, channel: ChannelId) -> &str {
        &self.channel_labels[channel as usize]
    }
}

impl Default for MetricLabelCache {
    fn default() -> Self {
        Self::new()
    }
}

fn message_label_for(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let mut segments = base.rsplit("::");
    match (segments.next(), segments.next()) {
        (Some(ty), Some(module)) => format!("{}_{}", module, ty),
        (Some(ty), None) => ty.to_string(),
        _ => base.to_string(),
    }
}
