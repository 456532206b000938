//! Node identity, network addresses and the remote capability descriptor.

use crate::message::ChannelId;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Length of a node id in bytes.
pub const NODE_ID_LEN: usize = 20;

/// Cryptographic node identifier.
///
/// First 20 bytes of Blake2b-256 over the node's public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

impl NodeId {
    /// Derive the id from a public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let hash = Blake2b::<U32>::digest(public_key);
        let mut id = [0u8; NODE_ID_LEN];
        id.copy_from_slice(&hash[..NODE_ID_LEN]);
        Self(id)
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid node id hex: {}", e))?;
        let id: [u8; NODE_ID_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            format!(
                "invalid node id length: expected {}, got {}",
                NODE_ID_LEN,
                b.len()
            )
        })?;
        Ok(Self(id))
    }
}

/// Network address of a node: its id plus an IP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetAddress {
    /// Node id.
    pub id: NodeId,
    /// IP address.
    pub ip: IpAddr,
    /// Port.
    pub port: u16,
}

impl NetAddress {
    /// Create from a node id and socket address.
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    /// Socket address of this endpoint.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// `ip:port` string suitable for dialing.
    pub fn dial_string(&self) -> String {
        self.socket_addr().to_string()
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.socket_addr())
    }
}

/// Information a remote node announced about itself during the handshake.
///
/// Read-only from the peer's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Announced node id.
    pub node_id: NodeId,
    /// Address the node says it listens on. Not necessarily the address of
    /// the socket we are connected through.
    pub listen_addr: String,
    /// Network (chain) name.
    pub network: String,
    /// Protocol version.
    pub version: (u8, u8, u8),
    /// Human readable node name.
    pub moniker: String,
    /// Logical channels the node supports.
    pub channels: Vec<ChannelId>,
}

impl NodeInfo {
    /// Create node info with the given channel list.
    pub fn new(node_id: NodeId, network: impl Into<String>, channels: Vec<ChannelId>) -> Self {
        Self {
            node_id,
            listen_addr: String::new(),
            network: network.into(),
            version: crate::PROTOCOL_VERSION,
            moniker: String::new(),
            channels,
        }
    }

    /// Set the announced listen address.
    pub fn with_listen_addr(mut self, listen_addr: impl Into<String>) -> Self {
        self.listen_addr = listen_addr.into();
        self
    }

    /// Set the moniker.
    pub fn with_moniker(mut self, moniker: impl Into<String>) -> Self {
        self.moniker = moniker.into();
        self
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.node_id
    }
}
