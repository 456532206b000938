//! Peer, transport and codec error types.

use crate::peer::LifecycleState;
use thiserror::Error;

/// Errors surfaced by the multiplexed transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires a started transport.
    #[error("Transport not started")]
    NotStarted,

    /// Transport was already stopped.
    #[error("Transport already stopped")]
    AlreadyStopped,

    /// Connection closed by the remote side.
    #[error("Connection closed")]
    Closed,

    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Other(String),
}

/// Message encoding and decoding errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Payload ended before the message was complete.
    #[error("Truncated payload")]
    Truncated,

    /// Payload is structurally invalid.
    #[error("Invalid payload: {0}")]
    Invalid(String),

    /// Envelope tag does not match any known variant.
    #[error("Unexpected tag: expected {expected}, got {got}")]
    UnexpectedTag { expected: u8, got: u8 },

    /// I/O error while encoding.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Peer errors.
///
/// Variants reported through the supervisor callback are fatal for the
/// connection; see [`PeerError::is_fatal`].
#[derive(Error, Debug)]
pub enum PeerError {
    /// Lifecycle operation called in the wrong state.
    #[error("Invalid peer state: expected {expected:?}, got {actual:?}")]
    InvalidState {
        expected: LifecycleState,
        actual: LifecycleState,
    },

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Inbound frame for a channel with no dispatch queue.
    #[error("Unknown channel {0:#04x}")]
    UnknownChannel(u8),

    /// Channel id registered twice in one channel table.
    #[error("Channel {0:#04x} registered twice")]
    DuplicateChannel(u8),

    /// Inbound payload failed to decode into the channel's message type.
    #[error("Decoding message on channel {channel:#04x} into {type_name}: {source}")]
    Decode {
        channel: u8,
        type_name: &'static str,
        #[source]
        source: CodecError,
    },

    /// Decoded envelope failed to unwrap into a concrete message.
    #[error("Unwrapping message on channel {channel:#04x}: {source}")]
    Unwrap {
        channel: u8,
        #[source]
        source: CodecError,
    },

    /// A channel processor panicked.
    #[error("Channel processor panicked: {0}")]
    Panic(String),

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PeerError {
    /// Whether this error breaks a connection invariant and requires the
    /// peer to be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PeerError::UnknownChannel(_)
                | PeerError::Decode { .. }
                | PeerError::Unwrap { .. }
                | PeerError::Panic(_)
                | PeerError::Transport(_)
        )
    }
}

/// Result type for peer operations.
pub type PeerResult<T> = Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PeerError::UnknownChannel(0x20).is_fatal());
        assert!(PeerError::Panic("boom".into()).is_fatal());
        assert!(PeerError::Decode {
            channel: 0x20,
            type_name: "A",
            source: CodecError::Truncated,
        }
        .is_fatal());
        assert!(!PeerError::DuplicateChannel(1).is_fatal());
        assert!(!PeerError::InvalidConfig("x".into()).is_fatal());
        assert!(!PeerError::InvalidState {
            expected: LifecycleState::Created,
            actual: LifecycleState::Running,
        }
        .is_fatal());
    }

    #[test]
    fn test_channel_rendered_as_hex() {
        let err = PeerError::UnknownChannel(0x21);
        assert_eq!(err.to_string(), "Unknown channel 0x21");
    }
}
