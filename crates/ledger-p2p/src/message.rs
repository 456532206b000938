//! Channel messages and their optional wire adapters.
//!
//! A channel declares one [`MessageType`]. Inbound payloads on that channel
//! are decoded into a fresh instance of it. Some message types are generic
//! envelopes around a family of concrete messages; they expose the
//! [`Unwrap`] capability on the inbound path, while the concrete messages
//! expose [`Wrap`] to produce the envelope on the outbound path. Messages
//! without either capability pass through untouched.

use crate::error::CodecError;
use crate::peer::Peer;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Logical channel identifier.
pub type ChannelId = u8;

/// A message carried on a logical channel.
pub trait Message: fmt::Debug + Send + Sync + 'static {
    /// Serialize the message.
    fn encode(&self) -> Result<Bytes, CodecError>;

    /// Concrete type name, used to derive metric labels.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Wrap capability, if this message travels inside an envelope.
    fn as_wrapper(&self) -> Option<&dyn Wrap> {
        None
    }

    /// Unwrap capability, if this message is an envelope.
    fn as_unwrapper(&self) -> Option<&dyn Unwrap> {
        None
    }
}

impl dyn Message {
    /// Downcast to a concrete message type.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Whether the message is of concrete type `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Converts a concrete message into its wire envelope.
pub trait Wrap {
    fn wrap(&self) -> Box<dyn Message>;
}

/// Converts a decoded envelope into its concrete message.
pub trait Unwrap {
    fn unwrap_message(&self) -> Result<Box<dyn Message>, CodecError>;
}

/// Concrete message types that can be decoded from bytes.
pub trait Decode: Sized {
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Message>, CodecError>;

/// The message type a channel expects on the wire.
#[derive(Clone, Copy)]
pub struct MessageType {
    name: &'static str,
    decode: DecodeFn,
}

impl MessageType {
    /// Descriptor for the concrete type `T`.
    pub fn of<T: Message + Decode>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            decode: |bytes| T::decode(bytes).map(|m| Box::new(m) as Box<dyn Message>),
        }
    }

    /// Type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decode a payload into a fresh instance of this type.
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Message>, CodecError> {
        (self.decode)(bytes)
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageType").field(&self.name).finish()
    }
}

/// An inbound message delivered to a reactor.
#[derive(Debug)]
pub struct Envelope {
    /// Channel the message arrived on.
    pub channel_id: ChannelId,
    /// Peer that sent it.
    pub src: Arc<Peer>,
    /// Decoded (and unwrapped) message.
    pub message: Box<dyn Message>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Buf, BufMut, BytesMut};

    #[derive(Debug, PartialEq)]
    struct Ping(u64);

    impl Message for Ping {
        fn encode(&self) -> Result<Bytes, CodecError> {
            let mut buf = BytesMut::with_capacity(8);
            buf.put_u64(self.0);
            Ok(buf.freeze())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Decode for Ping {
        fn decode(mut bytes: &[u8]) -> Result<Self, CodecError> {
            if bytes.len() != 8 {
                return Err(CodecError::Truncated);
            }
            Ok(Ping(bytes.get_u64()))
        }
    }

    #[test]
    fn test_message_type_decodes_fresh_instance() {
        let mt = MessageType::of::<Ping>();
        let bytes = Ping(42).encode().unwrap();

        let msg = mt.decode(&bytes).unwrap();
        assert!(msg.is::<Ping>());
        assert_eq!(msg.downcast_ref::<Ping>(), Some(&Ping(42)));
        assert!(mt.name().ends_with("Ping"));
    }

    #[test]
    fn test_message_type_reports_decode_error() {
        let mt = MessageType::of::<Ping>();
        assert!(matches!(mt.decode(&[1, 2]), Err(CodecError::Truncated)));
    }

    #[test]
    fn test_capabilities_default_to_none() {
        let msg: Box<dyn Message> = Box::new(Ping(1));
        assert!(msg.as_wrapper().is_none());
        assert!(msg.as_unwrapper().is_none());
        assert!(msg.type_name().ends_with("Ping"));
    }
}
