//! Message types and identities used across the suites.
//!
//! `Height` and `Text` have incompatible encodings, so bytes of one never
//! decode as the other. `Packet` is an envelope around `Ping` and `Pong`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ledger_p2p::{CodecError, Decode, Message, NodeId, Unwrap, Wrap, NODE_ID_LEN};
use rand::Rng;
use std::any::Any;

const HEIGHT_TAG: u8 = 0xa1;
const TEXT_TAG: u8 = 0xb2;
const PACKET_TAG: u8 = 0xc0;

const PACKET_PING: u8 = 1;
const PACKET_PONG: u8 = 2;

/// Random node id.
pub fn random_node_id() -> NodeId {
    let mut bytes = [0u8; NODE_ID_LEN];
    rand::thread_rng().fill(&mut bytes[..]);
    NodeId(bytes)
}

fn expect_tag(bytes: &mut &[u8], expected: u8) -> Result<(), CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Truncated);
    }
    let got = bytes.get_u8();
    if got != expected {
        return Err(CodecError::UnexpectedTag { expected, got });
    }
    Ok(())
}

/// Fixed-size message: tag, height, round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Height {
    pub height: u64,
    pub round: u32,
}

impl Height {
    pub fn new(height: u64, round: u32) -> Self {
        Self { height, round }
    }
}

impl Message for Height {
    fn encode(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(13);
        buf.put_u8(HEIGHT_TAG);
        buf.put_u64(self.height);
        buf.put_u32(self.round);
        Ok(buf.freeze())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Decode for Height {
    fn decode(mut bytes: &[u8]) -> Result<Self, CodecError> {
        expect_tag(&mut bytes, HEIGHT_TAG)?;
        if bytes.len() != 12 {
            return Err(CodecError::Truncated);
        }
        Ok(Self {
            height: bytes.get_u64(),
            round: bytes.get_u32(),
        })
    }
}

/// Length-prefixed UTF-8 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    pub text: String,
}

impl Text {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Message for Text {
    fn encode(&self) -> Result<Bytes, CodecError> {
        let len = u16::try_from(self.text.len())
            .map_err(|_| CodecError::Invalid("text longer than 64 KiB".into()))?;
        let mut buf = BytesMut::with_capacity(3 + self.text.len());
        buf.put_u8(TEXT_TAG);
        buf.put_u16(len);
        buf.put_slice(self.text.as_bytes());
        Ok(buf.freeze())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Decode for Text {
    fn decode(mut bytes: &[u8]) -> Result<Self, CodecError> {
        expect_tag(&mut bytes, TEXT_TAG)?;
        if bytes.len() < 2 {
            return Err(CodecError::Truncated);
        }
        let len = bytes.get_u16() as usize;
        if bytes.len() != len {
            return Err(CodecError::Truncated);
        }
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| CodecError::Invalid(e.to_string()))?;
        Ok(Self { text })
    }
}

/// Wire envelope for the ping family: tag, kind, nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: u8,
    pub nonce: u64,
}

impl Message for Packet {
    fn encode(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(10);
        buf.put_u8(PACKET_TAG);
        buf.put_u8(self.kind);
        buf.put_u64(self.nonce);
        Ok(buf.freeze())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_unwrapper(&self) -> Option<&dyn Unwrap> {
        Some(self)
    }
}

impl Decode for Packet {
    fn decode(mut bytes: &[u8]) -> Result<Self, CodecError> {
        expect_tag(&mut bytes, PACKET_TAG)?;
        if bytes.len() != 9 {
            return Err(CodecError::Truncated);
        }
        Ok(Self {
            kind: bytes.get_u8(),
            nonce: bytes.get_u64(),
        })
    }
}

impl Unwrap for Packet {
    fn unwrap_message(&self) -> Result<Box<dyn Message>, CodecError> {
        match self.kind {
            PACKET_PING => Ok(Box::new(Ping(self.nonce))),
            PACKET_PONG => Ok(Box::new(Pong(self.nonce))),
            other => Err(CodecError::Invalid(format!("unknown packet kind {}", other))),
        }
    }
}

/// Ping carried inside a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping(pub u64);

/// Pong carried inside a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong(pub u64);

macro_rules! packet_member {
    ($ty:ident, $kind:expr) => {
        impl Message for $ty {
            // Bare encoding; on the wire the packet form is used.
            fn encode(&self) -> Result<Bytes, CodecError> {
                let mut buf = BytesMut::with_capacity(8);
                buf.put_u64(self.0);
                Ok(buf.freeze())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_wrapper(&self) -> Option<&dyn Wrap> {
                Some(self)
            }
        }

        impl Wrap for $ty {
            fn wrap(&self) -> Box<dyn Message> {
                Box::new(Packet {
                    kind: $kind,
                    nonce: self.0,
                })
            }
        }
    };
}

packet_member!(Ping, PACKET_PING);
packet_member!(Pong, PACKET_PONG);

/// Message whose encoding always fails.
#[derive(Debug)]
pub struct Broken;

impl Message for Broken {
    fn encode(&self) -> Result<Bytes, CodecError> {
        Err(CodecError::Invalid("cannot encode".into()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
