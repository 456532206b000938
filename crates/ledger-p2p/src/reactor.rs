//! Protocol handlers and the per-peer channel table.

use crate::error::{PeerError, PeerResult};
use crate::message::{ChannelId, Envelope, MessageType};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Number of addressable logical channels.
pub const MAX_CHANNELS: usize = 256;

/// A protocol handler bound to one or more logical channels.
#[async_trait]
pub trait Reactor: Send + Sync + 'static {
    /// Handle one inbound message.
    ///
    /// Awaited by the channel's processor before the next payload of the
    /// same channel is taken, so a slow reactor only stalls its own channel.
    async fn receive(&self, envelope: Envelope);
}

/// Handler and expected message type of one channel.
#[derive(Clone)]
pub struct ChannelBinding {
    pub reactor: Arc<dyn Reactor>,
    pub message_type: MessageType,
}

impl fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}

/// Immutable channel id → binding table.
///
/// Built once by the switch from its local reactors and shared by every peer
/// it creates.
#[derive(Clone)]
pub struct ChannelTable {
    slots: Arc<[Option<ChannelBinding>; MAX_CHANNELS]>,
}

impl ChannelTable {
    /// Start building a table.
    pub fn builder() -> ChannelTableBuilder {
        ChannelTableBuilder {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Binding for a channel, if registered.
    pub fn get(&self, channel: ChannelId) -> Option<&ChannelBinding> {
        self.slots[channel as usize].as_ref()
    }

    /// Registered channel ids in ascending order.
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(id, _)| id as ChannelId)
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ChannelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.slots
                    .iter()
                    .enumerate()
                    .filter_map(|(id, slot)| slot.as_ref().map(|b| (id, b.message_type.name()))),
            )
            .finish()
    }
}

/// Builder for [`ChannelTable`].
pub struct ChannelTableBuilder {
    slots: [Option<ChannelBinding>; MAX_CHANNELS],
}

impl ChannelTableBuilder {
    /// Bind a reactor and message type to a channel.
    pub fn register(
        mut self,
        channel: ChannelId,
        reactor: Arc<dyn Reactor>,
        message_type: MessageType,
    ) -> PeerResult<Self> {
        let slot = &mut self.slots[channel as usize];
        if slot.is_some() {
            return Err(PeerError::DuplicateChannel(channel));
        }
        *slot = Some(ChannelBinding {
            reactor,
            message_type,
        });
        Ok(self)
    }

    /// Freeze the table.
    pub fn build(self) -> ChannelTable {
        ChannelTable {
            slots: Arc::new(self.slots),
        }
    }
}
