//! Transport channel adapter: one addressable broadcast channel per game
//! code, with presence notifications when a peer's subscription changes.
//!
//! The adapter promises at-least-once best effort only. No acknowledgment,
//! no retry, no cross-sender ordering; the session controllers stay correct
//! under loss and reordering by re-broadcasting full snapshots and replacing
//! mirrors wholesale.

pub mod device;
mod hub;

pub use hub::{BroadcastHub, HubChannel};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::dto::{Envelope, Message};

/// Notification that a peer's subscription to the topic changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    /// Whether the peer appeared or went away.
    pub kind: PresenceKind,
    /// Persistent identifier of the peer device.
    pub device_id: String,
}

/// Direction of a presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    /// The peer's subscription became active.
    Joined,
    /// The peer's subscription ended.
    Left,
}

/// Event observed on a subscribed game channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A broadcast envelope from some peer.
    Message(Envelope),
    /// A peer's presence changed.
    Presence(PresenceEvent),
}

/// Error raised by channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel is no longer attached to its topic.
    #[error("not connected to the game channel")]
    NotConnected,
}

/// One device's attachment to the broadcast channel of a game code.
pub trait GameChannel: Send + Sync {
    /// Persistent identifier of the device holding this channel.
    fn device_id(&self) -> &str;

    /// Whether the subscription is currently active.
    fn is_connected(&self) -> bool;

    /// Broadcast a message to every peer on the topic. The channel stamps
    /// the sender id and send time onto the envelope.
    fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Subscribe to subsequent events on the topic.
    fn subscribe(&self) -> ChannelEvents;

    /// Tear the subscription down, announcing a presence-left to peers.
    fn close(&self);
}

/// Receiver over a channel's event stream.
///
/// Skips this device's own traffic (mirroring the source transport's
/// `self: false` broadcast mode) and treats receiver lag as missed messages
/// rather than a dead stream; a missed snapshot is recovered by the next
/// host broadcast.
pub struct ChannelEvents {
    receiver: broadcast::Receiver<ChannelEvent>,
    device_id: String,
}

impl ChannelEvents {
    pub(crate) fn new(receiver: broadcast::Receiver<ChannelEvent>, device_id: String) -> Self {
        Self {
            receiver,
            device_id,
        }
    }

    /// Next event originating from a peer; `None` once the topic is gone.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(ChannelEvent::Message(envelope)) if envelope.sender_id == self.device_id => {
                    continue;
                }
                Ok(ChannelEvent::Presence(presence))
                    if presence.device_id == self.device_id =>
                {
                    continue;
                }
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "channel receiver lagged; skipping missed events");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
