use serde::{Deserialize, Serialize};

use crate::{dto::Envelope, transport::PresenceEvent};

/// Frames forwarded to a WebSocket device bridged onto a hub topic.
///
/// Broadcast envelopes and presence notifications share one stream, so the
/// frame kind disambiguates them for the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RelayFrame {
    /// A broadcast envelope observed on the topic.
    Message(Envelope),
    /// A peer's subscription became active or ended.
    Presence(PresenceEvent),
}
