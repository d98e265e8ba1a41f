use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::game::GameState;

/// Messages carried on a game channel, one variant per wire `type`.
///
/// The set is closed and exhaustively matched by both session controllers;
/// unrecognized types collapse into [`Message::Unknown`] so a newer peer on
/// the same channel never breaks an older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// Full authoritative snapshot pushed by the host after every committed
    /// transition and on late-join recovery.
    GameState(GameState),
    /// A device asking to join with a team name, or a bare state request.
    TeamJoin(TeamJoin),
    /// Directed confirmation that a join request was honored.
    TeamJoined(TeamJoined),
    /// A team's placement guess; surfaced to the host operator, never
    /// applied automatically.
    Guess(Guess),
    /// The current team passes its turn.
    Pass {},
    /// The current team wants the next song after a correct guess.
    Continue {},
    /// Catch-all for message types this build does not know. Ignored.
    #[serde(other)]
    Unknown,
}

/// Payload of a `team_join` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum TeamJoin {
    /// Application-level join carrying the requested team name.
    Request {
        /// Display name the joining device asked for.
        team_name: String,
    },
    /// Reconciliation probe asking the host to re-broadcast its snapshot
    /// without mutating anything. Emitted on presence joins.
    StateRequest {
        /// Always `true`; distinguishes the probe from a join on the wire.
        request_state: bool,
    },
}

/// Payload of a `team_joined` confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamJoined {
    /// Identifier the host assigned to the new team.
    pub team_id: Uuid,
    /// Confirmed team name.
    pub team_name: String,
    /// Assigned palette color.
    pub team_color: String,
    /// Device this confirmation is addressed to — the *recipient*, not the
    /// message sender. Other devices ignore the confirmation.
    pub sender_id: String,
}

/// Payload of a `guess` message: where the team wants to place the current
/// song relative to cards already on its timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    /// Relative placement being claimed.
    pub position: GuessPosition,
    /// Card the placement is anchored to.
    pub reference_card_id: Uuid,
    /// Second anchor when the placement is between two cards.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub second_card_id: Option<Uuid>,
}

/// Relative placement of a guessed song on a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuessPosition {
    /// Older than the reference card.
    Before,
    /// Newer than the reference card.
    After,
    /// Between the reference card and the second card.
    Between,
}

/// Envelope wrapped around every message on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// The typed message.
    #[serde(flatten)]
    pub message: Message,
    /// Persistent identifier of the sending device.
    pub sender_id: String,
    /// Send time in unix milliseconds. Informational only.
    pub timestamp: i64,
}
