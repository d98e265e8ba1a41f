//! Wire-level data transfer types shared by every device on a game channel.

mod envelope;
pub mod health;
mod relay;

pub use envelope::{Envelope, Guess, GuessPosition, Message, TeamJoin, TeamJoined};
pub use relay::RelayFrame;

use time::OffsetDateTime;

/// Informational send time stamped onto every envelope, in unix milliseconds.
/// Receivers never use it for ordering.
pub fn send_timestamp_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
