//! Session controllers binding transport messages to state transitions.
//!
//! The host controller is the sole writer of the authoritative state; client
//! controllers hold read-only mirrors replaced wholesale on each broadcast.
//! Both run as single event loops, so no two reactions ever overlap.

mod client;
mod host;

pub use client::{ClientSession, JoinPhase};
pub use host::{HostSession, ReceivedGuess};
