//! Relay-side services.

pub mod relay;
