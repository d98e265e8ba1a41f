//! Game data model, pure transitions and shared relay state.

pub mod game;
pub mod machine;

use std::sync::Arc;

use crate::transport::BroadcastHub;

/// Shared handle to the relay application state.
pub type SharedState = Arc<AppState>;

/// Central state of the relay binary: the in-process broker that bridged
/// WebSocket devices publish into and subscribe from.
pub struct AppState {
    hub: BroadcastHub,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new() -> SharedState {
        Arc::new(Self {
            hub: BroadcastHub::default(),
        })
    }

    /// Broker bridging every connected device, one topic per session code.
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }
}
