//! HTTP surface of the relay binary.

use axum::Router;

use crate::state::SharedState;

pub mod health;
pub mod websocket;

/// Compose all route trees, wiring in shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router().merge(websocket::router()).with_state(state)
}
