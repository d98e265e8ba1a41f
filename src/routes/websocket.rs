use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use crate::{
    error::AppError,
    services::relay,
    state::{
        SharedState,
        game::{is_valid_code, normalize_code},
    },
};

/// Query parameters identifying the topic and the device being bridged.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session code, case-insensitive.
    code: String,
    /// Persistent device identifier.
    device: String,
}

/// Upgrade the HTTP connection into a bridged device session on the topic
/// for the given session code.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let code = normalize_code(&params.code);
    if !is_valid_code(&code) {
        return Err(AppError::BadRequest(format!(
            "`{}` is not a session code",
            params.code
        )));
    }
    let device = params.device.trim().to_string();
    if device.is_empty() {
        return Err(AppError::BadRequest("device id must not be empty".into()));
    }

    Ok(ws.on_upgrade(move |socket| relay::handle_socket(state, socket, code, device)))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
