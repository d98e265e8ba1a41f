use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report process liveness and the number of active session topics.
pub async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_topics: state.hub().active_topics(),
    })
}

/// Configure the health endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/healthz", get(health_handler))
}
