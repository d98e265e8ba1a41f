use serde::Serialize;

/// Liveness payload returned by the relay's health route.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    /// Number of session topics with at least one live subscriber.
    pub active_topics: usize,
}
