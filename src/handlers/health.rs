//! Health check endpoint.
//! Used by: server.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub signing_keys: &'static str,
}

/// Reports key-set status from the cache only; never triggers a fetch.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let signing_keys = match state.keys.cached(&state.config.issuer) {
        Some(set) if set.is_fresh() => "fresh",
        Some(_) => "stale",
        None => "absent",
    };
    Json(HealthResponse {
        status: "ok",
        signing_keys,
    })
}
