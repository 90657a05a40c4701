//! Metrics snapshot endpoint, admin only.
//! Used by: server.

use axum::extract::State;
use axum::Json;

use crate::gate::Identity;
use crate::state::AppState;
use crate::telemetry::MetricsSnapshot;

pub async fn metrics(State(state): State<AppState>, identity: Identity) -> Json<MetricsSnapshot> {
    tracing::debug!(subject = identity.subject(), "metrics snapshot requested");
    Json(state.metrics.snapshot())
}
