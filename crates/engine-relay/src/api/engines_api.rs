use axum::{extract::State, Json};
use serde::Serialize;

use crate::engine::EngineStatus;
use crate::metrics;
use crate::shared_state::AppState;

#[derive(Debug, Serialize)]
pub struct EnginesResponse {
    pub ok: bool,
    pub engines: Vec<EngineStatus>,
}

/// `GET /api/engines`
pub async fn list_engines(State(state): State<AppState>) -> Json<EnginesResponse> {
    metrics::inc_request("engines", "ok");
    Json(EnginesResponse {
        ok: true,
        engines: state.supervisor.snapshot(),
    })
}
