use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use super::{object_body, ApiError};
use crate::analysis::best_move;
use crate::error::EngineError;
use crate::metrics;
use crate::shared_state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    pub engine: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub ok: bool,
    pub engine: String,
    pub model: Option<String>,
    pub model_name: Option<String>,
    pub best_move: Option<String>,
    pub katago: Value,
}

/// `POST /api/analyze?engine=` routed preference-first.
pub async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let result = run(&state, query, body).await;
    match &result {
        Ok(_) => metrics::inc_request("analyze", "ok"),
        Err(e) => metrics::inc_request("analyze", e.status_label()),
    }
    result
}

async fn run(
    state: &AppState,
    query: AnalyzeQuery,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut payload = object_body(body)?;
    state.defaults.apply_analyze(&mut payload);

    let routed = state
        .router
        .preference_first(query.engine.as_deref(), Value::Object(payload))
        .await
        .map_err(|e| {
            if !e.is_unavailable() {
                error!("[/api/analyze] error: {}", e);
            }
            let warming = matches!(e, EngineError::Warming(_));
            let err = ApiError::from(e);
            if warming {
                err.with_retry_after(state.health.retry_after_header())
            } else {
                err
            }
        })?;

    let (model, model_name) = state.model_info(&routed.engine);
    Ok(Json(AnalyzeResponse {
        ok: true,
        best_move: best_move(&routed.reply),
        engine: routed.engine,
        model,
        model_name,
        katago: routed.reply,
    }))
}
