use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use super::{object_body, ApiError};
use crate::analysis::EvalSummary;
use crate::metrics;
use crate::shared_state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResponse {
    pub ok: bool,
    pub engine: String,
    pub model: Option<String>,
    pub model_name: Option<String>,
    pub winrate_black: Option<f64>,
    pub score_lead: Option<f64>,
    pub pv: Vec<String>,
    pub katago: Value,
}

/// `POST /api/eval` routed strongest-first.
pub async fn eval(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<EvalResponse>, ApiError> {
    let mut payload = match object_body(body) {
        Ok(payload) => payload,
        Err(e) => {
            metrics::inc_request("eval", e.status_label());
            return Err(e);
        }
    };
    state.defaults.apply_eval(&mut payload);

    let routed = match state.router.strongest_first(Value::Object(payload)).await {
        Ok(routed) => routed,
        Err(e) => {
            error!("[/api/eval] error: {}", e);
            let err = ApiError::from(e);
            metrics::inc_request("eval", err.status_label());
            return Err(err);
        }
    };

    let summary = EvalSummary::from_reply(&routed.reply);
    let (model, model_name) = state.model_info(&routed.engine);
    metrics::inc_request("eval", "ok");

    Ok(Json(EvalResponse {
        ok: true,
        engine: routed.engine,
        model,
        model_name,
        winrate_black: summary.winrate_black,
        score_lead: summary.score_lead,
        pv: summary.pv,
        katago: routed.reply,
    }))
}
