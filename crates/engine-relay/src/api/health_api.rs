use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::shared_state::AppState;

/// `GET /healthz`: `200 ok` once every enabled engine is ready, `503 warming` before that.
pub async fn healthz(State(state): State<AppState>) -> Response {
    if state.health.is_healthy() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, state.health.retry_after_header())],
            "warming",
        )
            .into_response()
    }
}
