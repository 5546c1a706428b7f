use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::metrics;

/// `GET /metrics` in Prometheus text format.
pub async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("metrics encoding failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
