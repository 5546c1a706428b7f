// engine-relay/crates/engine-relay/src/api/mod.rs
//! HTTP handlers over the engine pool.

pub mod analyze_api;
pub mod engines_api;
pub mod eval_api;
pub mod health_api;
pub mod metrics_api;

use axum::{
    extract::rejection::JsonRejection,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

use crate::error::EngineError;

pub use analyze_api::analyze;
pub use engines_api::list_engines;
pub use eval_api::eval;
pub use health_api::healthz;
pub use metrics_api::metrics_handler;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_body",
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: String) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Metric label for the failure.
    pub fn status_label(&self) -> &'static str {
        self.code
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = if err.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            retry_after: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "ok": false,
            "error": self.message,
            "code": self.code,
        }));
        match self.retry_after {
            Some(seconds) => (self.status, [(header::RETRY_AFTER, seconds)], body).into_response(),
            None => (self.status, body).into_response(),
        }
    }
}

/// Unwrap a JSON body that must be an object.
pub(crate) fn object_body(
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Map<String, Value>, ApiError> {
    match body {
        Ok(Json(Value::Object(map))) => Ok(map),
        Ok(Json(_)) => Err(ApiError::bad_request("request body must be a JSON object")),
        Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_status_mapping() {
        let err = ApiError::from(EngineError::NoEngineAvailable);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code, "no_engine_available");

        let err = ApiError::from(EngineError::AllEnginesFailed);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(EngineError::Timeout {
            name: "hard".into(),
            timeout_ms: 30000,
        });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "engine \"hard\" timeout after 30000ms");
    }

    #[test]
    fn test_retry_after_header_is_set() {
        let response = ApiError::from(EngineError::Warming("easy".into()))
            .with_retry_after("2".into())
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_object_body_rejects_arrays() {
        let err = object_body(Ok(Json(json!([1, 2])))).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(object_body(Ok(Json(json!({"moves": []})))).is_ok());
    }
}
