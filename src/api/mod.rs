//! API layer: shared state, the response envelope and error mapping.
//!
//! Every response uses the same envelope:
//! `{status, timestamp, data, message?, error?, context?}`.

pub mod routes;

use crate::errors::FraudError;
use crate::intake::IntakeService;
use crate::ml::MlScorer;
use crate::models::Config;
use crate::scoring::ScoringEngine;
use crate::store::FraudStore;
use crate::webhooks::WebhookRouter;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FraudStore>,
    pub intake: Arc<IntakeService>,
    pub engine: Arc<ScoringEngine>,
    pub ml: Arc<MlScorer>,
    pub webhooks: Arc<WebhookRouter>,
    pub config: Config,
}

/// Success envelope.
pub fn success<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "success",
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
    }))
}

/// Success envelope with a human-readable message.
pub fn success_with_message<T: Serialize>(data: T, message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "success",
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
        "message": message,
    }))
}

/// Error envelope body (no status code attached).
pub fn error_body(err: &FraudError, context: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "timestamp": Utc::now().to_rfc3339(),
        "error": err.to_string(),
        "message": err.to_string(),
        "context": context,
    })
}

/// A FraudError bound to the handler it came from, renderable as an HTTP
/// response.
pub struct ApiError {
    pub error: FraudError,
    pub context: &'static str,
}

impl ApiError {
    pub fn new(error: FraudError, context: &'static str) -> Self {
        Self { error, context }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.error {
            FraudError::Validation(_) => StatusCode::BAD_REQUEST,
            FraudError::SignatureInvalid => StatusCode::BAD_REQUEST,
            FraudError::NotFound(_) => StatusCode::NOT_FOUND,
            FraudError::Conflict(_) => StatusCode::CONFLICT,
            FraudError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FraudError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FraudError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            FraudError::Scoring(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(context = self.context, error = %self.error, "API error");
        }

        (status, Json(error_body(&self.error, self.context))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_follow_taxonomy() {
        let cases = [
            (FraudError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (FraudError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (FraudError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                FraudError::StoreUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (FraudError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (
                FraudError::Scoring("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError::new(err, "test").into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn error_body_carries_envelope_fields() {
        let body = error_body(&FraudError::SignatureInvalid, "paystack_webhook");
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Invalid signature");
        assert_eq!(body["context"], "paystack_webhook");
        assert!(body["timestamp"].is_string());
    }
}
