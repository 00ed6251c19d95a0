//! HTTP handlers for the fraud-scoring gateway.

use crate::api::{error_body, success, success_with_message, ApiError, AppState};
use crate::errors::FraudError;
use crate::models::{SubmitRequest, Transaction};
use crate::store::{NewFraudRule, RulePatch};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::path::Path as FsPath;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "database": "connected",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// POST /api/transactions — direct submission into the scoring pipeline.
pub async fn submit_transaction(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let response = state
        .intake
        .submit(request)
        .await
        .map_err(|e| ApiError::new(e, "submit_transaction"))?;
    Ok(success(response))
}

fn transaction_with_assessment(
    state: &AppState,
    tx: &Transaction,
) -> Result<serde_json::Value, FraudError> {
    let mut value = serde_json::to_value(tx)
        .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?;
    let assessment = state.store.get_assessment(&tx.transaction_id)?;
    value["fraud_assessment"] = match assessment {
        Some(a) => serde_json::to_value(a)
            .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?,
        None => serde_json::Value::Null,
    };
    Ok(value)
}

/// GET /api/transactions?limit=N — recent transactions with assessments.
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let transactions = state
        .store
        .get_recent_transactions(limit)
        .map_err(|e| ApiError::new(e, "list_transactions"))?;

    let items: Result<Vec<_>, _> = transactions
        .iter()
        .map(|tx| transaction_with_assessment(&state, tx))
        .collect();
    let items = items.map_err(|e| ApiError::new(e, "list_transactions"))?;
    let count = items.len();

    Ok(success(serde_json::json!({
        "transactions": items,
        "count": count,
    })))
}

/// GET /api/transactions/{id} — full detail with assessment.
pub async fn transaction_detail(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tx = state
        .store
        .get_transaction(&transaction_id)
        .map_err(|e| ApiError::new(e, "transaction_detail"))?
        .ok_or_else(|| {
            ApiError::new(
                FraudError::NotFound(format!("transaction {transaction_id}")),
                "transaction_detail",
            )
        })?;

    let detail = transaction_with_assessment(&state, &tx)
        .map_err(|e| ApiError::new(e, "transaction_detail"))?;
    Ok(success(detail))
}

/// GET /api/users/{id}/transactions — per-user summary.
pub async fn user_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let transactions = state
        .store
        .get_user_transactions(user_id, limit)
        .map_err(|e| ApiError::new(e, "user_transactions"))?;

    let total_amount: f64 = transactions.iter().map(|t| t.amount).sum();
    let mut items = Vec::with_capacity(transactions.len());
    for tx in &transactions {
        let assessment = state
            .store
            .get_assessment(&tx.transaction_id)
            .map_err(|e| ApiError::new(e, "user_transactions"))?;
        let mut item = serde_json::json!({
            "transaction_id": tx.transaction_id,
            "amount": tx.amount,
            "currency": tx.currency,
            "merchant_id": tx.merchant_id,
            "timestamp": crate::models::format_ts(&tx.timestamp),
            "status": tx.transaction_status,
        });
        if let Some(a) = assessment {
            item["fraud_score"] = serde_json::json!(a.fraud_score);
            item["decision"] = serde_json::json!(a.decision);
        }
        items.push(item);
    }

    Ok(success(serde_json::json!({
        "user_id": user_id,
        "total_transactions": transactions.len(),
        "total_amount": (total_amount * 100.0).round() / 100.0,
        "transactions": items,
    })))
}

/// GET /api/stats — aggregate counters and average score.
pub async fn stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state
        .store
        .get_transaction_stats()
        .map_err(|e| ApiError::new(e, "stats"))?;
    Ok(success(stats))
}

/// POST /api/webhooks/{provider} — provider webhook entry.
///
/// Providers retry on non-2xx, so failures are reported inside a 200
/// envelope with `status: "error"`.
pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<serde_json::Value> {
    match state.webhooks.handle(&provider, &headers, &body).await {
        Ok(data) => success(data),
        Err(e) => Json(error_body(&e, "webhook")),
    }
}

/// GET /api/model/info — engine and model metadata.
pub async fn model_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    success(state.engine.model_info())
}

// ---- admin surface (behind require_admin) ----

const TREND_SAMPLE: usize = 1000;
const TREND_RECENT_WINDOW: usize = 100;

/// GET /api/admin/users — every user with their risk profile.
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let users = state
        .store
        .list_users()
        .map_err(|e| ApiError::new(e, "list_users"))?;
    Ok(success(users))
}

/// GET /api/admin/analytics — aggregate stats plus a fraud-trend slice
/// over the most recent assessments and the engine metadata.
pub async fn admin_analytics(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state
        .store
        .get_transaction_stats()
        .map_err(|e| ApiError::new(e, "admin_analytics"))?;
    let trends = state
        .store
        .get_fraud_trends(TREND_SAMPLE, TREND_RECENT_WINDOW)
        .map_err(|e| ApiError::new(e, "admin_analytics"))?;

    let mut analytics = serde_json::to_value(&stats)
        .map_err(|e| ApiError::new(FraudError::StoreUnavailable(e.to_string()), "admin_analytics"))?;
    analytics["fraud_trends"] = serde_json::to_value(&trends)
        .map_err(|e| ApiError::new(FraudError::StoreUnavailable(e.to_string()), "admin_analytics"))?;
    analytics["model_performance"] = state.engine.model_info();

    Ok(success(analytics))
}

/// GET /api/admin/fraud-rules — every rule, active or not.
pub async fn list_rules(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rules = state
        .store
        .list_rules()
        .map_err(|e| ApiError::new(e, "list_rules"))?;
    Ok(success(rules))
}

/// POST /api/admin/fraud-rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(rule): Json<NewFraudRule>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let created = state
        .store
        .create_rule(&rule)
        .map_err(|e| ApiError::new(e, "create_rule"))?;
    Ok(success_with_message(created, "Rule created"))
}

/// PUT /api/admin/fraud-rules/{id}
pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Json(patch): Json<RulePatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = state
        .store
        .update_rule(rule_id, &patch)
        .map_err(|e| ApiError::new(e, "update_rule"))?;
    Ok(success_with_message(updated, "Rule updated"))
}

/// DELETE /api/admin/fraud-rules/{id} — deactivate, never destroy.
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .deactivate_rule(rule_id)
        .map_err(|e| ApiError::new(e, "delete_rule"))?;
    Ok(success_with_message(
        serde_json::json!({"rule_id": rule_id}),
        "Rule deactivated",
    ))
}

/// DELETE /api/admin/transactions — purge everything. Tests only.
pub async fn purge_transactions(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .clear_transactions()
        .map_err(|e| ApiError::new(e, "purge_transactions"))?;
    Ok(success_with_message(
        serde_json::Value::Null,
        "All transactions cleared",
    ))
}

/// POST /api/admin/model/reload — atomically swap in the artifact at the
/// configured path.
pub async fn reload_model(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let version = state
        .ml
        .reload(FsPath::new(&state.config.model_path))
        .map_err(|e| ApiError::new(e, "reload_model"))?;
    Ok(success_with_message(
        serde_json::json!({"model_version": version}),
        "Model reloaded",
    ))
}
