//! Intake service: the orchestrator for one submitted transaction.
//!
//! validate -> normalize -> score -> commit {transaction, assessment,
//! status, profile} as one atomic unit -> respond. Submissions for the
//! same user are serialized through hash-striped locks so each assessment
//! sees a consistent snapshot of that user's prior history and profile.

use crate::errors::{FraudError, FraudResult};
use crate::ml::features::fnv1a;
use crate::models::{
    format_ts, parse_ts, FraudAnalysis, FraudHistoryEntry, RiskLevel, RiskProfile, SubmitRequest,
    SubmitResponse, Transaction, TransactionStatus,
};
use crate::scoring::history::HistoryWindow;
use crate::scoring::ScoringEngine;
use crate::store::FraudStore;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

const MAX_AMOUNT: f64 = 50_000_000.0;
const VALID_CURRENCIES: [&str; 4] = ["NGN", "USD", "EUR", "GBP"];
const LOCK_STRIPES: usize = 64;

pub struct IntakeService {
    store: Arc<FraudStore>,
    engine: Arc<ScoringEngine>,
    history: Arc<HistoryWindow>,
    user_locks: Vec<Mutex<()>>,
    deadline: Duration,
}

impl IntakeService {
    pub fn new(
        store: Arc<FraudStore>,
        engine: Arc<ScoringEngine>,
        history: Arc<HistoryWindow>,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            history,
            user_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            deadline,
        }
    }

    /// Process one submitted transaction end to end.
    pub async fn submit(&self, request: SubmitRequest) -> FraudResult<SubmitResponse> {
        validate(&request)?;
        let tx = normalize(&request)?;

        // Serialize per user; the stripe lock is held for the whole
        // pipeline so concurrent submissions for one user cannot
        // interleave between scoring and the profile write.
        let stripe = (tx.user_id as usize) % LOCK_STRIPES;
        let _guard = self.user_locks[stripe].lock().await;

        match tokio::time::timeout(self.deadline, self.process(tx, &request)).await {
            Ok(result) => result,
            Err(_) => Err(FraudError::Timeout),
        }
    }

    async fn process(
        &self,
        tx: Transaction,
        request: &SubmitRequest,
    ) -> FraudResult<SubmitResponse> {
        let user = self
            .store
            .ensure_user(tx.user_id, request.email.as_deref())?;

        let analysis = self.engine.analyze(&tx).await?;
        let status = analysis.decision.transaction_status();
        let profile = updated_profile(user.risk_profile, tx.amount, &analysis);

        let assessment_id = self
            .store
            .commit_submission(&tx, &analysis, status, &profile)?;
        self.history.invalidate(tx.user_id);

        info!(
            transaction_id = %tx.transaction_id,
            decision = analysis.decision.as_str(),
            score = analysis.fraud_score,
            "Transaction processed"
        );

        Ok(SubmitResponse {
            status: "success".to_string(),
            transaction_id: tx.transaction_id,
            user_id: tx.user_id,
            amount: tx.amount,
            currency: tx.currency,
            timestamp: format_ts(&tx.timestamp),
            fraud_analysis: analysis,
            assessment_id,
        })
    }
}

/// Basic field validation. All failures are collected and reported in one
/// message, joined by "; ".
fn validate(request: &SubmitRequest) -> FraudResult<()> {
    let mut errors: Vec<String> = Vec::new();

    match request.amount {
        None => errors.push("Missing required field: amount".to_string()),
        Some(amount) if amount <= 0.0 => {
            errors.push("Amount must be greater than 0".to_string())
        }
        Some(amount) if amount > MAX_AMOUNT => {
            errors.push("Amount exceeds maximum limit".to_string())
        }
        Some(amount) if !amount.is_finite() => {
            errors.push("Invalid amount format".to_string())
        }
        _ => {}
    }

    match &request.currency {
        None => errors.push("Missing required field: currency".to_string()),
        Some(currency) => {
            let upper = currency.to_uppercase();
            if !VALID_CURRENCIES.contains(&upper.as_str()) {
                errors.push(format!("Unsupported currency: {upper}"));
            }
        }
    }

    match request.user_id {
        None => errors.push("Missing required field: user_id".to_string()),
        Some(user_id) if user_id <= 0 => errors.push("Invalid user ID".to_string()),
        _ => {}
    }

    if let Some(ip) = request.ip_address.as_deref() {
        if ip.parse::<IpAddr>().is_err() {
            errors.push("Invalid IP address format".to_string());
        }
    }

    if let Some(email) = request.email.as_deref() {
        if !email.contains('@') {
            errors.push("Invalid email format".to_string());
        }
    }

    if let Some(ts) = request.timestamp.as_deref() {
        if parse_timestamp(ts).is_none() {
            errors.push("Invalid timestamp format".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(FraudError::Validation(errors.join("; ")))
    }
}

/// Accepts RFC 3339 (with or without offset) and bare ISO date-times,
/// which are taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Some(ts) = parse_ts(s) {
        return Some(ts);
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Shape the validated request into a normalized transaction.
fn normalize(request: &SubmitRequest) -> FraudResult<Transaction> {
    let timestamp = match request.timestamp.as_deref() {
        Some(raw) => parse_timestamp(raw)
            .ok_or_else(|| FraudError::Validation("Invalid timestamp format".to_string()))?,
        None => Utc::now(),
    };

    let transaction_id = request
        .transaction_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| generate_transaction_id(&timestamp));

    let device_fingerprint = request
        .device_fingerprint
        .clone()
        .filter(|fp| !fp.trim().is_empty())
        .or_else(|| Some(synthesize_fingerprint(request)));

    Ok(Transaction {
        transaction_id,
        user_id: request.user_id.unwrap_or_default(),
        amount: request.amount.unwrap_or_default(),
        currency: request
            .currency
            .as_deref()
            .unwrap_or("NGN")
            .to_uppercase(),
        transaction_type: request
            .transaction_type
            .clone()
            .unwrap_or_else(|| "payment".to_string()),
        merchant_id: request
            .merchant_id
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        timestamp,
        payment_method: request
            .payment_method
            .clone()
            .unwrap_or_else(|| "card".to_string()),
        ip_address: request.ip_address.clone(),
        device_fingerprint,
        location_data: build_location_data(request),
        transaction_status: TransactionStatus::Pending,
    })
}

/// `TXN_YYYYMMDD_<8hex>`.
fn generate_transaction_id(timestamp: &DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("TXN_{}_{}", timestamp.format("%Y%m%d"), &suffix[..8])
}

/// Stable `fp_<6 digits>` fingerprint over the canonicalized JSON of the
/// device attributes. Keys are emitted in sorted order so equal inputs
/// always hash equally.
fn synthesize_fingerprint(request: &SubmitRequest) -> String {
    let canonical = serde_json::json!({
        "device_id": request.device_id.as_deref().unwrap_or(""),
        "ip_address": request.ip_address.as_deref().unwrap_or(""),
        "screen_resolution": request.screen_resolution.as_deref().unwrap_or(""),
        "timezone": request.timezone.as_deref().unwrap_or(""),
        "user_agent": request.user_agent.as_deref().unwrap_or(""),
    })
    .to_string();
    format!("fp_{:06}", fnv1a(canonical.as_bytes()) % 1_000_000)
}

/// Materialize location data (and provider fraud indicators) as a JSON
/// document; None when nothing was supplied.
fn build_location_data(request: &SubmitRequest) -> Option<serde_json::Value> {
    let mut map = serde_json::Map::new();

    let mut put = |key: &str, value: Option<&String>| {
        if let Some(v) = value {
            map.insert(key.to_string(), serde_json::Value::String(v.clone()));
        }
    };
    put("country", request.country.as_ref());
    put("state", request.state.as_ref());
    put("city", request.city.as_ref());
    put("postal_code", request.postal_code.as_ref());
    put("billing_address", request.billing_address.as_ref());
    put("card_type", request.card_type.as_ref());
    put("card_country", request.card_country.as_ref());
    put("card_issuer", request.card_issuer.as_ref());
    put("card_bin", request.card_bin.as_ref());
    put("card_last4", request.card_last4.as_ref());
    put("processor_response", request.processor_response.as_ref());
    put("auth_model", request.auth_model.as_ref());

    if let Some(lat) = request.latitude {
        map.insert("latitude".to_string(), serde_json::json!(lat));
    }
    if let Some(lon) = request.longitude {
        map.insert("longitude".to_string(), serde_json::json!(lon));
    }

    if map.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(map))
    }
}

/// Fold one assessment into the user's rolling risk profile.
fn updated_profile(
    mut profile: RiskProfile,
    amount: f64,
    analysis: &FraudAnalysis,
) -> RiskProfile {
    let now = Utc::now();

    profile.transaction_count += 1;
    let n = profile.transaction_count as f64;
    let new_avg = ((profile.avg_amount * (n - 1.0)) + amount) / n;
    profile.avg_amount = (new_avg * 100.0).round() / 100.0;

    profile.fraud_history.push(FraudHistoryEntry {
        timestamp: format_ts(&now),
        fraud_score: analysis.fraud_score,
        decision: analysis.decision,
    });
    // Keep only the last 10 assessments.
    if profile.fraud_history.len() > 10 {
        let excess = profile.fraud_history.len() - 10;
        profile.fraud_history.drain(..excess);
    }

    let recent: Vec<f64> = profile
        .fraud_history
        .iter()
        .rev()
        .take(5)
        .map(|h| h.fraud_score)
        .collect();
    let avg_recent = recent.iter().sum::<f64>() / recent.len() as f64;
    profile.risk_level = if avg_recent > 0.7 {
        RiskLevel::High
    } else if avg_recent > 0.4 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    profile.last_transaction = Some(format_ts(&now));
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::MlScorer;
    use crate::models::{ComponentScores, Decision};
    use tempfile::NamedTempFile;

    fn service() -> (IntakeService, Arc<FraudStore>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = Arc::new(FraudStore::new(temp.path().to_str().unwrap()).unwrap());
        let history = Arc::new(HistoryWindow::new(store.clone()));
        let ml = Arc::new(MlScorer::disabled(Duration::from_millis(500)));
        let engine = Arc::new(ScoringEngine::new(
            store.clone(),
            history.clone(),
            ml,
            10,
        ));
        let intake = IntakeService::new(
            store.clone(),
            engine,
            history,
            Duration::from_secs(2),
        );
        (intake, store, temp)
    }

    fn request(user_id: i64, amount: f64, merchant: &str) -> SubmitRequest {
        SubmitRequest {
            user_id: Some(user_id),
            amount: Some(amount),
            currency: Some("NGN".to_string()),
            merchant_id: Some(merchant.to_string()),
            payment_method: Some("card".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn validation_collects_every_reason() {
        let err = validate(&SubmitRequest {
            amount: Some(-5.0),
            user_id: Some(0),
            currency: Some("XYZ".to_string()),
            ip_address: Some("999.999.1.1".to_string()),
            email: Some("not-an-email".to_string()),
            ..Default::default()
        })
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Amount must be greater than 0"));
        assert!(message.contains("Unsupported currency: XYZ"));
        assert!(message.contains("Invalid user ID"));
        assert!(message.contains("Invalid IP address format"));
        assert!(message.contains("Invalid email format"));
    }

    #[test]
    fn validation_rejects_missing_required_fields() {
        let err = validate(&SubmitRequest::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Missing required field: amount"));
        assert!(message.contains("Missing required field: user_id"));
        assert!(message.contains("Missing required field: currency"));
    }

    #[test]
    fn validation_enforces_amount_ceiling() {
        let mut req = request(1, 50_000_001.0, "x");
        assert!(validate(&req).is_err());
        req.amount = Some(50_000_000.0);
        assert!(validate(&req).is_ok());
    }

    #[test]
    fn normalize_fills_defaults() {
        let req = SubmitRequest {
            user_id: Some(1),
            amount: Some(100.0),
            currency: Some("ngn".to_string()),
            ..Default::default()
        };
        let tx = normalize(&req).unwrap();

        assert_eq!(tx.currency, "NGN");
        assert_eq!(tx.transaction_type, "payment");
        assert_eq!(tx.merchant_id, "Unknown");
        assert_eq!(tx.payment_method, "card");
        assert_eq!(tx.transaction_status, TransactionStatus::Pending);
        assert!(tx.transaction_id.starts_with("TXN_"));
        // TXN_YYYYMMDD_<8hex>
        let parts: Vec<&str> = tx.transaction_id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
        // Fingerprint synthesized deterministically.
        let fp = tx.device_fingerprint.unwrap();
        assert!(fp.starts_with("fp_"));
        assert_eq!(fp.len(), 9);
        let again = normalize(&req).unwrap();
        assert_eq!(again.device_fingerprint.unwrap(), fp);
    }

    #[test]
    fn normalize_parses_supplied_timestamp() {
        let mut req = request(1, 100.0, "x");
        req.timestamp = Some("2026-07-01T10:30:00Z".to_string());
        let tx = normalize(&req).unwrap();
        assert_eq!(format_ts(&tx.timestamp), "2026-07-01T10:30:00.000000Z");

        req.timestamp = Some("2026-07-01T10:30:00".to_string());
        assert!(normalize(&req).is_ok());

        req.timestamp = Some("yesterday".to_string());
        assert!(validate(&req).is_err());
    }

    #[test]
    fn location_data_materializes_only_when_present() {
        let bare = request(1, 100.0, "x");
        assert!(build_location_data(&bare).is_none());

        let mut req = request(1, 100.0, "x");
        req.country = Some("NG".to_string());
        req.latitude = Some(6.5244);
        req.card_type = Some("MASTERCARD".to_string());
        let data = build_location_data(&req).unwrap();
        assert_eq!(data["country"], "NG");
        assert_eq!(data["latitude"], 6.5244);
        assert_eq!(data["card_type"], "MASTERCARD");
    }

    #[test]
    fn profile_update_running_mean_and_history_bound() {
        let analysis = |score: f64, decision: Decision| FraudAnalysis {
            transaction_id: "TXN_X".to_string(),
            fraud_score: score,
            decision,
            confidence_level: 0.5,
            risk_factors: vec![],
            component_scores: ComponentScores {
                rnn_score: 0.0,
                rule_score: score,
                velocity_score: 0.0,
            },
            model_version: "rule_based_v1.0".to_string(),
            processing_time_ms: 1.0,
            processed_at: format_ts(&Utc::now()),
        };

        let mut profile = RiskProfile::default();
        profile = updated_profile(profile, 100.0, &analysis(0.1, Decision::Approve));
        assert_eq!(profile.transaction_count, 1);
        assert_eq!(profile.avg_amount, 100.0);

        profile = updated_profile(profile, 200.0, &analysis(0.1, Decision::Approve));
        assert_eq!(profile.avg_amount, 150.0);

        for _ in 0..12 {
            profile = updated_profile(profile, 100.0, &analysis(0.9, Decision::Decline));
        }
        assert_eq!(profile.fraud_history.len(), 10);
        assert_eq!(profile.risk_level, RiskLevel::High);
        // Oldest entries were dropped, newest kept.
        assert_eq!(profile.fraud_history.last().unwrap().fraud_score, 0.9);
    }

    #[test]
    fn profile_risk_level_uses_last_five_scores() {
        let analysis = |score: f64| FraudAnalysis {
            transaction_id: "TXN_X".to_string(),
            fraud_score: score,
            decision: Decision::Approve,
            confidence_level: 0.5,
            risk_factors: vec![],
            component_scores: ComponentScores {
                rnn_score: 0.0,
                rule_score: score,
                velocity_score: 0.0,
            },
            model_version: "rule_based_v1.0".to_string(),
            processing_time_ms: 1.0,
            processed_at: format_ts(&Utc::now()),
        };

        let mut profile = RiskProfile::default();
        for _ in 0..5 {
            profile = updated_profile(profile, 100.0, &analysis(0.5));
        }
        assert_eq!(profile.risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn submit_persists_the_full_unit_of_work() {
        let (intake, store, _tmp) = service();
        let response = intake.submit(request(1, 600_000.0, "Luxury")).await.unwrap();

        assert_eq!(response.status, "success");
        assert_eq!(response.fraud_analysis.fraud_score, 0.48);
        assert_eq!(response.fraud_analysis.decision, Decision::Approve);

        let tx = store
            .get_transaction(&response.transaction_id)
            .unwrap()
            .unwrap();
        assert_eq!(tx.transaction_status, TransactionStatus::Approved);
        assert_eq!(tx.amount, 600_000.0);

        let assessment = store
            .get_assessment(&response.transaction_id)
            .unwrap()
            .unwrap();
        assert_eq!(assessment.assessment_id, response.assessment_id);
        assert_eq!(assessment.decision, Decision::Approve);

        let user = store.get_user(1).unwrap().unwrap();
        assert_eq!(user.risk_profile.fraud_history.len(), 1);
        assert!(user.risk_profile.last_transaction.is_some());
    }

    #[tokio::test]
    async fn submit_declines_and_marks_status() {
        let (intake, store, _tmp) = service();
        let response = intake
            .submit(request(1, 1_000_000.0, "Car Dealer"))
            .await
            .unwrap();
        assert_eq!(response.fraud_analysis.decision, Decision::Decline);

        let tx = store
            .get_transaction(&response.transaction_id)
            .unwrap()
            .unwrap();
        assert_eq!(tx.transaction_status, TransactionStatus::Declined);
    }

    #[tokio::test]
    async fn duplicate_transaction_id_conflicts_without_partial_state() {
        let (intake, store, _tmp) = service();
        let mut req = request(1, 1_000.0, "Shop");
        req.transaction_id = Some("TXN_FIXED".to_string());
        intake.submit(req.clone()).await.unwrap();

        let before = store.get_user(1).unwrap().unwrap();
        let err = intake.submit(req).await.unwrap_err();
        assert!(matches!(err, FraudError::Conflict(_)));

        // Profile untouched by the failed second submission.
        let after = store.get_user(1).unwrap().unwrap();
        assert_eq!(
            before.risk_profile.transaction_count,
            after.risk_profile.transaction_count
        );
    }

    #[tokio::test]
    async fn submit_creates_user_on_first_seen() {
        let (intake, store, _tmp) = service();
        let response = intake.submit(request(4242, 1_000.0, "Shop")).await.unwrap();
        assert_eq!(response.user_id, 4242);

        let user = store.get_user(4242).unwrap().unwrap();
        assert_eq!(user.risk_profile.transaction_count, 1);
    }

    #[tokio::test]
    async fn fraud_history_is_bounded_across_submissions() {
        let (intake, store, _tmp) = service();
        for i in 0..12 {
            let mut req = request(1, 1_000.0 + i as f64, "Shop");
            req.transaction_id = Some(format!("TXN_B{i}"));
            intake.submit(req).await.unwrap();
        }
        let user = store.get_user(1).unwrap().unwrap();
        assert_eq!(user.risk_profile.fraud_history.len(), 10);
        assert_eq!(user.risk_profile.transaction_count, 12);
    }
}
