use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Fraud decision issued for a scored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "APPROVE")]
    Approve,
    #[serde(rename = "REVIEW")]
    Review,
    #[serde(rename = "DECLINE")]
    Decline,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::Review => "REVIEW",
            Decision::Decline => "DECLINE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "APPROVE" => Some(Decision::Approve),
            "REVIEW" => Some(Decision::Review),
            "DECLINE" => Some(Decision::Decline),
            _ => None,
        }
    }

    /// Transaction status this decision maps to.
    pub fn transaction_status(&self) -> TransactionStatus {
        match self {
            Decision::Approve => TransactionStatus::Approved,
            Decision::Decline => TransactionStatus::Declined,
            Decision::Review => TransactionStatus::UnderReview,
        }
    }
}

/// Lifecycle status of a transaction. Starts `pending` and transitions
/// exactly once when the assessment decision is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Declined,
    UnderReview,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Declined => "declined",
            TransactionStatus::UnderReview => "under_review",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "approved" => Some(TransactionStatus::Approved),
            "declined" => Some(TransactionStatus::Declined),
            "under_review" => Some(TransactionStatus::UnderReview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One entry of a user's bounded fraud history (last 10 assessments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudHistoryEntry {
    pub timestamp: String,
    pub fraud_score: f64,
    pub decision: Decision,
}

/// Rolling per-user risk aggregates, stored as a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskProfile {
    #[serde(default)]
    pub transaction_count: u64,
    #[serde(default)]
    pub avg_amount: f64,
    #[serde(default)]
    pub last_transaction: Option<String>,
    #[serde(default = "default_risk_level")]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub fraud_history: Vec<FraudHistoryEntry>,
}

fn default_risk_level() -> RiskLevel {
    RiskLevel::Low
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self {
            transaction_count: 0,
            avg_amount: 0.0,
            last_transaction: None,
            risk_level: RiskLevel::Low,
            fraud_history: Vec::new(),
        }
    }
}

/// A payer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub status: String,
    pub risk_profile: RiskProfile,
}

/// One payment event, normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub transaction_type: String,
    pub merchant_id: String,
    pub timestamp: DateTime<Utc>,
    pub payment_method: String,
    pub ip_address: Option<String>,
    pub device_fingerprint: Option<String>,
    pub location_data: Option<serde_json::Value>,
    pub transaction_status: TransactionStatus,
}

/// A triggered (or otherwise noted) risk signal attached to an assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub factor: String,
    pub weight: f64,
    pub triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// The decision record bound to one transaction. Written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAssessment {
    pub assessment_id: i64,
    pub transaction_id: String,
    pub fraud_score: f64,
    pub risk_factors: Vec<RiskFactor>,
    pub model_version: String,
    pub decision: Decision,
    pub confidence_level: f64,
    pub processed_at: DateTime<Utc>,
}

/// A named weighted rule. `rule_logic` shape depends on `rule_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudRule {
    pub rule_id: i64,
    pub rule_name: String,
    pub rule_description: String,
    pub rule_logic: serde_json::Value,
    pub weight: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Slim view of a past transaction used for velocity signals.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub transaction_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub merchant_id: String,
    pub payment_method: String,
}

/// Per-component score breakdown surfaced with each analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentScores {
    pub rnn_score: f64,
    pub rule_score: f64,
    pub velocity_score: f64,
}

/// Full scoring-engine output for one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct FraudAnalysis {
    pub transaction_id: String,
    pub fraud_score: f64,
    pub decision: Decision,
    pub confidence_level: f64,
    pub risk_factors: Vec<RiskFactor>,
    pub component_scores: ComponentScores,
    pub model_version: String,
    pub processing_time_ms: f64,
    pub processed_at: String,
}

/// Raw intake payload from the direct API or a webhook adapter.
///
/// Everything is optional here; validation decides what is missing and
/// normalization fills the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    pub transaction_id: Option<String>,
    pub user_id: Option<i64>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub transaction_type: Option<String>,
    #[serde(alias = "merchant")]
    pub merchant_id: Option<String>,
    pub payment_method: Option<String>,
    pub ip_address: Option<String>,
    pub device_fingerprint: Option<String>,
    pub timestamp: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,

    // Device-fingerprint inputs (used when no fingerprint is supplied).
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub screen_resolution: Option<String>,
    pub timezone: Option<String>,

    // Location inputs.
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub postal_code: Option<String>,
    pub billing_address: Option<String>,

    // Provider-supplied fraud indicators (webhook path). Folded into
    // location_data so they survive alongside the transaction.
    pub card_type: Option<String>,
    pub card_country: Option<String>,
    pub card_issuer: Option<String>,
    pub card_bin: Option<String>,
    pub card_last4: Option<String>,
    pub processor_response: Option<String>,
    pub auth_model: Option<String>,
}

/// Response returned from a completed submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub status: String,
    pub transaction_id: String,
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub timestamp: String,
    pub fraud_analysis: FraudAnalysis,
    pub assessment_id: i64,
}

/// Aggregate counters for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionStats {
    pub total_transactions: u64,
    pub total_assessments: u64,
    pub approved: u64,
    pub declined: u64,
    pub review: u64,
    pub approval_rate: f64,
    pub average_fraud_score: f64,
}

/// Decision counts over a recent assessment window.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionDistribution {
    #[serde(rename = "APPROVE")]
    pub approve: u64,
    #[serde(rename = "DECLINE")]
    pub decline: u64,
    #[serde(rename = "REVIEW")]
    pub review: u64,
}

/// Trend slice over the most recent assessments, for admin analytics.
#[derive(Debug, Clone, Serialize)]
pub struct FraudTrends {
    pub recent_avg_score: f64,
    pub decision_distribution: DecisionDistribution,
    pub high_risk_transactions: u64,
    pub total_analyzed: u64,
}

/// Fixed-width UTC timestamp used everywhere a timestamp hits SQLite, so
/// lexicographic ORDER BY matches chronological order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub model_path: String,
    pub paystack_secret_key: Option<String>,
    pub flutterwave_webhook_hash: Option<String>,
    pub scoring_deadline_ms: u64,
    pub ml_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./fraudgate.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let model_path = std::env::var("MODEL_PATH")
            .unwrap_or_else(|_| "./models/fraud_model.json".to_string());

        let paystack_secret_key = std::env::var("PAYSTACK_SECRET_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let flutterwave_webhook_hash = std::env::var("FLUTTERWAVE_WEBHOOK_HASH")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let scoring_deadline_ms = std::env::var("SCORING_DEADLINE_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .unwrap_or(2000);

        let ml_timeout_ms = std::env::var("ML_TIMEOUT_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .unwrap_or(500);

        Ok(Self {
            database_path,
            port,
            model_path,
            paystack_secret_key,
            flutterwave_webhook_hash,
            scoring_deadline_ms,
            ml_timeout_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_status_mapping() {
        assert_eq!(
            Decision::Approve.transaction_status(),
            TransactionStatus::Approved
        );
        assert_eq!(
            Decision::Decline.transaction_status(),
            TransactionStatus::Declined
        );
        assert_eq!(
            Decision::Review.transaction_status(),
            TransactionStatus::UnderReview
        );
    }

    #[test]
    fn timestamp_round_trip_preserves_order() {
        let a = parse_ts("2026-08-01T12:00:00.123456Z").unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let (sa, sb) = (format_ts(&a), format_ts(&b));
        assert!(sa < sb);
        assert_eq!(parse_ts(&sa).unwrap(), a);
    }

    #[test]
    fn risk_profile_tolerates_sparse_json() {
        let profile: RiskProfile =
            serde_json::from_str(r#"{"transaction_count": 3}"#).unwrap();
        assert_eq!(profile.transaction_count, 3);
        assert_eq!(profile.risk_level, RiskLevel::Low);
        assert!(profile.fraud_history.is_empty());
    }

    #[test]
    fn submit_request_accepts_merchant_alias() {
        let req: SubmitRequest =
            serde_json::from_str(r#"{"merchant": "Coffee Shop", "amount": 100.0}"#).unwrap();
        assert_eq!(req.merchant_id.as_deref(), Some("Coffee Shop"));
    }
}
