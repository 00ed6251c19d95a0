//! Composite scoring engine.
//!
//! Blends three signal sources into one fraud score:
//!
//! ```text
//! final_score = alpha * rnn + beta * rules + gamma * velocity
//! ```
//!
//! with `alpha + beta + gamma = 1`. When no model artifact is loaded (or
//! inference fails for a call), the weights re-balance onto rules and
//! velocity. Scoring never rejects a submission on its own failure: any
//! uncaught error degrades to the safe-default REVIEW assessment so the
//! customer-facing outcome falls back to human review.

pub mod history;
pub mod rules;
pub mod velocity;

use crate::errors::{FraudError, FraudResult};
use crate::ml::features::SequenceBuffers;
use crate::ml::MlScorer;
use crate::models::{
    format_ts, ComponentScores, Decision, FraudAnalysis, HistoryEntry, RiskFactor, Transaction,
};
use crate::store::FraudStore;
use chrono::Utc;
use history::HistoryWindow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

pub const DECLINE_THRESHOLD: f64 = 0.8;
pub const REVIEW_THRESHOLD: f64 = 0.5;

const HISTORY_DAYS: i64 = 1;

/// Blend coefficients; always sums to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// Used while a model artifact is loaded and inference succeeds.
pub const WEIGHTS_WITH_MODEL: ScoringWeights = ScoringWeights {
    alpha: 0.6,
    beta: 0.3,
    gamma: 0.1,
};

/// Used without a model, or when inference times out / fails.
pub const WEIGHTS_RULES_ONLY: ScoringWeights = ScoringWeights {
    alpha: 0.0,
    beta: 0.8,
    gamma: 0.2,
};

const FALLBACK_MODEL_VERSION: &str = "rule_based_v1.0";

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

pub fn decide(final_score: f64) -> Decision {
    if final_score >= DECLINE_THRESHOLD {
        Decision::Decline
    } else if final_score >= REVIEW_THRESHOLD {
        Decision::Review
    } else {
        Decision::Approve
    }
}

/// Confidence grows with score extremity and with the number of factors.
pub fn confidence(final_score: f64, factor_count: usize) -> f64 {
    let score_confidence = (final_score - 0.5).abs() * 2.0;
    let factor_confidence = (factor_count as f64 * 0.1).min(0.5);
    (score_confidence + factor_confidence).min(1.0)
}

pub struct ScoringEngine {
    store: Arc<FraudStore>,
    history: Arc<HistoryWindow>,
    ml: Arc<MlScorer>,
    buffers: SequenceBuffers,
}

impl ScoringEngine {
    pub fn new(
        store: Arc<FraudStore>,
        history: Arc<HistoryWindow>,
        ml: Arc<MlScorer>,
        sequence_length: usize,
    ) -> Self {
        Self {
            store,
            history,
            ml,
            buffers: SequenceBuffers::new(sequence_length),
        }
    }

    /// Score one normalized transaction.
    ///
    /// Store failures abort the unit of work and propagate. Everything
    /// else degrades to the safe-default assessment.
    pub async fn analyze(&self, tx: &Transaction) -> FraudResult<FraudAnalysis> {
        let started = Instant::now();
        match self.analyze_inner(tx, started).await {
            Ok(analysis) => Ok(analysis),
            Err(FraudError::StoreUnavailable(e)) => Err(FraudError::StoreUnavailable(e)),
            Err(e) => {
                error!(transaction_id = %tx.transaction_id, error = %e, "Fraud analysis failed, using safe default");
                Ok(self.safe_default(tx, started))
            }
        }
    }

    async fn analyze_inner(
        &self,
        tx: &Transaction,
        started: Instant,
    ) -> FraudResult<FraudAnalysis> {
        let mut weights = if self.ml.is_loaded() {
            WEIGHTS_WITH_MODEL
        } else {
            WEIGHTS_RULES_ONLY
        };

        // 1. Model component. A partial buffer scores 0 without touching
        //    the weights; a failed or timed-out inference re-balances.
        let mut rnn_score = 0.0;
        let mut factors: Vec<RiskFactor> = Vec::new();
        if self.ml.is_loaded() {
            if let Some(sequence) = self.buffers.push(tx.user_id, tx) {
                match self.ml.score(sequence).await {
                    Ok(score) => {
                        rnn_score = score;
                        if score > 0.5 {
                            factors.push(RiskFactor {
                                factor: "rnn_prediction".to_string(),
                                weight: score,
                                triggered: true,
                                description: None,
                                details: None,
                            });
                        }
                    }
                    Err(e) => {
                        warn!(transaction_id = %tx.transaction_id, error = %e, "Model scoring unavailable, re-balancing weights");
                        weights = WEIGHTS_RULES_ONLY;
                    }
                }
            }
        }

        // 2. Rule component over a snapshot of the active rule set.
        let active_rules = self.store.get_active_rules()?;
        let rule_outcome = rules::evaluate(&active_rules, tx);
        factors.extend(rule_outcome.factors);

        // 3. Velocity over the 24-hour window. The persisted slice does
        //    not contain the transaction under analysis yet, so it is
        //    prepended here.
        let mut window: Vec<HistoryEntry> = vec![HistoryEntry {
            transaction_id: tx.transaction_id.clone(),
            amount: tx.amount,
            timestamp: tx.timestamp,
            merchant_id: tx.merchant_id.clone(),
            payment_method: tx.payment_method.clone(),
        }];
        window.extend(self.history.history(tx.user_id, HISTORY_DAYS)?);
        let velocity_outcome = velocity::analyze(tx, &window);
        factors.extend(velocity_outcome.factors);

        // 4. Combine and decide.
        let final_score = (weights.alpha * rnn_score
            + weights.beta * rule_outcome.score
            + weights.gamma * velocity_outcome.score)
            .clamp(0.0, 1.0);
        let decision = decide(final_score);
        let confidence_level = confidence(final_score, factors.len());

        Ok(FraudAnalysis {
            transaction_id: tx.transaction_id.clone(),
            fraud_score: round4(final_score),
            decision,
            confidence_level: round4(confidence_level),
            risk_factors: factors,
            component_scores: ComponentScores {
                rnn_score: round4(rnn_score),
                rule_score: round4(rule_outcome.score),
                velocity_score: round4(velocity_outcome.score),
            },
            model_version: self
                .ml
                .model_version()
                .unwrap_or_else(|| FALLBACK_MODEL_VERSION.to_string()),
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            processed_at: format_ts(&Utc::now()),
        })
    }

    /// Safe-default policy: degrade to human review, never to outright
    /// acceptance or rejection.
    fn safe_default(&self, tx: &Transaction, started: Instant) -> FraudAnalysis {
        FraudAnalysis {
            transaction_id: tx.transaction_id.clone(),
            fraud_score: 0.5,
            decision: Decision::Review,
            confidence_level: 0.0,
            risk_factors: vec![RiskFactor {
                factor: "analysis_error".to_string(),
                weight: 0.5,
                triggered: true,
                description: None,
                details: None,
            }],
            component_scores: ComponentScores {
                rnn_score: 0.0,
                rule_score: 0.0,
                velocity_score: 0.0,
            },
            model_version: self
                .ml
                .model_version()
                .unwrap_or_else(|| FALLBACK_MODEL_VERSION.to_string()),
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            processed_at: format_ts(&Utc::now()),
        }
    }

    /// Current weights, reflecting whether a model artifact is loaded.
    pub fn current_weights(&self) -> ScoringWeights {
        if self.ml.is_loaded() {
            WEIGHTS_WITH_MODEL
        } else {
            WEIGHTS_RULES_ONLY
        }
    }

    /// Engine metadata for the model-info endpoint.
    pub fn model_info(&self) -> serde_json::Value {
        let weights = self.current_weights();
        serde_json::json!({
            "engine_version": "2.0.0",
            "rnn_model_loaded": self.ml.is_loaded(),
            "model_version": self.ml.model_version(),
            "weights": {
                "alpha": weights.alpha,
                "beta": weights.beta,
                "gamma": weights.gamma,
            },
            "thresholds": {
                "high": DECLINE_THRESHOLD,
                "medium": REVIEW_THRESHOLD,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionStatus;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn engine_without_model() -> (ScoringEngine, Arc<FraudStore>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = Arc::new(FraudStore::new(temp.path().to_str().unwrap()).unwrap());
        let history = Arc::new(HistoryWindow::new(store.clone()));
        let ml = Arc::new(MlScorer::disabled(Duration::from_millis(500)));
        let engine = ScoringEngine::new(store.clone(), history, ml, 10);
        (engine, store, temp)
    }

    fn tx(user_id: i64, amount: f64, merchant: &str) -> Transaction {
        Transaction {
            transaction_id: format!("TXN_{user_id}_{amount}"),
            user_id,
            amount,
            currency: "NGN".to_string(),
            transaction_type: "payment".to_string(),
            merchant_id: merchant.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 16, 14, 0, 0).unwrap(),
            payment_method: "card".to_string(),
            ip_address: None,
            device_fingerprint: None,
            location_data: None,
            transaction_status: TransactionStatus::Pending,
        }
    }

    #[tokio::test]
    async fn clean_transaction_approves_with_zero_score() {
        let (engine, _store, _tmp) = engine_without_model();
        let analysis = engine.analyze(&tx(1, 50_000.0, "Coffee Shop")).await.unwrap();

        assert_eq!(analysis.fraud_score, 0.0);
        assert_eq!(analysis.decision, Decision::Approve);
        assert_eq!(analysis.component_scores.rule_score, 0.0);
        assert_eq!(analysis.component_scores.velocity_score, 0.0);
        assert_eq!(analysis.model_version, "rule_based_v1.0");
        assert!(analysis.risk_factors.is_empty());
    }

    #[tokio::test]
    async fn high_amount_lands_just_below_review() {
        let (engine, _store, _tmp) = engine_without_model();
        let analysis = engine.analyze(&tx(1, 600_000.0, "Luxury")).await.unwrap();

        // Rules-only weights: 0.8 * 0.6 = 0.48, just below REVIEW.
        assert_eq!(analysis.fraud_score, 0.48);
        assert_eq!(analysis.decision, Decision::Approve);
        assert_eq!(analysis.component_scores.rule_score, 0.6);
    }

    #[tokio::test]
    async fn stacked_rules_decline() {
        let (engine, _store, _tmp) = engine_without_model();
        let analysis = engine.analyze(&tx(1, 1_000_000.0, "Car Dealer")).await.unwrap();

        // Rule weights clamp at 1.0: 0.8 * 1.0 = 0.8 -> DECLINE.
        assert_eq!(analysis.fraud_score, 0.8);
        assert_eq!(analysis.decision, Decision::Decline);
    }

    #[tokio::test]
    async fn risky_merchant_approves_below_review() {
        let (engine, _store, _tmp) = engine_without_model();
        let analysis = engine.analyze(&tx(2, 100_000.0, "Casino Resort")).await.unwrap();

        assert_eq!(analysis.fraud_score, 0.32);
        assert_eq!(analysis.decision, Decision::Approve);
    }

    #[tokio::test]
    async fn velocity_burst_contributes() {
        let (engine, store, _tmp) = engine_without_model();
        // Six persisted transactions within a minute; the seventh is the
        // one under analysis.
        let base = Utc::now();
        for i in 0..6 {
            let mut t = tx(3, 100_000.0, "x");
            t.transaction_id = format!("TXN_BURST_{i}");
            t.timestamp = base - ChronoDuration::seconds(10 * (i + 1));
            store.save_transaction(&t).unwrap();
        }

        let mut current = tx(3, 100_000.0, "x");
        current.timestamp = base;
        let analysis = engine.analyze(&current).await.unwrap();

        // frequency 0.2 + rapid-fire 0.2 = 0.4; 0.2 * 0.4 = 0.08.
        assert_eq!(analysis.component_scores.velocity_score, 0.4);
        assert_eq!(analysis.fraud_score, 0.08);
        assert_eq!(analysis.decision, Decision::Approve);
    }

    #[tokio::test]
    async fn factors_concatenate_rules_then_velocity() {
        let (engine, store, _tmp) = engine_without_model();
        let base = Utc::now();
        for i in 0..6 {
            let mut t = tx(4, 600_000.0, "Casino");
            t.transaction_id = format!("TXN_ORDER_{i}");
            t.timestamp = base - ChronoDuration::seconds(10 * (i + 1));
            store.save_transaction(&t).unwrap();
        }

        let mut current = tx(4, 600_000.0, "Casino");
        current.timestamp = base;
        let analysis = engine.analyze(&current).await.unwrap();

        let names: Vec<&str> = analysis
            .risk_factors
            .iter()
            .map(|f| f.factor.as_str())
            .collect();
        let first_velocity = names
            .iter()
            .position(|n| *n == "high_frequency" || *n == "unusual_time_pattern")
            .unwrap();
        let last_rule = names
            .iter()
            .rposition(|n| *n == "high_amount" || *n == "risky_merchant")
            .unwrap();
        assert!(last_rule < first_velocity);
    }

    #[tokio::test]
    async fn decision_thresholds_are_consistent() {
        for (score, expected) in [
            (0.0, Decision::Approve),
            (0.49, Decision::Approve),
            (0.5, Decision::Review),
            (0.79, Decision::Review),
            (0.8, Decision::Decline),
            (1.0, Decision::Decline),
        ] {
            assert_eq!(decide(score), expected);
        }
    }

    #[test]
    fn weights_sum_to_one_in_both_configurations() {
        for w in [WEIGHTS_WITH_MODEL, WEIGHTS_RULES_ONLY] {
            assert!((w.alpha + w.beta + w.gamma - 1.0).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&w.alpha));
            assert!((0.0..=1.0).contains(&w.beta));
            assert!((0.0..=1.0).contains(&w.gamma));
        }
    }

    #[test]
    fn confidence_formula() {
        assert_eq!(confidence(0.5, 0), 0.0);
        assert!((confidence(0.0, 0) - 1.0).abs() < 1e-12);
        assert!((confidence(0.48, 1) - (0.04 + 0.1)).abs() < 1e-12);
        // Factor bonus saturates at 0.5, total at 1.0.
        assert_eq!(confidence(0.9, 20), 1.0);
    }

    #[tokio::test]
    async fn scores_stay_in_bounds_for_extreme_amounts() {
        let (engine, _store, _tmp) = engine_without_model();
        for amount in [0.01, 1.0, 49_999_999.0] {
            let analysis = engine.analyze(&tx(1, amount, "Casino Betting Crypto")).await.unwrap();
            assert!((0.0..=1.0).contains(&analysis.fraud_score));
            assert!((0.0..=1.0).contains(&analysis.confidence_level));
        }
    }
}
