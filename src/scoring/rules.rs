//! Rule engine: evaluates the active weighted rule set against one
//! transaction. Pure and deterministic per (transaction, rule set) — the
//! only I/O is the caller loading the rules.

use crate::models::{FraudRule, RiskFactor, Transaction};
use chrono::Timelike;
use serde::Deserialize;
use tracing::warn;

/// Result of a rule pass: normalized score plus the triggered factors.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub score: f64,
    pub factors: Vec<RiskFactor>,
}

#[derive(Debug, Deserialize)]
struct ThresholdLogic {
    threshold: f64,
}

#[derive(Debug, Deserialize)]
struct RoundAmountLogic {
    amounts: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RiskyMerchantLogic {
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UnusualTimeLogic {
    start_hour: u32,
    end_hour: u32,
}

/// Evaluate every active rule and aggregate the triggered weights,
/// clamped to 1.0.
pub fn evaluate(rules: &[FraudRule], tx: &Transaction) -> RuleOutcome {
    let mut total = 0.0;
    let mut factors = Vec::new();

    for rule in rules {
        match rule_triggers(rule, tx) {
            Some(true) => {
                total += rule.weight;
                factors.push(RiskFactor {
                    factor: rule.rule_name.clone(),
                    weight: rule.weight,
                    triggered: true,
                    description: Some(rule.rule_description.clone()),
                    details: None,
                });
            }
            Some(false) => {}
            None => {
                // Malformed logic or unknown rule name; already logged.
            }
        }
    }

    RuleOutcome {
        score: total.min(1.0),
        factors,
    }
}

/// Returns Some(triggered) or None when the rule could not be evaluated
/// (unknown name, malformed logic). Never fatal.
fn rule_triggers(rule: &FraudRule, tx: &Transaction) -> Option<bool> {
    match rule.rule_name.as_str() {
        "high_amount" | "very_high_amount" => {
            match serde_json::from_value::<ThresholdLogic>(rule.rule_logic.clone()) {
                // Inclusive: an amount sitting exactly on the threshold is
                // already in the suspicious band.
                Ok(logic) => Some(tx.amount >= logic.threshold),
                Err(e) => {
                    warn!(rule = %rule.rule_name, error = %e, "Malformed rule_logic, skipping rule");
                    None
                }
            }
        }
        "round_amount" => {
            match serde_json::from_value::<RoundAmountLogic>(rule.rule_logic.clone()) {
                Ok(logic) => {
                    // Exact match at 2 decimal places.
                    let cents = (tx.amount * 100.0).round() as i64;
                    Some(
                        logic
                            .amounts
                            .iter()
                            .any(|a| (a * 100.0).round() as i64 == cents),
                    )
                }
                Err(e) => {
                    warn!(rule = %rule.rule_name, error = %e, "Malformed rule_logic, skipping rule");
                    None
                }
            }
        }
        "risky_merchant" => {
            match serde_json::from_value::<RiskyMerchantLogic>(rule.rule_logic.clone()) {
                Ok(logic) => {
                    let merchant = tx.merchant_id.to_lowercase();
                    Some(
                        logic
                            .categories
                            .iter()
                            .any(|c| merchant.contains(&c.to_lowercase())),
                    )
                }
                Err(e) => {
                    warn!(rule = %rule.rule_name, error = %e, "Malformed rule_logic, skipping rule");
                    None
                }
            }
        }
        "unusual_time" => {
            match serde_json::from_value::<UnusualTimeLogic>(rule.rule_logic.clone()) {
                Ok(logic) => {
                    let hour = tx.timestamp.hour();
                    let hit = if logic.start_hour > logic.end_hour {
                        // Range wraps midnight, e.g. 23..6.
                        hour >= logic.start_hour || hour <= logic.end_hour
                    } else {
                        hour >= logic.start_hour && hour <= logic.end_hour
                    };
                    Some(hit)
                }
                Err(e) => {
                    warn!(rule = %rule.rule_name, error = %e, "Malformed rule_logic, skipping rule");
                    None
                }
            }
        }
        // Velocity semantics live in the velocity analyzer.
        "velocity_check" => Some(false),
        other => {
            warn!(rule = %other, "Unknown rule name, skipping rule");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionStatus;
    use chrono::{TimeZone, Utc};

    fn tx_at(amount: f64, merchant: &str, hour: u32) -> Transaction {
        Transaction {
            transaction_id: "TXN_T".to_string(),
            user_id: 1,
            amount,
            currency: "NGN".to_string(),
            transaction_type: "payment".to_string(),
            merchant_id: merchant.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 14, hour, 0, 0).unwrap(),
            payment_method: "card".to_string(),
            ip_address: None,
            device_fingerprint: None,
            location_data: None,
            transaction_status: TransactionStatus::Pending,
        }
    }

    fn rule(name: &str, logic: serde_json::Value, weight: f64) -> FraudRule {
        FraudRule {
            rule_id: 1,
            rule_name: name.to_string(),
            rule_description: format!("{name} rule"),
            rule_logic: logic,
            weight,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn default_rules() -> Vec<FraudRule> {
        vec![
            rule(
                "high_amount",
                serde_json::json!({"threshold": 500000, "currency": "NGN"}),
                0.6,
            ),
            rule(
                "round_amount",
                serde_json::json!({"amounts": [200000, 500000, 1000000, 2000000]}),
                0.3,
            ),
            rule(
                "very_high_amount",
                serde_json::json!({"threshold": 1000000, "currency": "NGN"}),
                0.5,
            ),
            rule(
                "risky_merchant",
                serde_json::json!({"categories": ["casino", "gambling", "crypto", "betting"]}),
                0.4,
            ),
            rule(
                "unusual_time",
                serde_json::json!({"start_hour": 23, "end_hour": 6}),
                0.2,
            ),
            rule(
                "velocity_check",
                serde_json::json!({"max_transactions": 5, "time_window": 300}),
                0.7,
            ),
        ]
    }

    #[test]
    fn clean_transaction_scores_zero() {
        let outcome = evaluate(&default_rules(), &tx_at(50_000.0, "Coffee Shop", 14));
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.factors.is_empty());
    }

    #[test]
    fn high_amount_triggers_alone() {
        let outcome = evaluate(&default_rules(), &tx_at(600_000.0, "Luxury", 14));
        assert_eq!(outcome.score, 0.6);
        assert_eq!(outcome.factors.len(), 1);
        assert_eq!(outcome.factors[0].factor, "high_amount");
    }

    #[test]
    fn stacked_rules_clamp_to_one() {
        // 1,000,000 hits round_amount (0.3), high_amount (0.6) and
        // very_high_amount (0.5): 1.4 clamps to 1.0.
        let outcome = evaluate(&default_rules(), &tx_at(1_000_000.0, "Car Dealer", 14));
        let sum: f64 = outcome.factors.iter().map(|f| f.weight).sum();
        assert!((sum - 1.4).abs() < 1e-9);
        assert_eq!(outcome.score, 1.0);
    }

    #[test]
    fn risky_merchant_is_case_insensitive_substring() {
        let outcome = evaluate(&default_rules(), &tx_at(100_000.0, "Casino Resort", 14));
        assert_eq!(outcome.score, 0.4);
        assert_eq!(outcome.factors.len(), 1);
        assert_eq!(outcome.factors[0].factor, "risky_merchant");

        let outcome2 = evaluate(&default_rules(), &tx_at(42_000.0, "GRAND CRYPTO LTD", 14));
        assert_eq!(outcome2.factors.len(), 1);
        assert_eq!(outcome2.factors[0].factor, "risky_merchant");
    }

    #[test]
    fn unusual_time_wraps_midnight() {
        let rules = default_rules();
        assert!(evaluate(&rules, &tx_at(10.0, "x", 23))
            .factors
            .iter()
            .any(|f| f.factor == "unusual_time"));
        assert!(evaluate(&rules, &tx_at(10.0, "x", 2))
            .factors
            .iter()
            .any(|f| f.factor == "unusual_time"));
        assert!(evaluate(&rules, &tx_at(10.0, "x", 6))
            .factors
            .iter()
            .any(|f| f.factor == "unusual_time"));
        assert!(!evaluate(&rules, &tx_at(10.0, "x", 7))
            .factors
            .iter()
            .any(|f| f.factor == "unusual_time"));
    }

    #[test]
    fn unusual_time_non_wrapping_range() {
        let rules = vec![rule(
            "unusual_time",
            serde_json::json!({"start_hour": 9, "end_hour": 17}),
            0.2,
        )];
        assert_eq!(evaluate(&rules, &tx_at(10.0, "x", 12)).score, 0.2);
        assert_eq!(evaluate(&rules, &tx_at(10.0, "x", 8)).score, 0.0);
        assert_eq!(evaluate(&rules, &tx_at(10.0, "x", 18)).score, 0.0);
    }

    #[test]
    fn round_amount_requires_exact_match() {
        let rules = default_rules();
        assert_eq!(evaluate(&rules, &tx_at(200_000.0, "x", 14)).score, 0.3);
        assert_eq!(evaluate(&rules, &tx_at(200_000.01, "x", 14)).score, 0.0);
        assert_eq!(evaluate(&rules, &tx_at(100_000.0, "x", 14)).score, 0.0);
    }

    #[test]
    fn unknown_rule_is_skipped() {
        let mut rules = default_rules();
        rules.push(rule("geo_mismatch", serde_json::json!({}), 0.9));
        let outcome = evaluate(&rules, &tx_at(600_000.0, "Luxury", 14));
        assert_eq!(outcome.score, 0.6);
    }

    #[test]
    fn malformed_logic_is_skipped() {
        let rules = vec![
            rule("high_amount", serde_json::json!({"limit": 5}), 0.6),
            rule(
                "risky_merchant",
                serde_json::json!({"categories": ["luxury"]}),
                0.4,
            ),
        ];
        let outcome = evaluate(&rules, &tx_at(600_000.0, "Luxury", 14));
        assert_eq!(outcome.score, 0.4);
        assert_eq!(outcome.factors[0].factor, "risky_merchant");
    }

    #[test]
    fn velocity_check_rule_never_triggers_here() {
        let rules = vec![rule(
            "velocity_check",
            serde_json::json!({"max_transactions": 5, "time_window": 300}),
            0.7,
        )];
        assert_eq!(evaluate(&rules, &tx_at(1.0, "x", 14)).score, 0.0);
    }

    #[test]
    fn enabling_a_triggering_rule_never_decreases_score() {
        let base = vec![rule(
            "high_amount",
            serde_json::json!({"threshold": 500000}),
            0.6,
        )];
        let tx = tx_at(600_000.0, "Casino", 14);
        let before = evaluate(&base, &tx).score;

        let mut extended = base.clone();
        extended.push(rule(
            "risky_merchant",
            serde_json::json!({"categories": ["casino"]}),
            0.4,
        ));
        let after = evaluate(&extended, &tx).score;
        assert!(after >= before);
    }
}
