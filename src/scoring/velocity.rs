//! Velocity analyzer: short-horizon behavioral signals derived from a
//! user's recent transaction history. Pure arithmetic, no I/O.
//!
//! The history slice passed in includes the transaction under analysis,
//! so a burst of N submissions is seen as N entries on the Nth call.

use crate::models::{HistoryEntry, RiskFactor, Transaction};

const RAPID_FIRE_GAP_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct VelocityOutcome {
    pub score: f64,
    pub factors: Vec<RiskFactor>,
}

/// Derive the velocity sub-score for `current` given the 24-hour history.
/// Each signal contributes additively; the total clamps to 1.0. Signals
/// with a zero contribution emit no factor.
pub fn analyze(current: &Transaction, history: &[HistoryEntry]) -> VelocityOutcome {
    let mut score = 0.0;
    let mut factors = Vec::new();

    if history.is_empty() {
        return VelocityOutcome { score, factors };
    }

    let frequency = frequency_contribution(history.len());
    if frequency > 0.0 {
        score += frequency;
        factors.push(RiskFactor {
            factor: "high_frequency".to_string(),
            weight: frequency,
            triggered: true,
            description: None,
            details: Some(format!("{} transactions in 24h", history.len())),
        });
    }

    let divergence = amount_divergence_contribution(current.amount, history);
    if divergence > 0.0 {
        score += divergence;
        factors.push(RiskFactor {
            factor: "unusual_amount_pattern".to_string(),
            weight: divergence,
            triggered: true,
            description: None,
            details: None,
        });
    }

    let rapid_fire = rapid_fire_contribution(history);
    if rapid_fire > 0.0 {
        score += rapid_fire;
        factors.push(RiskFactor {
            factor: "unusual_time_pattern".to_string(),
            weight: rapid_fire,
            triggered: true,
            description: None,
            details: None,
        });
    }

    VelocityOutcome {
        score: score.min(1.0),
        factors,
    }
}

/// More than 5 transactions in the window is suspicious.
fn frequency_contribution(count: usize) -> f64 {
    if count > 5 {
        ((count - 5) as f64 * 0.1).min(0.5)
    } else {
        0.0
    }
}

/// Flags amounts far from the recent running mean (5x above or 80% below).
fn amount_divergence_contribution(current_amount: f64, history: &[HistoryEntry]) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let mean = history.iter().map(|h| h.amount).sum::<f64>() / history.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let ratio = current_amount / mean;
    if ratio > 5.0 || ratio < 0.2 {
        ((ratio - 1.0).abs() * 0.1).min(0.3)
    } else {
        0.0
    }
}

/// Counts adjacent transaction pairs closer than five minutes apart.
fn rapid_fire_contribution(history: &[HistoryEntry]) -> f64 {
    if history.len() < 3 {
        return 0.0;
    }
    let mut timestamps: Vec<_> = history.iter().map(|h| h.timestamp).collect();
    timestamps.sort();

    let rapid_count = timestamps
        .windows(2)
        .filter(|w| (w[1] - w[0]).num_seconds() < RAPID_FIRE_GAP_SECS)
        .count();

    if rapid_count > 2 {
        (rapid_count as f64 * 0.1).min(0.2)
    } else {
        0.0
    }
}
