//! SQLite-backed persistence for transactions, assessments, users and rules.
//!
//! Follows the same shape as the rest of our storage layers:
//! - WAL mode for concurrent reads during writes
//! - prepared statement caching on hot paths
//! - multi-write units inside a single IMMEDIATE transaction
//!
//! The scoring pipeline relies on two guarantees only: inserts are atomic
//! and visible to subsequent reads on the same connection, and the
//! {transaction, assessment, status, profile} group for one submission is
//! committed as one unit. Partial application is not observable.

use crate::errors::{FraudError, FraudResult};
use crate::models::{
    format_ts, parse_ts, Decision, DecisionDistribution, FraudAnalysis, FraudAssessment,
    FraudRule, FraudTrends, HistoryEntry, RiskProfile, Transaction, TransactionStats,
    TransactionStatus, User,
};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, TransactionBehavior};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA cache_size = -16000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    phone_number TEXT,
    created_at TEXT NOT NULL,
    last_login TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    risk_profile TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(user_id),
    amount REAL NOT NULL,
    currency TEXT NOT NULL,
    transaction_type TEXT NOT NULL DEFAULT 'payment',
    merchant_id TEXT NOT NULL DEFAULT 'Unknown',
    timestamp TEXT NOT NULL,
    payment_method TEXT NOT NULL DEFAULT 'card',
    ip_address TEXT,
    device_fingerprint TEXT,
    location_data TEXT,
    transaction_status TEXT NOT NULL DEFAULT 'pending'
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS fraud_assessments (
    assessment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id TEXT NOT NULL UNIQUE REFERENCES transactions(transaction_id),
    fraud_score REAL NOT NULL,
    risk_factors TEXT NOT NULL DEFAULT '[]',
    model_version TEXT,
    decision TEXT NOT NULL,
    confidence_level REAL,
    processed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fraud_rules (
    rule_id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_name TEXT NOT NULL UNIQUE,
    rule_description TEXT NOT NULL DEFAULT '',
    rule_logic TEXT NOT NULL DEFAULT '{}',
    weight REAL NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_user
    ON transactions(user_id, timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_transactions_timestamp
    ON transactions(timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_transactions_amount
    ON transactions(amount);

CREATE INDEX IF NOT EXISTS idx_assessments_transaction
    ON fraud_assessments(transaction_id);

CREATE INDEX IF NOT EXISTS idx_assessments_decision
    ON fraud_assessments(decision);

CREATE INDEX IF NOT EXISTS idx_assessments_score
    ON fraud_assessments(fraud_score);
"#;

/// Fields accepted when creating or updating a rule through the admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFraudRule {
    pub rule_name: String,
    #[serde(default)]
    pub rule_description: String,
    pub rule_logic: serde_json::Value,
    pub weight: f64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Partial rule update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulePatch {
    pub rule_description: Option<String>,
    pub rule_logic: Option<serde_json::Value>,
    pub weight: Option<f64>,
    pub is_active: Option<bool>,
}

pub struct FraudStore {
    conn: Arc<Mutex<Connection>>,
}

impl FraudStore {
    /// Open (or create) the database, apply the schema and seed defaults.
    pub fn new(db_path: &str) -> FraudResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // guarded by our own lock

        let conn = Connection::open_with_flags(db_path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        Self::seed_defaults(&conn)?;

        let tx_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
            .unwrap_or(0);
        info!("📊 Fraud store initialized at {} ({} transactions)", db_path, tx_count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Seed sample users and the default rule set on first boot.
    fn seed_defaults(conn: &Connection) -> FraudResult<()> {
        let now = format_ts(&Utc::now());

        let user_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if user_count == 0 {
            info!("Seeding sample users");
            let sample_users: [(&str, &str, &str); 3] = [
                (
                    "test_user_001@example.com",
                    "+2348012345678",
                    r#"{"risk_level":"low","transaction_count":150,"avg_amount":75000.0}"#,
                ),
                (
                    "test_user_002@example.com",
                    "+2348012345679",
                    r#"{"risk_level":"medium","transaction_count":50,"avg_amount":200000.0}"#,
                ),
                (
                    "test_user_003@example.com",
                    "+2348012345680",
                    r#"{"risk_level":"high","transaction_count":10,"avg_amount":800000.0}"#,
                ),
            ];
            for (email, phone, profile) in sample_users {
                conn.execute(
                    "INSERT INTO users (email, phone_number, created_at, risk_profile)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![email, phone, now, profile],
                )?;
            }
        }

        let rule_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM fraud_rules", [], |row| row.get(0))?;
        if rule_count == 0 {
            info!("Seeding default fraud rules");
            let default_rules: [(&str, &str, &str, f64); 6] = [
                (
                    "high_amount",
                    "High transaction amount rule",
                    r#"{"threshold":500000,"currency":"NGN"}"#,
                    0.6,
                ),
                (
                    "round_amount",
                    "Suspicious round amounts",
                    r#"{"amounts":[200000,500000,1000000,2000000]}"#,
                    0.3,
                ),
                (
                    "very_high_amount",
                    "Very high transaction amounts",
                    r#"{"threshold":1000000,"currency":"NGN"}"#,
                    0.5,
                ),
                (
                    "risky_merchant",
                    "Risky merchant categories",
                    r#"{"categories":["casino","gambling","crypto","betting"]}"#,
                    0.4,
                ),
                (
                    "unusual_time",
                    "Unusual transaction times",
                    r#"{"start_hour":23,"end_hour":6}"#,
                    0.2,
                ),
                // Evaluated by the velocity analyzer, not the rule switch.
                (
                    "velocity_check",
                    "Transaction velocity analysis",
                    r#"{"max_transactions":5,"time_window":300}"#,
                    0.7,
                ),
            ];
            for (name, description, logic, weight) in default_rules {
                conn.execute(
                    "INSERT INTO fraud_rules
                     (rule_name, rule_description, rule_logic, weight, is_active, created_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                    params![name, description, logic, weight, now],
                )?;
            }
        }

        Ok(())
    }

    // ---- users ----

    pub fn create_user(
        &self,
        email: &str,
        phone_number: Option<&str>,
        risk_profile: Option<RiskProfile>,
    ) -> FraudResult<User> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let profile = risk_profile.unwrap_or_default();
        let profile_json = serde_json::to_string(&profile)
            .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?;

        conn.execute(
            "INSERT INTO users (email, phone_number, created_at, risk_profile)
             VALUES (?1, ?2, ?3, ?4)",
            params![email, phone_number, format_ts(&now), profile_json],
        )?;
        let user_id = conn.last_insert_rowid();
        info!(user_id, email, "Created user");

        Ok(User {
            user_id,
            email: email.to_string(),
            phone_number: phone_number.map(|s| s.to_string()),
            created_at: now,
            last_login: None,
            status: "active".to_string(),
            risk_profile: profile,
        })
    }

    pub fn get_user(&self, user_id: i64) -> FraudResult<Option<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, email, phone_number, created_at, last_login, status, risk_profile
             FROM users WHERE user_id = ?1",
        )?;
        let mut rows = stmt.query([user_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_user(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_user_by_email(&self, email: &str) -> FraudResult<Option<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, email, phone_number, created_at, last_login, status, risk_profile
             FROM users WHERE email = ?1",
        )?;
        let mut rows = stmt.query([email])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_user(row)?)),
            None => Ok(None),
        }
    }

    /// Every user with their risk profile. Admin surface only.
    pub fn list_users(&self) -> FraudResult<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, email, phone_number, created_at, last_login, status, risk_profile
             FROM users ORDER BY user_id",
        )?;
        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Intake-on-first-seen: return the user, creating a placeholder row
    /// when the id has never been observed before.
    pub fn ensure_user(&self, user_id: i64, email: Option<&str>) -> FraudResult<User> {
        if let Some(user) = self.get_user(user_id)? {
            return Ok(user);
        }

        let conn = self.conn.lock();
        let now = Utc::now();
        let email = email
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("user_{user_id}@unknown.local"));
        let mut changed = conn.execute(
            "INSERT OR IGNORE INTO users (user_id, email, created_at, risk_profile)
             VALUES (?1, ?2, ?3, '{}')",
            params![user_id, email, format_ts(&now)],
        )?;
        if changed == 0 {
            // Supplied email already belongs to another user; fall back to
            // a placeholder so the id still materializes.
            changed = conn.execute(
                "INSERT OR IGNORE INTO users (user_id, email, created_at, risk_profile)
                 VALUES (?1, ?2, ?3, '{}')",
                params![user_id, format!("user_{user_id}@unknown.local"), format_ts(&now)],
            )?;
        }
        if changed > 0 {
            info!(user_id, "Created user on first-seen");
        }
        drop(conn);

        self.get_user(user_id)?
            .ok_or_else(|| FraudError::NotFound(format!("user {user_id}")))
    }

    pub fn update_user_risk_profile(
        &self,
        user_id: i64,
        profile: &RiskProfile,
    ) -> FraudResult<()> {
        let conn = self.conn.lock();
        let profile_json = serde_json::to_string(profile)
            .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?;
        let changed = conn.execute(
            "UPDATE users SET risk_profile = ?1 WHERE user_id = ?2",
            params![profile_json, user_id],
        )?;
        if changed == 0 {
            return Err(FraudError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    // ---- transactions ----

    pub fn save_transaction(&self, tx: &Transaction) -> FraudResult<()> {
        let conn = self.conn.lock();
        Self::insert_transaction(&conn, tx)
    }

    fn insert_transaction(conn: &Connection, tx: &Transaction) -> FraudResult<()> {
        let location_json = match &tx.location_data {
            Some(v) => Some(
                serde_json::to_string(v)
                    .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?,
            ),
            None => None,
        };
        conn.execute(
            "INSERT INTO transactions
             (transaction_id, user_id, amount, currency, transaction_type, merchant_id,
              timestamp, payment_method, ip_address, device_fingerprint, location_data,
              transaction_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                tx.transaction_id,
                tx.user_id,
                tx.amount,
                tx.currency,
                tx.transaction_type,
                tx.merchant_id,
                format_ts(&tx.timestamp),
                tx.payment_method,
                tx.ip_address,
                tx.device_fingerprint,
                location_json,
                tx.transaction_status.as_str(),
            ],
        )
        .map_err(|e| match FraudError::from(e) {
            FraudError::Conflict(_) => {
                FraudError::Conflict(format!("transaction {}", tx.transaction_id))
            }
            other => other,
        })?;
        Ok(())
    }

    pub fn get_transaction(&self, transaction_id: &str) -> FraudResult<Option<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT transaction_id, user_id, amount, currency, transaction_type, merchant_id,
                    timestamp, payment_method, ip_address, device_fingerprint, location_data,
                    transaction_status
             FROM transactions WHERE transaction_id = ?1",
        )?;
        let mut rows = stmt.query([transaction_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_transaction(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_user_transactions(
        &self,
        user_id: i64,
        limit: usize,
    ) -> FraudResult<Vec<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT transaction_id, user_id, amount, currency, transaction_type, merchant_id,
                    timestamp, payment_method, ip_address, device_fingerprint, location_data,
                    transaction_status
             FROM transactions WHERE user_id = ?1
             ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let txs = stmt
            .query_map(params![user_id, limit as i64], Self::row_to_transaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(txs)
    }

    pub fn get_recent_transactions(&self, limit: usize) -> FraudResult<Vec<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT transaction_id, user_id, amount, currency, transaction_type, merchant_id,
                    timestamp, payment_method, ip_address, device_fingerprint, location_data,
                    transaction_status
             FROM transactions ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let txs = stmt
            .query_map([limit as i64], Self::row_to_transaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(txs)
    }

    /// Slim per-user history for velocity analysis, newest first, bounded
    /// to the last `days` days.
    pub fn get_user_history(&self, user_id: i64, days: i64) -> FraudResult<Vec<HistoryEntry>> {
        let now = Utc::now();
        let cutoff = now - Duration::days(days);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT transaction_id, amount, timestamp, merchant_id, payment_method
             FROM transactions
             WHERE user_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp DESC",
        )?;
        let entries = stmt
            .query_map(params![user_id, format_ts(&cutoff), format_ts(&now)], |row| {
                let ts: String = row.get(2)?;
                Ok(HistoryEntry {
                    transaction_id: row.get(0)?,
                    amount: row.get(1)?,
                    timestamp: parse_ts(&ts).unwrap_or_else(Utc::now),
                    merchant_id: row.get(3)?,
                    payment_method: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ---- assessments ----

    pub fn save_assessment(
        &self,
        transaction_id: &str,
        analysis: &FraudAnalysis,
    ) -> FraudResult<i64> {
        let conn = self.conn.lock();
        Self::insert_assessment(&conn, transaction_id, analysis)
    }

    fn insert_assessment(
        conn: &Connection,
        transaction_id: &str,
        analysis: &FraudAnalysis,
    ) -> FraudResult<i64> {
        let factors_json = serde_json::to_string(&analysis.risk_factors)
            .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?;
        conn.execute(
            "INSERT INTO fraud_assessments
             (transaction_id, fraud_score, risk_factors, model_version, decision,
              confidence_level, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                transaction_id,
                analysis.fraud_score,
                factors_json,
                analysis.model_version,
                analysis.decision.as_str(),
                analysis.confidence_level,
                analysis.processed_at,
            ],
        )
        .map_err(|e| match FraudError::from(e) {
            FraudError::Conflict(_) => {
                FraudError::Conflict(format!("assessment for {transaction_id}"))
            }
            other => other,
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_assessment(&self, transaction_id: &str) -> FraudResult<Option<FraudAssessment>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT assessment_id, transaction_id, fraud_score, risk_factors, model_version,
                    decision, confidence_level, processed_at
             FROM fraud_assessments WHERE transaction_id = ?1",
        )?;
        let mut rows = stmt.query([transaction_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_assessment(row)?)),
            None => Ok(None),
        }
    }

    /// The atomic unit of work for one scored submission:
    /// insert transaction, insert assessment, set the final status, write
    /// the updated risk profile. All or nothing.
    pub fn commit_submission(
        &self,
        tx: &Transaction,
        analysis: &FraudAnalysis,
        status: TransactionStatus,
        profile: &RiskProfile,
    ) -> FraudResult<i64> {
        let mut conn = self.conn.lock();
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        Self::insert_transaction(&db_tx, tx)?;
        let assessment_id = Self::insert_assessment(&db_tx, &tx.transaction_id, analysis)?;

        db_tx.execute(
            "UPDATE transactions SET transaction_status = ?1 WHERE transaction_id = ?2",
            params![status.as_str(), tx.transaction_id],
        )?;

        let profile_json = serde_json::to_string(profile)
            .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?;
        let changed = db_tx.execute(
            "UPDATE users SET risk_profile = ?1 WHERE user_id = ?2",
            params![profile_json, tx.user_id],
        )?;
        if changed == 0 {
            // Dropping db_tx rolls everything back.
            return Err(FraudError::NotFound(format!("user {}", tx.user_id)));
        }

        db_tx.commit()?;
        Ok(assessment_id)
    }

    // ---- rules ----

    pub fn get_active_rules(&self) -> FraudResult<Vec<FraudRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT rule_id, rule_name, rule_description, rule_logic, weight, is_active,
                    created_at
             FROM fraud_rules WHERE is_active = 1 ORDER BY rule_id",
        )?;
        let rules = stmt
            .query_map([], Self::row_to_rule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn list_rules(&self) -> FraudResult<Vec<FraudRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT rule_id, rule_name, rule_description, rule_logic, weight, is_active,
                    created_at
             FROM fraud_rules ORDER BY rule_id",
        )?;
        let rules = stmt
            .query_map([], Self::row_to_rule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn create_rule(&self, rule: &NewFraudRule) -> FraudResult<FraudRule> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let logic_json = serde_json::to_string(&rule.rule_logic)
            .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?;
        conn.execute(
            "INSERT INTO fraud_rules
             (rule_name, rule_description, rule_logic, weight, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rule.rule_name,
                rule.rule_description,
                logic_json,
                rule.weight,
                rule.is_active,
                format_ts(&now),
            ],
        )
        .map_err(|e| match FraudError::from(e) {
            FraudError::Conflict(_) => FraudError::Conflict(format!("rule {}", rule.rule_name)),
            other => other,
        })?;
        let rule_id = conn.last_insert_rowid();
        info!(rule_id, rule_name = %rule.rule_name, "Created fraud rule");

        Ok(FraudRule {
            rule_id,
            rule_name: rule.rule_name.clone(),
            rule_description: rule.rule_description.clone(),
            rule_logic: rule.rule_logic.clone(),
            weight: rule.weight,
            is_active: rule.is_active,
            created_at: now,
        })
    }

    pub fn update_rule(&self, rule_id: i64, patch: &RulePatch) -> FraudResult<FraudRule> {
        let mut conn = self.conn.lock();
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut rule = {
            let mut stmt = db_tx.prepare_cached(
                "SELECT rule_id, rule_name, rule_description, rule_logic, weight, is_active,
                        created_at
                 FROM fraud_rules WHERE rule_id = ?1",
            )?;
            let mut rows = stmt.query([rule_id])?;
            match rows.next()? {
                Some(row) => Self::row_to_rule(row)?,
                None => return Err(FraudError::NotFound(format!("rule {rule_id}"))),
            }
        };

        if let Some(description) = &patch.rule_description {
            rule.rule_description = description.clone();
        }
        if let Some(logic) = &patch.rule_logic {
            rule.rule_logic = logic.clone();
        }
        if let Some(weight) = patch.weight {
            rule.weight = weight;
        }
        if let Some(is_active) = patch.is_active {
            rule.is_active = is_active;
        }

        let logic_json = serde_json::to_string(&rule.rule_logic)
            .map_err(|e| FraudError::StoreUnavailable(e.to_string()))?;
        db_tx.execute(
            "UPDATE fraud_rules
             SET rule_description = ?1, rule_logic = ?2, weight = ?3, is_active = ?4
             WHERE rule_id = ?5",
            params![
                rule.rule_description,
                logic_json,
                rule.weight,
                rule.is_active,
                rule_id
            ],
        )?;
        db_tx.commit()?;

        Ok(rule)
    }

    pub fn deactivate_rule(&self, rule_id: i64) -> FraudResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE fraud_rules SET is_active = 0 WHERE rule_id = ?1",
            [rule_id],
        )?;
        if changed == 0 {
            return Err(FraudError::NotFound(format!("rule {rule_id}")));
        }
        Ok(())
    }

    // ---- analytics / admin ----

    pub fn get_transaction_stats(&self) -> FraudResult<TransactionStats> {
        let conn = self.conn.lock();

        let total_transactions: i64 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

        let (total_assessments, approved, declined, review, avg_score): (
            i64,
            i64,
            i64,
            i64,
            f64,
        ) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(decision = 'APPROVE'), 0),
                    COALESCE(SUM(decision = 'DECLINE'), 0),
                    COALESCE(SUM(decision = 'REVIEW'), 0),
                    COALESCE(AVG(fraud_score), 0.0)
             FROM fraud_assessments",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        let approval_rate = if total_assessments > 0 {
            (approved as f64 / total_assessments as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Ok(TransactionStats {
            total_transactions: total_transactions as u64,
            total_assessments: total_assessments as u64,
            approved: approved as u64,
            declined: declined as u64,
            review: review as u64,
            approval_rate,
            average_fraud_score: (avg_score * 1000.0).round() / 1000.0,
        })
    }

    /// Trend slice over the most recent `limit` assessments: decision
    /// distribution, high-risk count, and the mean score of the newest
    /// `recent_window` of them.
    pub fn get_fraud_trends(
        &self,
        limit: usize,
        recent_window: usize,
    ) -> FraudResult<FraudTrends> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT decision, fraud_score FROM fraud_assessments
             ORDER BY processed_at DESC LIMIT ?1",
        )?;
        let rows: Vec<(String, f64)> = stmt
            .query_map([limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut distribution = DecisionDistribution {
            approve: 0,
            decline: 0,
            review: 0,
        };
        let mut high_risk = 0u64;
        for (decision, score) in &rows {
            match Decision::from_str(decision) {
                Some(Decision::Approve) => distribution.approve += 1,
                Some(Decision::Decline) => distribution.decline += 1,
                Some(Decision::Review) | None => distribution.review += 1,
            }
            if *score > 0.7 {
                high_risk += 1;
            }
        }

        let window = rows.len().min(recent_window);
        let recent_avg_score = if window > 0 {
            rows[..window].iter().map(|(_, s)| s).sum::<f64>() / window as f64
        } else {
            0.0
        };

        Ok(FraudTrends {
            recent_avg_score: (recent_avg_score * 10_000.0).round() / 10_000.0,
            decision_distribution: distribution,
            high_risk_transactions: high_risk,
            total_analyzed: rows.len() as u64,
        })
    }

    /// Purge transactions and assessments. Admin / test use only.
    pub fn clear_transactions(&self) -> FraudResult<()> {
        let mut conn = self.conn.lock();
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        db_tx.execute("DELETE FROM fraud_assessments", [])?;
        db_tx.execute("DELETE FROM transactions", [])?;
        db_tx.commit()?;
        info!("🗑️  All transactions cleared");
        Ok(())
    }

    // ---- row mappers ----

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let created_at: String = row.get(3)?;
        let last_login: Option<String> = row.get(4)?;
        let profile_json: String = row.get(6)?;
        let risk_profile: RiskProfile = serde_json::from_str(&profile_json)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        Ok(User {
            user_id: row.get(0)?,
            email: row.get(1)?,
            phone_number: row.get(2)?,
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
            last_login: last_login.as_deref().and_then(parse_ts),
            status: row.get(5)?,
            risk_profile,
        })
    }

    fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        let ts: String = row.get(6)?;
        let location_json: Option<String> = row.get(10)?;
        let location_data = match location_json {
            Some(json) => Some(
                serde_json::from_str(&json)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            ),
            None => None,
        };
        let status: String = row.get(11)?;

        Ok(Transaction {
            transaction_id: row.get(0)?,
            user_id: row.get(1)?,
            amount: row.get(2)?,
            currency: row.get(3)?,
            transaction_type: row.get(4)?,
            merchant_id: row.get(5)?,
            timestamp: parse_ts(&ts).unwrap_or_else(Utc::now),
            payment_method: row.get(7)?,
            ip_address: row.get(8)?,
            device_fingerprint: row.get(9)?,
            location_data,
            transaction_status: TransactionStatus::from_str(&status)
                .unwrap_or(TransactionStatus::Pending),
        })
    }

    fn row_to_assessment(row: &rusqlite::Row) -> rusqlite::Result<FraudAssessment> {
        let factors_json: String = row.get(3)?;
        let risk_factors = serde_json::from_str(&factors_json)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let decision: String = row.get(5)?;
        let processed_at: String = row.get(7)?;

        Ok(FraudAssessment {
            assessment_id: row.get(0)?,
            transaction_id: row.get(1)?,
            fraud_score: row.get(2)?,
            risk_factors,
            model_version: row
                .get::<_, Option<String>>(4)?
                .unwrap_or_else(|| "unknown".to_string()),
            decision: Decision::from_str(&decision).unwrap_or(Decision::Review),
            confidence_level: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
            processed_at: parse_ts(&processed_at).unwrap_or_else(Utc::now),
        })
    }

    fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<FraudRule> {
        let logic_json: String = row.get(3)?;
        let rule_logic = serde_json::from_str(&logic_json)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let created_at: String = row.get(6)?;

        Ok(FraudRule {
            rule_id: row.get(0)?,
            rule_name: row.get(1)?,
            rule_description: row.get(2)?,
            rule_logic,
            weight: row.get(4)?,
            is_active: row.get::<_, i64>(5)? != 0,
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
        })
    }
}
