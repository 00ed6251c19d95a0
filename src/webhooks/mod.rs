//! Webhook adapters for the supported payment providers.
//!
//! Each adapter verifies the provider signature over the raw request
//! body, maps the provider payload onto the intake schema and forwards it
//! to the intake service. A failed verification never reaches intake, and
//! unknown events are logged and ignored.

pub mod flutterwave;
pub mod paystack;

use crate::errors::{FraudError, FraudResult};
use crate::intake::IntakeService;
use crate::store::FraudStore;
use axum::http::HeaderMap;
use std::sync::Arc;
use tracing::warn;

/// Seeded fallback when a provider event carries no usable customer
/// identity.
pub(crate) const DEFAULT_USER_ID: i64 = 1;

pub struct WebhookRouter {
    store: Arc<FraudStore>,
    intake: Arc<IntakeService>,
    paystack_secret: Option<String>,
    flutterwave_hash: Option<String>,
}

impl WebhookRouter {
    pub fn new(
        store: Arc<FraudStore>,
        intake: Arc<IntakeService>,
        paystack_secret: Option<String>,
        flutterwave_hash: Option<String>,
    ) -> Self {
        Self {
            store,
            intake,
            paystack_secret,
            flutterwave_hash,
        }
    }

    /// Dispatch one webhook delivery by provider name.
    pub async fn handle(
        &self,
        provider: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> FraudResult<serde_json::Value> {
        match provider.to_lowercase().as_str() {
            "paystack" => {
                paystack::handle(
                    self.paystack_secret.as_deref(),
                    headers,
                    body,
                    &self.store,
                    &self.intake,
                )
                .await
            }
            "flutterwave" => {
                flutterwave::handle(
                    self.flutterwave_hash.as_deref(),
                    headers,
                    body,
                    &self.store,
                    &self.intake,
                )
                .await
            }
            other => Err(FraudError::Validation(format!(
                "Unsupported gateway: {other}"
            ))),
        }
    }
}

/// Constant-time byte comparison. Inputs of equal length are compared
/// without an early exit; a length mismatch fails immediately, which
/// leaks nothing useful about the secret's content.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Resolve the payer for a provider event: look the user up by email and
/// create on miss, so the id stays stable across events. Events without
/// an identity fall back to the seeded default user.
pub(crate) fn resolve_user_id(
    store: &FraudStore,
    email: Option<&str>,
    phone: Option<&str>,
) -> FraudResult<i64> {
    let Some(email) = email.filter(|e| !e.trim().is_empty()) else {
        warn!("Webhook event carries no customer email, using default user");
        return Ok(DEFAULT_USER_ID);
    };

    if let Some(user) = store.get_user_by_email(email)? {
        return Ok(user.user_id);
    }
    let created = store.create_user(email, phone, None)?;
    Ok(created.user_id)
}
