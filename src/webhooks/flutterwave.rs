//! Flutterwave webhook adapter.
//!
//! Deliveries carry a `verif-hash` header that must equal the configured
//! shared secret. Amounts are already in major units. Card, customer and
//! processor indicators are extracted and forwarded with the intake
//! request.

use crate::errors::{FraudError, FraudResult};
use crate::intake::IntakeService;
use crate::models::SubmitRequest;
use crate::store::FraudStore;
use crate::webhooks::{constant_time_eq, resolve_user_id};
use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::{info, warn};

pub const SIGNATURE_HEADER: &str = "verif-hash";

#[derive(Debug, Deserialize)]
struct Event {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    tx_ref: Option<String>,
    reference: Option<String>,
    #[serde(default)]
    amount: f64,
    currency: Option<String>,
    payment_type: Option<String>,
    ip: Option<String>,
    device_fingerprint: Option<String>,
    processor_response: Option<String>,
    auth_model: Option<String>,
    #[serde(default)]
    customer: Customer,
    #[serde(default)]
    card: Card,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Default, Deserialize)]
struct Customer {
    email: Option<String>,
    phone_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Card {
    #[serde(rename = "type")]
    card_type: Option<String>,
    country: Option<String>,
    issuer: Option<String>,
    first_6digits: Option<String>,
    last_4digits: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    merchant_id: Option<String>,
}

/// The shared-secret check. Constant-time so equal-length probes learn
/// nothing from timing.
pub fn verify_hash(configured: &str, header_value: &str) -> bool {
    constant_time_eq(configured.as_bytes(), header_value.trim().as_bytes())
}

pub async fn handle(
    configured_hash: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
    store: &FraudStore,
    intake: &IntakeService,
) -> FraudResult<serde_json::Value> {
    let header_value = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let verified = match configured_hash {
        Some(secret) => verify_hash(secret, header_value),
        None => false,
    };
    if !verified {
        warn!("Invalid Flutterwave webhook signature");
        return Err(FraudError::SignatureInvalid);
    }

    let event: Event = serde_json::from_slice(body)
        .map_err(|e| FraudError::Validation(format!("Malformed webhook payload: {e}")))?;
    info!(event = %event.event, "Processing Flutterwave webhook");

    match event.event.as_str() {
        "charge.completed" | "transfer.completed" => {
            let is_transfer = event.event.starts_with("transfer");
            let request = charge_to_request(store, event.data, is_transfer)?;
            let result = intake.submit(request).await?;
            Ok(serde_json::json!({
                "status": "success",
                "message": "Flutterwave transaction processed successfully",
                "transaction_id": result.transaction_id,
                "fraud_decision": result.fraud_analysis.decision,
                "fraud_score": result.fraud_analysis.fraud_score,
            }))
        }
        other => {
            info!(event = other, "Unhandled Flutterwave event");
            Ok(serde_json::json!({
                "status": "ignored",
                "message": format!("Event {other} not processed"),
            }))
        }
    }
}

fn charge_to_request(
    store: &FraudStore,
    data: serde_json::Value,
    is_transfer: bool,
) -> FraudResult<SubmitRequest> {
    let charge: ChargeData = serde_json::from_value(data)
        .map_err(|e| FraudError::Validation(format!("Malformed charge data: {e}")))?;

    let user_id = resolve_user_id(
        store,
        charge.customer.email.as_deref(),
        charge.customer.phone_number.as_deref(),
    )?;

    let merchant_id = charge.meta.merchant_id.unwrap_or_else(|| {
        if is_transfer {
            "FLUTTERWAVE_TRANSFER".to_string()
        } else {
            "FLUTTERWAVE".to_string()
        }
    });

    Ok(SubmitRequest {
        transaction_id: charge.tx_ref.or(charge.reference),
        user_id: Some(user_id),
        // Already major units.
        amount: Some(charge.amount),
        currency: Some(charge.currency.unwrap_or_else(|| "NGN".to_string())),
        transaction_type: Some(if is_transfer { "transfer" } else { "payment" }.to_string()),
        merchant_id: Some(merchant_id),
        payment_method: charge
            .payment_type
            .or_else(|| Some(if is_transfer { "bank_transfer" } else { "card" }.to_string())),
        ip_address: charge.ip,
        device_fingerprint: charge.device_fingerprint,
        email: charge.customer.email,
        phone: charge.customer.phone_number,
        card_type: charge.card.card_type,
        card_country: charge.card.country,
        card_issuer: charge.card.issuer,
        card_bin: charge.card.first_6digits,
        card_last4: charge.card.last_4digits,
        processor_response: charge.processor_response,
        auth_model: charge.auth_model,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_check_is_plain_equality() {
        assert!(verify_hash("whsec_1", "whsec_1"));
        assert!(verify_hash("whsec_1", " whsec_1 "));
        assert!(!verify_hash("whsec_1", "whsec_2"));
        assert!(!verify_hash("whsec_1", ""));
    }

    #[test]
    fn charge_maps_indicators_onto_request() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let store = FraudStore::new(temp.path().to_str().unwrap()).unwrap();

        let data = serde_json::json!({
            "tx_ref": "FDS-abc123",
            "amount": 75_000.0,
            "currency": "NGN",
            "payment_type": "card",
            "ip": "105.112.3.9",
            "device_fingerprint": "device_9f",
            "processor_response": "Approved by Financial Institution",
            "auth_model": "PIN",
            "customer": {"email": "test_user_002@example.com", "phone_number": "+2348012345679"},
            "card": {
                "type": "MASTERCARD",
                "country": "NG",
                "issuer": "MASTERCARD CREDIT",
                "first_6digits": "539983",
                "last_4digits": "1234"
            },
            "meta": {"merchant_id": "SHOP_42"}
        });

        let request = charge_to_request(&store, data, false).unwrap();
        assert_eq!(request.transaction_id.as_deref(), Some("FDS-abc123"));
        assert_eq!(request.amount, Some(75_000.0)); // no kobo division
        assert_eq!(request.user_id, Some(2));
        assert_eq!(request.merchant_id.as_deref(), Some("SHOP_42"));
        assert_eq!(request.card_bin.as_deref(), Some("539983"));
        assert_eq!(request.card_last4.as_deref(), Some("1234"));
        assert_eq!(
            request.processor_response.as_deref(),
            Some("Approved by Financial Institution")
        );
        assert_eq!(request.auth_model.as_deref(), Some("PIN"));
    }

    #[test]
    fn transfer_defaults_merchant_and_method() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let store = FraudStore::new(temp.path().to_str().unwrap()).unwrap();

        let data = serde_json::json!({
            "reference": "FLW_TRF_1",
            "amount": 20_000.0
        });
        let request = charge_to_request(&store, data, true).unwrap();
        assert_eq!(request.merchant_id.as_deref(), Some("FLUTTERWAVE_TRANSFER"));
        assert_eq!(request.payment_method.as_deref(), Some("bank_transfer"));
        assert_eq!(request.transaction_type.as_deref(), Some("transfer"));
    }
}
