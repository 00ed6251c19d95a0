//! Paystack webhook adapter.
//!
//! Deliveries are signed with `x-paystack-signature`: the hex HMAC-SHA512
//! of the raw request body under the account secret key. Amounts arrive
//! in kobo and are converted to major units before intake.

use crate::errors::{FraudError, FraudResult};
use crate::intake::IntakeService;
use crate::models::SubmitRequest;
use crate::store::FraudStore;
use crate::webhooks::resolve_user_id;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use tracing::{info, warn};

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Deserialize)]
struct Event {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    reference: Option<String>,
    #[serde(default)]
    amount: f64,
    currency: Option<String>,
    channel: Option<String>,
    ip_address: Option<String>,
    #[serde(default)]
    customer: Customer,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Customer {
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferData {
    transfer_code: Option<String>,
    reference: Option<String>,
    #[serde(default)]
    amount: f64,
    currency: Option<String>,
}

/// Verify the delivery signature. Constant-time on the digest comparison;
/// a missing or undecodable signature fails outright.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

pub async fn handle(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
    store: &FraudStore,
    intake: &IntakeService,
) -> FraudResult<serde_json::Value> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let verified = match secret {
        Some(secret) => verify_signature(secret, body, signature),
        None => false,
    };
    if !verified {
        warn!("Invalid Paystack webhook signature");
        return Err(FraudError::SignatureInvalid);
    }

    let event: Event = serde_json::from_slice(body)
        .map_err(|e| FraudError::Validation(format!("Malformed webhook payload: {e}")))?;
    info!(event = %event.event, "Processing Paystack webhook");

    match event.event.as_str() {
        // payment-success
        "charge.success" => {
            let request = charge_to_request(store, event.data)?;
            let result = intake.submit(request).await?;
            Ok(serde_json::json!({
                "status": "success",
                "message": "Payment processed successfully",
                "transaction_id": result.transaction_id,
                "fraud_decision": result.fraud_analysis.decision,
                "fraud_score": result.fraud_analysis.fraud_score,
            }))
        }
        // payment-failure: logged, nothing to score.
        "charge.failed" => {
            let reference = event
                .data
                .get("reference")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            info!(reference, "Payment failed");
            Ok(serde_json::json!({
                "status": "success",
                "message": "Failed payment logged",
                "transaction_id": reference,
            }))
        }
        // transfer-success
        "transfer.success" => {
            let request = transfer_to_request(event.data)?;
            let result = intake.submit(request).await?;
            Ok(serde_json::json!({
                "status": "success",
                "message": "Transfer processed successfully",
                "transaction_id": result.transaction_id,
            }))
        }
        // transfer-failure: logged, nothing to score.
        "transfer.failed" => {
            let reference = event
                .data
                .get("transfer_code")
                .or_else(|| event.data.get("reference"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            info!(reference, "Transfer failed");
            Ok(serde_json::json!({
                "status": "success",
                "message": "Failed transfer logged",
                "transaction_id": reference,
            }))
        }
        other => {
            info!(event = other, "Unhandled Paystack event");
            Ok(serde_json::json!({
                "status": "ignored",
                "message": format!("Event {other} not handled"),
            }))
        }
    }
}

fn charge_to_request(
    store: &FraudStore,
    data: serde_json::Value,
) -> FraudResult<SubmitRequest> {
    let charge: ChargeData = serde_json::from_value(data)
        .map_err(|e| FraudError::Validation(format!("Malformed charge data: {e}")))?;

    let user_id = resolve_user_id(
        store,
        charge.customer.email.as_deref(),
        charge.customer.phone.as_deref(),
    )?;

    Ok(SubmitRequest {
        transaction_id: charge.reference,
        user_id: Some(user_id),
        // Kobo -> major units.
        amount: Some(charge.amount / 100.0),
        currency: Some(charge.currency.unwrap_or_else(|| "NGN".to_string())),
        transaction_type: Some("payment".to_string()),
        merchant_id: Some("PAYSTACK".to_string()),
        payment_method: charge.channel.or_else(|| Some("card".to_string())),
        ip_address: charge.ip_address,
        device_fingerprint: charge.metadata.device_id,
        email: charge.customer.email,
        phone: charge.customer.phone,
        ..Default::default()
    })
}

fn transfer_to_request(data: serde_json::Value) -> FraudResult<SubmitRequest> {
    let transfer: TransferData = serde_json::from_value(data)
        .map_err(|e| FraudError::Validation(format!("Malformed transfer data: {e}")))?;

    Ok(SubmitRequest {
        transaction_id: transfer.transfer_code.or(transfer.reference),
        user_id: Some(crate::webhooks::DEFAULT_USER_ID),
        amount: Some(transfer.amount / 100.0),
        currency: Some(transfer.currency.unwrap_or_else(|| "NGN".to_string())),
        transaction_type: Some("transfer".to_string()),
        merchant_id: Some("PAYSTACK_TRANSFER".to_string()),
        payment_method: Some("bank_transfer".to_string()),
        ..Default::default()
    })
}
