//! Error taxonomy for the scoring pipeline.
//!
//! Validation and signature failures surface as explicit error responses,
//! store failures abort the current unit of work, and scoring failures
//! degrade to the safe-default assessment instead of aborting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FraudError {
    /// Input failed intake validation. Carries every reason, joined by "; ".
    #[error("{0}")]
    Validation(String),

    /// A required entity (transaction, user, rule) does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Insert collided with an existing row (duplicate transaction id).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient persistence failure; surfaced as a 5xx-equivalent.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Webhook payload failed signature verification.
    #[error("Invalid signature")]
    SignatureInvalid,

    /// Model artifact missing, malformed, or inference failed.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Pipeline deadline elapsed; partial work was rolled back.
    #[error("deadline exceeded")]
    Timeout,

    /// Uncaught failure inside scoring. Handled via the safe-default
    /// assessment (REVIEW, score 0.5), never aborts a submission.
    #[error("scoring failed: {0}")]
    Scoring(String),
}

impl From<rusqlite::Error> for FraudError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => {
                FraudError::NotFound("row".to_string())
            }
            rusqlite::Error::SqliteFailure(inner, _) => match inner.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    FraudError::Conflict(err.to_string())
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    FraudError::NotFound(format!("referenced row ({err})"))
                }
                _ => FraudError::StoreUnavailable(err.to_string()),
            },
            _ => FraudError::StoreUnavailable(err.to_string()),
        }
    }
}

pub type FraudResult<T> = Result<T, FraudError>;
