use crate::error::{ErrorCode, PaymentError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod http;

pub const USER_SERVICE: &str = "user-service";
pub const QR_CODE_SERVICE: &str = "qr-code-service";
pub const WALLET_SERVICE: &str = "wallet-service";

/// Outcome of a failed call to a downstream collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The collaborator understood the request and refused it.
    #[error("{code}: {message}")]
    Rejected { code: ErrorCode, message: String },

    /// Timeouts, connection failures and 5xx replies.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Raised locally by the breaker; the network was never touched.
    #[error("circuit open for {dependency}")]
    CircuitOpen { dependency: String },
}

impl CallError {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        CallError::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }

    /// Only infrastructure failures feed the breaker's failure rate.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }
}

impl From<CallError> for PaymentError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Rejected { code, message } => PaymentError::Rejected { code, message },
            CallError::CircuitOpen { dependency } => PaymentError::ServiceUnavailable { dependency },
            CallError::Transient(message) => {
                tracing::warn!("downstream call exhausted retries: {}", message);
                PaymentError::ServiceUnavailable {
                    dependency: "downstream service".to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QrStatus {
    Active,
    Expired,
    Used,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrToken {
    pub payment_id: Uuid,
    pub status: QrStatus,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(false)` when the user exists but is inactive or fails conditions.
    async fn validate_conditions(&self, user_id: &str) -> Result<bool, CallError>;
}

#[async_trait]
pub trait QrCodeService: Send + Sync {
    async fn validate(&self, code: &str) -> Result<QrToken, CallError>;
}

#[async_trait]
pub trait WalletService: Send + Sync {
    /// Fails with `Rejected { code: InsufficientBalance, .. }` when the
    /// available balance does not cover `amount`.
    async fn deduct(&self, user_id: &str, amount: Decimal) -> Result<(), CallError>;

    async fn credit(&self, user_id: &str, amount: Decimal, reason: &str) -> Result<(), CallError>;
}
