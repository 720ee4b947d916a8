use crate::domain::payment::PaymentStatus;
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable error vocabulary returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientBalance,
    QrCodeInvalid,
    QrCodeExpired,
    QrCodeMismatch,
    InvalidPaymentState,
    UserValidationFailed,
    WalletServiceError,
    DuplicateRequest,
    RefundExceedsAmount,
    ServiceUnavailable,
    PaymentNotFound,
    InvalidRequest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorCode::QrCodeInvalid => "QR_CODE_INVALID",
            ErrorCode::QrCodeExpired => "QR_CODE_EXPIRED",
            ErrorCode::QrCodeMismatch => "QR_CODE_MISMATCH",
            ErrorCode::InvalidPaymentState => "INVALID_PAYMENT_STATE",
            ErrorCode::UserValidationFailed => "USER_VALIDATION_FAILED",
            ErrorCode::WalletServiceError => "WALLET_SERVICE_ERROR",
            ErrorCode::DuplicateRequest => "DUPLICATE_REQUEST",
            ErrorCode::RefundExceedsAmount => "REFUND_EXCEEDS_AMOUNT",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::PaymentNotFound => "PAYMENT_NOT_FOUND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            ErrorCode::QrCodeInvalid
            | ErrorCode::QrCodeExpired
            | ErrorCode::QrCodeMismatch
            | ErrorCode::UserValidationFailed
            | ErrorCode::RefundExceedsAmount => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::InvalidPaymentState | ErrorCode::DuplicateRequest => StatusCode::CONFLICT,
            ErrorCode::WalletServiceError => StatusCode::BAD_GATEWAY,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::PaymentNotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("cannot {operation} payment {payment_id} in status {status}")]
    InvalidState {
        payment_id: Uuid,
        status: PaymentStatus,
        operation: &'static str,
    },

    #[error("refund of {requested} exceeds original amount {original}")]
    RefundExceedsAmount { requested: Decimal, original: Decimal },

    #[error("{message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("payment {0} not found")]
    NotFound(Uuid),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{dependency} is unavailable")]
    ServiceUnavailable { dependency: String },

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        PaymentError::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PaymentError::InvalidState { .. } => ErrorCode::InvalidPaymentState,
            PaymentError::RefundExceedsAmount { .. } => ErrorCode::RefundExceedsAmount,
            PaymentError::Rejected { code, .. } => *code,
            PaymentError::DuplicateRequest(_) => ErrorCode::DuplicateRequest,
            PaymentError::NotFound(_) => ErrorCode::PaymentNotFound,
            PaymentError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            PaymentError::ServiceUnavailable { .. } | PaymentError::Infrastructure(_) => {
                ErrorCode::ServiceUnavailable
            }
        }
    }

    /// Business errors are client-correctable and are surfaced verbatim.
    pub fn is_business(&self) -> bool {
        !matches!(
            self,
            PaymentError::ServiceUnavailable { .. } | PaymentError::Infrastructure(_)
        )
    }

    pub fn to_http(&self) -> (StatusCode, ErrorEnvelope) {
        let code = self.code();
        let message = match self {
            PaymentError::Infrastructure(e) => {
                tracing::error!("infrastructure failure: {:#}", e);
                "service temporarily unavailable, retry shortly".to_string()
            }
            other => other.to_string(),
        };
        (code.http_status(), err(code, &message))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

pub fn err(code: ErrorCode, message: &str) -> ErrorEnvelope {
    ErrorEnvelope {
        error: ErrorPayload {
            code,
            message: message.to_string(),
            details: None,
        },
    }
}
