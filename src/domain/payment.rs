use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Ready,
    Completed,
    Refunded,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Ready,
        PaymentStatus::Completed,
        PaymentStatus::Refunded,
        PaymentStatus::Cancelled,
        PaymentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Ready => "READY",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Refunded | PaymentStatus::Cancelled | PaymentStatus::Failed
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations that move a payment between statuses. Creation is not listed:
/// it is always allowed and always yields `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOperation {
    MarkReady,
    Process,
    Cancel,
    Refund,
    Fail,
}

impl PaymentOperation {
    pub const ALL: [PaymentOperation; 5] = [
        PaymentOperation::MarkReady,
        PaymentOperation::Process,
        PaymentOperation::Cancel,
        PaymentOperation::Refund,
        PaymentOperation::Fail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOperation::MarkReady => "mark ready",
            PaymentOperation::Process => "process",
            PaymentOperation::Cancel => "cancel",
            PaymentOperation::Refund => "refund",
            PaymentOperation::Fail => "fail",
        }
    }

    /// The status this operation leads to from `from`, or `None` when the
    /// transition is not allowed.
    pub fn next_status(&self, from: PaymentStatus) -> Option<PaymentStatus> {
        use PaymentStatus::*;
        match (self, from) {
            (PaymentOperation::MarkReady, Pending) => Some(Ready),
            (PaymentOperation::Process, Ready) => Some(Completed),
            (PaymentOperation::Cancel, Pending | Ready) => Some(Cancelled),
            (PaymentOperation::Refund, Completed) => Some(Refunded),
            (PaymentOperation::Fail, Pending | Ready | Completed) => Some(Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub customer_id: String,
    pub merchant_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub status: PaymentStatus,
    pub idempotency_key: Option<String>,
    pub refunded_amount: Option<Decimal>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A fresh payment as produced by initiate. The amount stays zero until a
    /// merchant stamps it at processing time.
    pub fn pending(customer_id: &str, currency: &str, idempotency_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            payment_id: Uuid::new_v4(),
            customer_id: customer_id.to_string(),
            merchant_id: None,
            amount: Decimal::ZERO,
            currency: currency.to_string(),
            description: None,
            status: PaymentStatus::Pending,
            idempotency_key,
            refunded_amount: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks the transition guard without mutating.
    pub fn ensure(&self, op: PaymentOperation) -> Result<PaymentStatus, PaymentError> {
        op.next_status(self.status)
            .ok_or(PaymentError::InvalidState {
                payment_id: self.payment_id,
                status: self.status,
                operation: op.as_str(),
            })
    }

    fn apply(&mut self, op: PaymentOperation) -> Result<(), PaymentError> {
        self.status = self.ensure(op)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_ready(&mut self) -> Result<(), PaymentError> {
        self.apply(PaymentOperation::MarkReady)
    }

    pub fn cancel(&mut self) -> Result<(), PaymentError> {
        self.apply(PaymentOperation::Cancel)
    }

    pub fn complete(&mut self, req: &ProcessPaymentRequest) -> Result<(), PaymentError> {
        self.apply(PaymentOperation::Process)?;
        self.merchant_id = Some(req.merchant_id.clone());
        self.amount = req.amount;
        self.description = req.description.clone();
        Ok(())
    }

    /// Status is checked before the amount so a second refund against an
    /// already refunded payment reports the state, whatever its amount.
    pub fn ensure_refundable(&self, amount: Decimal) -> Result<(), PaymentError> {
        self.ensure(PaymentOperation::Refund)?;
        if amount > self.amount {
            return Err(PaymentError::RefundExceedsAmount {
                requested: amount,
                original: self.amount,
            });
        }
        Ok(())
    }

    pub fn refund(&mut self, amount: Decimal) -> Result<(), PaymentError> {
        self.ensure_refundable(amount)?;
        self.apply(PaymentOperation::Refund)?;
        self.refunded_amount = Some(amount);
        Ok(())
    }

    pub fn fail(&mut self, code: &str, message: &str) -> Result<(), PaymentError> {
        self.apply(PaymentOperation::Fail)?;
        self.error_code = Some(code.to_string());
        self.error_message = Some(message.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub customer_id: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentRequest {
    pub qr_code: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundPaymentRequest {
    pub amount: Decimal,
    pub reason: Option<String>,
}
