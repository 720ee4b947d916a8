use crate::domain::payment::Payment;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    PaymentCreated,
    PaymentCompleted,
    PaymentRefunded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PaymentCreated => "PaymentCreated",
            EventType::PaymentCompleted => "PaymentCompleted",
            EventType::PaymentRefunded => "PaymentRefunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PaymentCreated" => Some(EventType::PaymentCreated),
            "PaymentCompleted" | "PaymentProcessed" => Some(EventType::PaymentCompleted),
            "PaymentRefunded" => Some(EventType::PaymentRefunded),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCreatedV1 {
    pub schema_version: u16,
    pub payment_id: Uuid,
    pub customer_id: String,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCompletedV1 {
    pub schema_version: u16,
    pub payment_id: Uuid,
    pub customer_id: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRefundedV1 {
    pub schema_version: u16,
    pub payment_id: Uuid,
    pub customer_id: String,
    pub merchant_id: Option<String>,
    pub original_amount: Decimal,
    pub refunded_amount: Decimal,
    pub currency: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Wire payloads for payment transitions. Consumers deserialize these
/// directly, so fields are only ever added under a new schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum PaymentEvent {
    PaymentCreated(PaymentCreatedV1),
    PaymentCompleted(PaymentCompletedV1),
    PaymentRefunded(PaymentRefundedV1),
}

impl PaymentEvent {
    pub fn created(payment: &Payment) -> Self {
        PaymentEvent::PaymentCreated(PaymentCreatedV1 {
            schema_version: SCHEMA_VERSION,
            payment_id: payment.payment_id,
            customer_id: payment.customer_id.clone(),
            currency: payment.currency.clone(),
            occurred_at: payment.created_at,
        })
    }

    pub fn completed(payment: &Payment) -> Self {
        PaymentEvent::PaymentCompleted(PaymentCompletedV1 {
            schema_version: SCHEMA_VERSION,
            payment_id: payment.payment_id,
            customer_id: payment.customer_id.clone(),
            merchant_id: payment.merchant_id.clone().unwrap_or_default(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            description: payment.description.clone(),
            occurred_at: payment.updated_at,
        })
    }

    pub fn refunded(payment: &Payment, reason: Option<String>) -> Self {
        PaymentEvent::PaymentRefunded(PaymentRefundedV1 {
            schema_version: SCHEMA_VERSION,
            payment_id: payment.payment_id,
            customer_id: payment.customer_id.clone(),
            merchant_id: payment.merchant_id.clone(),
            original_amount: payment.amount,
            refunded_amount: payment.refunded_amount.unwrap_or(payment.amount),
            currency: payment.currency.clone(),
            reason,
            occurred_at: payment.updated_at,
        })
    }

    pub fn event_type(&self) -> EventType {
        match self {
            PaymentEvent::PaymentCreated(_) => EventType::PaymentCreated,
            PaymentEvent::PaymentCompleted(_) => EventType::PaymentCompleted,
            PaymentEvent::PaymentRefunded(_) => EventType::PaymentRefunded,
        }
    }

    pub fn payment_id(&self) -> Uuid {
        match self {
            PaymentEvent::PaymentCreated(e) => e.payment_id,
            PaymentEvent::PaymentCompleted(e) => e.payment_id,
            PaymentEvent::PaymentRefunded(e) => e.payment_id,
        }
    }
}
