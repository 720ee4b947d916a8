use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Keys are tracked per operation: the same client key used for an initiate
/// and for a refund are two unrelated bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyScope {
    Initiate,
    Process,
    Cancel,
    Refund,
}

impl IdempotencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyScope::Initiate => "INITIATE",
            IdempotencyScope::Process => "PROCESS",
            IdempotencyScope::Cancel => "CANCEL",
            IdempotencyScope::Refund => "REFUND",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub scope: IdempotencyScope,
    pub key: String,
    pub payment_id: Uuid,
    pub request_hash: String,
    pub created_at: DateTime<Utc>,
}
