use crate::domain::idempotency::{IdempotencyRecord, IdempotencyScope};
use crate::domain::payment::Payment;
use crate::error::PaymentError;
use crate::repo::{PaymentStore, StoreTx};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Looks up client keys before a use case runs and binds them inside the
/// use case's transaction.
#[derive(Clone)]
pub struct IdempotencyGuard {
    pub store: Arc<dyn PaymentStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Read-only, no lock. `Ok(Some(_))` means the request was already
    /// served and its payment must be returned without re-running anything.
    ///
    /// `target` is the payment the request addresses, when it addresses one.
    pub async fn resolve(
        &self,
        scope: IdempotencyScope,
        key: Option<&str>,
        request_hash: &str,
        target: Option<Uuid>,
    ) -> Result<Option<Payment>, PaymentError> {
        let Some(key) = key else {
            return Ok(None);
        };
        let Some(found) = self.store.find_by_idempotency_key(scope, key).await? else {
            return Ok(None);
        };

        if found.request_hash != request_hash {
            return Err(PaymentError::DuplicateRequest(format!(
                "idempotency key {} was used with a different request",
                key
            )));
        }
        if target.is_some_and(|id| id != found.payment_id) {
            return Err(PaymentError::DuplicateRequest(format!(
                "idempotency key {} is bound to another payment",
                key
            )));
        }

        let payment = self
            .store
            .find_by_id(found.payment_id)
            .await?
            .ok_or(PaymentError::NotFound(found.payment_id))?;
        tracing::info!(
            scope = scope.as_str(),
            payment_id = %payment.payment_id,
            "replaying idempotent request"
        );
        Ok(Some(payment))
    }

    /// Binds `key` to `payment_id` in `tx`. `Ok(false)` means a concurrent
    /// request won the key; the caller must roll back and replay.
    pub async fn bind(
        tx: &mut dyn StoreTx,
        scope: IdempotencyScope,
        key: Option<&str>,
        request_hash: &str,
        payment_id: Uuid,
    ) -> Result<bool, PaymentError> {
        let Some(key) = key else {
            return Ok(true);
        };
        let record = IdempotencyRecord {
            scope,
            key: key.to_string(),
            payment_id,
            request_hash: request_hash.to_string(),
            created_at: chrono::Utc::now(),
        };
        Ok(tx.bind_idempotency_key(&record).await?)
    }
}

/// SHA-256 over the canonical JSON of the request, plus the addressed
/// payment id when there is one.
pub fn request_hash<T: Serialize>(req: &T, target: Option<Uuid>) -> String {
    let body = serde_json::to_string(req).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    if let Some(id) = target {
        hasher.update(id.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
