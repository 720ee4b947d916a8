//! Storage seams. The Postgres repositories are the production
//! implementations; [`memory::MemoryStore`] implements the same contracts
//! in process.

use crate::domain::idempotency::{IdempotencyRecord, IdempotencyScope};
use crate::domain::outbox::{NewOutboxRecord, OutboxRecord, OutboxStatus};
use crate::domain::payment::Payment;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;
pub mod outbox_repo;
pub mod payments_repo;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<Payment>>;

    async fn find_by_idempotency_key(
        &self,
        scope: IdempotencyScope,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Opens a local transaction. Dropping the returned handle without
    /// calling [`StoreTx::commit`] rolls everything back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// A scoped transaction over payments, idempotency keys and the outbox.
#[async_trait]
pub trait StoreTx: Send {
    /// Loads the payment and holds its row lock until commit or rollback.
    async fn lock_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>>;

    /// `false` when another payment already carries the same idempotency key.
    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<()>;

    /// Returns `false` when the `(scope, key)` pair is already bound.
    async fn bind_idempotency_key(&mut self, record: &IdempotencyRecord) -> Result<bool>;

    async fn insert_outbox(&mut self, record: &NewOutboxRecord) -> Result<i64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `batch_size` PENDING records, oldest first, skipping rows
    /// another relay holds, and flips them to PROCESSING.
    async fn claim_pending(&self, batch_size: i64) -> Result<Vec<OutboxRecord>>;

    async fn mark_completed(&self, id: i64) -> Result<()>;

    /// Back to PENDING for a later tick.
    async fn mark_retry(&self, id: i64, retry_count: i32, error: &str) -> Result<()>;

    /// Terminal; only an operator requeue brings the record back.
    async fn mark_failed(&self, id: i64, retry_count: i32, error: &str) -> Result<()>;

    /// Returns PROCESSING records claimed more than `older_than_secs` ago to
    /// PENDING. Covers relays that died mid-batch.
    async fn release_stale(&self, older_than_secs: i64) -> Result<u64>;

    async fn list_by_status(&self, status: OutboxStatus, limit: i64) -> Result<Vec<OutboxRecord>>;

    async fn list_for_payment(&self, payment_id: Uuid) -> Result<Vec<OutboxRecord>>;

    /// FAILED → PENDING with the retry count reset. Returns `false` if the
    /// record is missing or not FAILED.
    async fn requeue_failed(&self, id: i64) -> Result<bool>;
}
