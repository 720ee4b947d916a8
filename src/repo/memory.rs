use crate::domain::idempotency::{IdempotencyRecord, IdempotencyScope};
use crate::domain::outbox::{NewOutboxRecord, OutboxRecord, OutboxStatus};
use crate::domain::payment::Payment;
use crate::repo::{OutboxStore, PaymentStore, StoreTx};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    payments: HashMap<Uuid, Payment>,
    keys: HashMap<(IdempotencyScope, String), IdempotencyRecord>,
    outbox: BTreeMap<i64, OutboxRecord>,
    next_outbox_id: i64,
}

/// In-process store with the same contracts as the Postgres repositories.
///
/// A transaction holds the single state lock from `begin` to commit or drop,
/// which is stricter than row locking but gives the same serialization of
/// competing transitions. Writes go to a staged copy so a dropped
/// transaction leaves nothing behind.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payment_count(&self) -> usize {
        self.state.lock().await.payments.len()
    }

    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state.lock().await.outbox.values().cloned().collect()
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&payment_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        scope: IdempotencyScope,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .keys
            .get(&(scope, key.to_string()))
            .cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>> {
        Ok(self.staged.payments.get(&payment_id).cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool> {
        if self.staged.payments.contains_key(&payment.payment_id) {
            return Err(anyhow!("payment {} already exists", payment.payment_id));
        }
        if let Some(key) = payment.idempotency_key.as_deref() {
            let taken = self
                .staged
                .payments
                .values()
                .any(|p| p.idempotency_key.as_deref() == Some(key));
            if taken {
                return Ok(false);
            }
        }
        self.staged.payments.insert(payment.payment_id, payment.clone());
        Ok(true)
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        match self.staged.payments.get_mut(&payment.payment_id) {
            Some(existing) => {
                *existing = payment.clone();
                Ok(())
            }
            None => Err(anyhow!("payment {} vanished during update", payment.payment_id)),
        }
    }

    async fn bind_idempotency_key(&mut self, record: &IdempotencyRecord) -> Result<bool> {
        let slot = (record.scope, record.key.clone());
        if self.staged.keys.contains_key(&slot) {
            return Ok(false);
        }
        self.staged.keys.insert(slot, record.clone());
        Ok(true)
    }

    async fn insert_outbox(&mut self, record: &NewOutboxRecord) -> Result<i64> {
        self.staged.next_outbox_id += 1;
        let id = self.staged.next_outbox_id;
        self.staged.outbox.insert(
            id,
            OutboxRecord {
                id,
                payment_id: record.payment_id,
                event_type: record.event_type.clone(),
                payload_json: record.payload_json.clone(),
                status: OutboxStatus::Pending,
                retry_count: 0,
                last_error: None,
                trace_context: record.trace_context.clone(),
                created_at: Utc::now(),
                claimed_at: None,
                processed_at: None,
            },
        );
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn claim_pending(&self, batch_size: i64) -> Result<Vec<OutboxRecord>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let limit = batch_size.max(0) as usize;
        let mut claimed = Vec::new();
        for record in state.outbox.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if record.status == OutboxStatus::Pending {
                record.status = OutboxStatus::Processing;
                record.claimed_at = Some(now);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.outbox.get_mut(&id).ok_or_else(|| anyhow!("outbox record {} not found", id))?;
        record.status = OutboxStatus::Completed;
        record.processed_at = Some(Utc::now());
        record.last_error = None;
        Ok(())
    }

    async fn mark_retry(&self, id: i64, retry_count: i32, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.outbox.get_mut(&id).ok_or_else(|| anyhow!("outbox record {} not found", id))?;
        record.status = OutboxStatus::Pending;
        record.retry_count = retry_count;
        record.last_error = Some(error.to_string());
        record.claimed_at = None;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, retry_count: i32, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.outbox.get_mut(&id).ok_or_else(|| anyhow!("outbox record {} not found", id))?;
        record.status = OutboxStatus::Failed;
        record.retry_count = retry_count;
        record.last_error = Some(error.to_string());
        record.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn release_stale(&self, older_than_secs: i64) -> Result<u64> {
        let mut state = self.state.lock().await;
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs);
        let mut released = 0;
        for record in state.outbox.values_mut() {
            if record.status == OutboxStatus::Processing && record.claimed_at.is_some_and(|t| t < cutoff) {
                record.status = OutboxStatus::Pending;
                record.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn list_by_status(&self, status: OutboxStatus, limit: i64) -> Result<Vec<OutboxRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .values()
            .filter(|r| r.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_for_payment(&self, payment_id: Uuid) -> Result<Vec<OutboxRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .values()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn requeue_failed(&self, id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.outbox.get_mut(&id) {
            Some(record) if record.status == OutboxStatus::Failed => {
                record.status = OutboxStatus::Pending;
                record.retry_count = 0;
                record.claimed_at = None;
                record.processed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
