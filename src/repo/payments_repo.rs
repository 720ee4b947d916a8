use crate::domain::idempotency::{IdempotencyRecord, IdempotencyScope};
use crate::domain::outbox::NewOutboxRecord;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::repo::outbox_repo::OutboxRepo;
use crate::repo::{PaymentStore, StoreTx};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = r#"
    payment_id, customer_id, merchant_id, amount, currency, description, status,
    idempotency_key, refunded_amount, error_code, error_message, created_at, updated_at
"#;

#[derive(Clone)]
pub struct PaymentsRepo {
    pub pool: PgPool,
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PaymentStore for PaymentsRepo {
    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("SELECT {} FROM payments WHERE payment_id = $1", PAYMENT_COLUMNS))
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| map_payment(&r)).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        scope: IdempotencyScope,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT payment_id, request_hash, created_at
            FROM idempotency_keys
            WHERE scope = $1 AND idempotency_key = $2
            "#,
        )
        .bind(scope.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| IdempotencyRecord {
            scope,
            key: key.to_string(),
            payment_id: r.get("payment_id"),
            request_hash: r.get("request_hash"),
            created_at: r.get("created_at"),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn lock_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(|r| map_payment(&r)).transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, customer_id, merchant_id, amount, currency, description, status,
                idempotency_key, refunded_amount, error_code, error_message, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            "#,
        )
        .bind(payment.payment_id)
        .bind(&payment.customer_id)
        .bind(&payment.merchant_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.description)
        .bind(payment.status.as_str())
        .bind(&payment.idempotency_key)
        .bind(payment.refunded_amount)
        .bind(&payment.error_code)
        .bind(&payment.error_message)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE payments SET
                merchant_id = $2, amount = $3, description = $4, status = $5,
                refunded_amount = $6, error_code = $7, error_message = $8, updated_at = $9
            WHERE payment_id = $1
            "#,
        )
        .bind(payment.payment_id)
        .bind(&payment.merchant_id)
        .bind(payment.amount)
        .bind(&payment.description)
        .bind(payment.status.as_str())
        .bind(payment.refunded_amount)
        .bind(&payment.error_code)
        .bind(&payment.error_message)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if res.rows_affected() != 1 {
            return Err(anyhow!("payment {} vanished during update", payment.payment_id));
        }
        Ok(())
    }

    async fn bind_idempotency_key(&mut self, record: &IdempotencyRecord) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (scope, idempotency_key, payment_id, request_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (scope, idempotency_key) DO NOTHING
            "#,
        )
        .bind(record.scope.as_str())
        .bind(&record.key)
        .bind(record.payment_id)
        .bind(&record.request_hash)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn insert_outbox(&mut self, record: &NewOutboxRecord) -> Result<i64> {
        OutboxRepo::insert_tx(&mut self.tx, record).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn map_payment(r: &PgRow) -> Result<Payment> {
    let status: String = r.get("status");
    Ok(Payment {
        payment_id: r.get("payment_id"),
        customer_id: r.get("customer_id"),
        merchant_id: r.get("merchant_id"),
        amount: r.get("amount"),
        currency: r.get("currency"),
        description: r.get("description"),
        status: PaymentStatus::parse(&status).ok_or_else(|| anyhow!("unknown payment status {}", status))?,
        idempotency_key: r.get("idempotency_key"),
        refunded_amount: r.get("refunded_amount"),
        error_code: r.get("error_code"),
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}
