use crate::domain::outbox::{NewOutboxRecord, OutboxRecord, OutboxStatus};
use crate::repo::OutboxStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const OUTBOX_COLUMNS: &str = r#"
    id, payment_id, event_type, payload_json, status, retry_count, last_error,
    trace_context, created_at, claimed_at, processed_at
"#;

#[derive(Clone)]
pub struct OutboxRepo {
    pub pool: PgPool,
}

impl OutboxRepo {
    /// Appends inside the caller's transaction; never commits on its own.
    pub async fn insert_tx(tx: &mut Transaction<'_, Postgres>, record: &NewOutboxRecord) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO payment_outbox (payment_id, event_type, payload_json, status, retry_count, trace_context)
            VALUES ($1, $2, $3, 'PENDING', 0, $4)
            RETURNING id
            "#,
        )
        .bind(record.payment_id)
        .bind(&record.event_type)
        .bind(&record.payload_json)
        .bind(&record.trace_context)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("id"))
    }
}

#[async_trait]
impl OutboxStore for OutboxRepo {
    async fn claim_pending(&self, batch_size: i64) -> Result<Vec<OutboxRecord>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM payment_outbox
            WHERE status = 'PENDING'
            ORDER BY id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.get("id")).collect();
        let claimed = sqlx::query(&format!(
            r#"
            UPDATE payment_outbox SET status = 'PROCESSING', claimed_at = now()
            WHERE id = ANY($1)
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut records = claimed.iter().map(map_record).collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn mark_completed(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE payment_outbox SET status = 'COMPLETED', processed_at = now(), last_error = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retry(&self, id: i64, retry_count: i32, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE payment_outbox SET status = 'PENDING', retry_count = $2, last_error = $3, claimed_at = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(retry_count)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, retry_count: i32, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE payment_outbox SET status = 'FAILED', retry_count = $2, last_error = $3, processed_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(retry_count)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_stale(&self, older_than_secs: i64) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE payment_outbox SET status = 'PENDING', claimed_at = NULL
            WHERE status = 'PROCESSING' AND claimed_at < now() - make_interval(secs => $1::float8)
            "#,
        )
        .bind(older_than_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn list_by_status(&self, status: OutboxStatus, limit: i64) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_outbox WHERE status = $1 ORDER BY id ASC LIMIT $2",
            OUTBOX_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_record).collect()
    }

    async fn list_for_payment(&self, payment_id: Uuid) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_outbox WHERE payment_id = $1 ORDER BY id ASC",
            OUTBOX_COLUMNS
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_record).collect()
    }

    async fn requeue_failed(&self, id: i64) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE payment_outbox
            SET status = 'PENDING', retry_count = 0, claimed_at = NULL, processed_at = NULL
            WHERE id = $1 AND status = 'FAILED'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}

fn map_record(r: &PgRow) -> Result<OutboxRecord> {
    let status: String = r.get("status");
    Ok(OutboxRecord {
        id: r.get("id"),
        payment_id: r.get("payment_id"),
        event_type: r.get("event_type"),
        payload_json: r.get("payload_json"),
        status: OutboxStatus::parse(&status).ok_or_else(|| anyhow!("unknown outbox status {}", status))?,
        retry_count: r.get("retry_count"),
        last_error: r.get("last_error"),
        trace_context: r.get("trace_context"),
        created_at: r.get("created_at"),
        claimed_at: r.get("claimed_at"),
        processed_at: r.get("processed_at"),
    })
}
