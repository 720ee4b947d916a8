use crate::domain::event::PaymentEvent;
use crate::domain::outbox::NewOutboxRecord;
use crate::repo::StoreTx;
use crate::trace;
use anyhow::Result;

/// Appends `event` to the outbox inside `tx`, the same transaction that
/// mutates the payment. Captures the current trace context so delivery can be
/// linked back to the originating request. Never touches the network.
pub async fn append(tx: &mut dyn StoreTx, event: &PaymentEvent) -> Result<i64> {
    let record = NewOutboxRecord {
        payment_id: event.payment_id(),
        event_type: event.event_type().as_str().to_string(),
        payload_json: serde_json::to_value(event)?,
        trace_context: trace::current().map(|ctx| ctx.to_string()),
    };
    let id = tx.insert_outbox(&record).await?;
    tracing::debug!(
        outbox_id = id,
        event_type = %record.event_type,
        payment_id = %record.payment_id,
        "outbox event appended"
    );
    Ok(id)
}
