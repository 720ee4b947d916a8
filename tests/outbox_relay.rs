mod common;

use common::{Harness, RecordingBus};
use payment_orchestrator::domain::event::PaymentEvent;
use payment_orchestrator::domain::outbox::{NewOutboxRecord, OutboxStatus};
use payment_orchestrator::domain::payment::{InitiatePaymentRequest, Payment};
use payment_orchestrator::repo::memory::MemoryStore;
use payment_orchestrator::repo::{OutboxStore, PaymentStore};
use payment_orchestrator::service::outbox_relay::{OutboxRelay, RelayConfig};
use payment_orchestrator::service::outbox_writer;
use payment_orchestrator::trace::{self, TraceContext};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn relay(store: &MemoryStore, bus: Arc<RecordingBus>, batch_size: i64) -> OutboxRelay {
    OutboxRelay {
        outbox: Arc::new(store.clone()),
        bus,
        config: RelayConfig {
            poll_interval: Duration::from_millis(10),
            batch_size,
            max_retries: 3,
            publish_timeout: Duration::from_millis(200),
            stale_after_secs: 60,
        },
    }
}

async fn seed(store: &MemoryStore, n: usize) -> Vec<Payment> {
    let mut seeded = Vec::new();
    for i in 0..n {
        let payment = Payment::pending(&format!("cust-{}", i), "USD", None);
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_payment(&payment).await.unwrap());
        outbox_writer::append(&mut *tx, &PaymentEvent::created(&payment)).await.unwrap();
        tx.commit().await.unwrap();
        seeded.push(payment);
    }
    seeded
}

#[tokio::test]
async fn dropped_transaction_leaves_neither_payment_nor_event() {
    let store = MemoryStore::new();
    let payment = Payment::pending("cust-1", "USD", None);

    let mut tx = store.begin().await.unwrap();
    assert!(tx.insert_payment(&payment).await.unwrap());
    outbox_writer::append(&mut *tx, &PaymentEvent::created(&payment)).await.unwrap();
    drop(tx);

    assert_eq!(store.payment_count().await, 0);
    assert!(store.outbox_records().await.is_empty());
}

#[tokio::test]
async fn committed_event_is_pending_with_its_payload() {
    let store = MemoryStore::new();
    let seeded = seed(&store, 1).await;

    let records = store.outbox_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, OutboxStatus::Pending);
    assert_eq!(records[0].retry_count, 0);
    assert_eq!(records[0].event_type, "PaymentCreated");
    assert_eq!(records[0].payload_json["payment_id"], seeded[0].payment_id.to_string());
    assert_eq!(records[0].payload_json["schema_version"], 1);
}

#[tokio::test]
async fn delivers_in_id_order_to_the_mapped_topic() {
    let store = MemoryStore::new();
    let seeded = seed(&store, 3).await;
    let bus = Arc::new(RecordingBus::default());

    let report = relay(&store, bus.clone(), 10).tick().await.unwrap();

    assert_eq!(report.claimed, 3);
    assert_eq!(report.completed, 3);
    let published = bus.published();
    let keys: Vec<String> = published.iter().map(|p| p.key.clone()).collect();
    let expected: Vec<String> = seeded.iter().map(|p| p.payment_id.to_string()).collect();
    assert_eq!(keys, expected);
    assert!(published.iter().all(|p| p.topic == "payment.created.v1"));
    assert!(store
        .outbox_records()
        .await
        .iter()
        .all(|r| r.status == OutboxStatus::Completed && r.processed_at.is_some()));
}

#[tokio::test]
async fn claims_at_most_one_batch_per_tick() {
    let store = MemoryStore::new();
    seed(&store, 15).await;
    let bus = Arc::new(RecordingBus::default());
    let relay = relay(&store, bus.clone(), 10);

    assert_eq!(relay.tick().await.unwrap().claimed, 10);
    assert_eq!(relay.tick().await.unwrap().claimed, 5);
    assert_eq!(relay.tick().await.unwrap().claimed, 0);
    assert_eq!(bus.published().len(), 15);
}

#[tokio::test]
async fn failing_record_is_dead_lettered_after_max_retries() {
    let store = MemoryStore::new();
    seed(&store, 1).await;
    let bus = Arc::new(RecordingBus::default());
    bus.fail_all.store(true, Ordering::SeqCst);
    let relay = relay(&store, bus.clone(), 10);

    assert_eq!(relay.tick().await.unwrap().retried, 1);
    assert_eq!(relay.tick().await.unwrap().retried, 1);
    assert_eq!(relay.tick().await.unwrap().failed, 1);
    assert_eq!(relay.tick().await.unwrap().claimed, 0);

    let record = &store.outbox_records().await[0];
    assert_eq!(record.status, OutboxStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert!(record.last_error.as_deref().unwrap_or("").contains("broker unavailable"));
    assert_eq!(bus.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn one_failing_record_does_not_block_the_batch() {
    let store = MemoryStore::new();
    let seeded = seed(&store, 3).await;
    let bus = Arc::new(RecordingBus::default());
    bus.fail_for(&seeded[1].payment_id.to_string());

    let report = relay(&store, bus.clone(), 10).tick().await.unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.retried, 1);
    let statuses: Vec<OutboxStatus> = store.outbox_records().await.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![OutboxStatus::Completed, OutboxStatus::Pending, OutboxStatus::Completed]
    );
}

#[tokio::test]
async fn unknown_event_type_fails_only_that_record() {
    let store = MemoryStore::new();
    let seeded = seed(&store, 1).await;
    let mut tx = store.begin().await.unwrap();
    tx.insert_outbox(&NewOutboxRecord {
        payment_id: seeded[0].payment_id,
        event_type: "PaymentTeleported".to_string(),
        payload_json: serde_json::json!({}),
        trace_context: None,
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();
    let bus = Arc::new(RecordingBus::default());

    let report = relay(&store, bus.clone(), 10).tick().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.retried, 1);
    assert_eq!(bus.published().len(), 1);
}

#[tokio::test]
async fn requeued_record_is_delivered_again() {
    let store = MemoryStore::new();
    seed(&store, 1).await;
    let bus = Arc::new(RecordingBus::default());
    bus.fail_all.store(true, Ordering::SeqCst);
    let relay = relay(&store, bus.clone(), 10);
    for _ in 0..3 {
        relay.tick().await.unwrap();
    }
    let failed = store.list_by_status(OutboxStatus::Failed, 10).await.unwrap();
    assert_eq!(failed.len(), 1);

    assert!(store.requeue_failed(failed[0].id).await.unwrap());
    assert!(!store.requeue_failed(failed[0].id).await.unwrap());
    bus.fail_all.store(false, Ordering::SeqCst);

    assert_eq!(relay.tick().await.unwrap().completed, 1);
    assert_eq!(store.outbox_records().await[0].status, OutboxStatus::Completed);
}

#[tokio::test]
async fn stale_claims_are_released() {
    let store = MemoryStore::new();
    seed(&store, 2).await;

    let claimed = store.claim_pending(10).await.unwrap();
    assert_eq!(claimed.len(), 2);
    assert!(store.claim_pending(10).await.unwrap().is_empty());

    assert_eq!(store.release_stale(60).await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.release_stale(0).await.unwrap(), 2);
    assert_eq!(store.claim_pending(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn delivery_continues_the_originating_trace() {
    let h = Harness::new();
    let ctx = TraceContext::generate();
    let payment = trace::scope(
        ctx.clone(),
        h.service.initiate(
            InitiatePaymentRequest {
                customer_id: "cust-1".to_string(),
                currency: "EUR".to_string(),
            },
            None,
        ),
    )
    .await
    .unwrap();

    let records = h.store.list_for_payment(payment.payment_id).await.unwrap();
    assert_eq!(records[0].trace_context.as_deref(), Some(ctx.to_string().as_str()));

    let bus = Arc::new(RecordingBus::default());
    relay(&h.store, bus.clone(), 10).tick().await.unwrap();

    let delivered = bus.published()[0]
        .trace_context
        .as_deref()
        .and_then(TraceContext::parse)
        .unwrap();
    assert_eq!(delivered.trace_id, ctx.trace_id);
    assert_ne!(delivered.span_id, ctx.span_id);
}

#[tokio::test]
async fn events_written_outside_a_request_carry_no_trace() {
    let store = MemoryStore::new();
    seed(&store, 1).await;
    let bus = Arc::new(RecordingBus::default());

    relay(&store, bus.clone(), 10).tick().await.unwrap();

    assert!(store.outbox_records().await[0].trace_context.is_none());
    assert!(bus.published()[0].trace_context.is_none());
}

#[tokio::test]
async fn publish_failure_after_commit_keeps_payment_and_pending_event() {
    let h = Harness::new();
    let payment = h.initiate().await;
    let bus = Arc::new(RecordingBus::default());
    bus.fail_all.store(true, Ordering::SeqCst);

    let report = relay(&h.store, bus, 10).tick().await.unwrap();
    assert_eq!(report.retried, 1);

    let stored = h.service.get_payment(payment.payment_id).await.unwrap();
    assert_eq!(stored.status, payment.status);
    let records = h.store.list_for_payment(payment.payment_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, OutboxStatus::Pending);
    assert_eq!(records[0].retry_count, 1);
}
