use crate::domain::event::EventType;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

pub mod redis_stream;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
        trace_context: Option<&str>,
    ) -> Result<()>;
}

/// Topic an outbox event type is delivered to.
pub fn topic_for(event_type: &str) -> Result<&'static str> {
    match EventType::parse(event_type) {
        Some(EventType::PaymentCreated) => Ok("payment.created.v1"),
        Some(EventType::PaymentCompleted) => Ok("payment.completed.v1"),
        Some(EventType::PaymentRefunded) => Ok("payment.refunded.v1"),
        None => Err(anyhow!("no topic registered for event type {}", event_type)),
    }
}

pub const TOPICS: [&str; 3] = ["payment.created.v1", "payment.completed.v1", "payment.refunded.v1"];
