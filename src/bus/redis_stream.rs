use crate::bus::EventBus;
use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

/// Publishes each topic to its own Redis stream, `<prefix>:<topic>`.
/// One managed connection is opened on first publish and shared by every
/// later one; it reconnects on its own after a drop.
#[derive(Clone)]
pub struct RedisStreamBus {
    redis_client: redis::Client,
    stream_prefix: String,
    conn: std::sync::Arc<OnceCell<ConnectionManager>>,
}

impl RedisStreamBus {
    pub fn new(redis_client: redis::Client, stream_prefix: impl Into<String>) -> Self {
        Self {
            redis_client,
            stream_prefix: stream_prefix.into(),
            conn: std::sync::Arc::new(OnceCell::new()),
        }
    }

    pub fn stream_key(&self, topic: &str) -> String {
        format!("{}:{}", self.stream_prefix, topic)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                tracing::info!(prefix = %self.stream_prefix, "opening event bus connection");
                ConnectionManager::new(self.redis_client.clone()).await
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl EventBus for RedisStreamBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
        trace_context: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(payload)?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(self.stream_key(topic))
            .arg("MAXLEN")
            .arg("~")
            .arg(1_000_000)
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("payload")
            .arg(payload);
        if let Some(ctx) = trace_context {
            cmd.arg("traceparent").arg(ctx);
        }

        let _: String = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_lazy_connection() {
        let client = redis::Client::open("redis://127.0.0.1:6379/").unwrap();
        let bus = RedisStreamBus::new(client, "payments:events");
        let copy = bus.clone();

        assert!(!bus.is_connected());
        assert!(std::sync::Arc::ptr_eq(&bus.conn, &copy.conn));
        assert_eq!(copy.stream_key("payment.completed.v1"), "payments:events:payment.completed.v1");
    }
}
