use crate::bus::{topic_for, EventBus};
use crate::domain::outbox::OutboxRecord;
use crate::repo::OutboxStore;
use crate::trace::TraceContext;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// A record that has failed this many times is dead-lettered.
    pub max_retries: i32,
    pub publish_timeout: Duration,
    pub stale_after_secs: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 10,
            max_retries: 3,
            publish_timeout: Duration::from_secs(5),
            stale_after_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct OutboxRelay {
    pub outbox: Arc<dyn OutboxStore>,
    pub bus: Arc<dyn EventBus>,
    pub config: RelayConfig,
}

impl OutboxRelay {
    pub async fn run(self) {
        tracing::info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox relay started"
        );
        loop {
            if let Err(err) = self.tick().await {
                tracing::error!("outbox relay error: {:#}", err);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        let released = self.outbox.release_stale(self.config.stale_after_secs).await?;
        if released > 0 {
            tracing::warn!(released, "released stale outbox claims");
        }

        let batch = self.outbox.claim_pending(self.config.batch_size).await?;
        let mut report = TickReport {
            claimed: batch.len(),
            ..Default::default()
        };

        for record in batch {
            match self.deliver(&record).await {
                Ok(()) => match self.outbox.mark_completed(record.id).await {
                    Ok(()) => report.completed += 1,
                    Err(e) => tracing::error!(outbox_id = record.id, "failed to mark delivered record: {:#}", e),
                },
                Err(e) => {
                    let retry_count = record.retry_count + 1;
                    let message = format!("{:#}", e);
                    if retry_count >= self.config.max_retries {
                        tracing::error!(
                            outbox_id = record.id,
                            event_type = %record.event_type,
                            retry_count,
                            "outbox record dead-lettered: {}",
                            message
                        );
                        match self.outbox.mark_failed(record.id, retry_count, &message).await {
                            Ok(()) => report.failed += 1,
                            Err(e) => tracing::error!(outbox_id = record.id, "failed to dead-letter record: {:#}", e),
                        }
                    } else {
                        tracing::warn!(
                            outbox_id = record.id,
                            retry_count,
                            "outbox delivery failed, will retry: {}",
                            message
                        );
                        match self.outbox.mark_retry(record.id, retry_count, &message).await {
                            Ok(()) => report.retried += 1,
                            Err(e) => tracing::error!(outbox_id = record.id, "failed to reschedule record: {:#}", e),
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Publishes one record under a child span of the trace that wrote it.
    async fn deliver(&self, record: &OutboxRecord) -> Result<()> {
        let topic = topic_for(&record.event_type)?;
        let child = record
            .trace_context
            .as_deref()
            .and_then(TraceContext::parse)
            .map(|parent| parent.child());
        let traceparent = child.as_ref().map(|c| c.to_string());
        let span = tracing::info_span!(
            "outbox.deliver",
            outbox_id = record.id,
            topic,
            trace_id = child.as_ref().map(|c| c.trace_id.as_str()).unwrap_or(""),
        );

        let key = record.payment_id.to_string();
        let publish = self
            .bus
            .publish(topic, &key, &record.payload_json, traceparent.as_deref());
        match tokio::time::timeout(self.config.publish_timeout, publish)
            .instrument(span)
            .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "publish to {} timed out after {}ms",
                topic,
                self.config.publish_timeout.as_millis()
            )),
        }
    }
}
