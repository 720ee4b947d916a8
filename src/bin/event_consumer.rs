use anyhow::Result;
use payment_orchestrator::bus::redis_stream::RedisStreamBus;
use payment_orchestrator::bus::TOPICS;
use payment_orchestrator::config::AppConfig;
use payment_orchestrator::domain::event::PaymentEvent;
use payment_orchestrator::trace::TraceContext;
use redis::streams::StreamReadReply;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Reference subscriber: reads every payment topic through a consumer group,
/// logs each event under its delivered trace and acknowledges it. Delivery is
/// at-least-once, so handling keys on the payment id.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();
    let group = std::env::var("EVENT_CONSUMER_GROUP").unwrap_or_else(|_| "payment-events-v1".to_string());
    let consumer_name = std::env::var("EVENT_CONSUMER_NAME").unwrap_or_else(|_| "event-consumer-1".to_string());

    let client = redis::Client::open(cfg.redis_url.clone())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let bus = RedisStreamBus::new(client, cfg.event_stream_prefix.clone());
    let streams: Vec<String> = TOPICS.iter().map(|t| bus.stream_key(t)).collect();

    for stream in &streams {
        // BUSYGROUP on restart is expected.
        let _: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
    }
    tracing::info!(group = %group, consumer = %consumer_name, streams = streams.len(), "event consumer started");

    loop {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&group)
            .arg(&consumer_name)
            .arg("COUNT")
            .arg(100)
            .arg("BLOCK")
            .arg(2000)
            .arg("STREAMS");
        for stream in &streams {
            cmd.arg(stream);
        }
        for _ in &streams {
            cmd.arg(">");
        }

        let reply: StreamReadReply = match cmd.query_async(&mut conn).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("XREADGROUP failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        for stream_key in reply.keys {
            for id in stream_key.ids {
                let field = |name: &str| {
                    id.map
                        .get(name)
                        .and_then(|v| redis::from_redis_value::<String>(v).ok())
                };
                let trace_id = field("traceparent")
                    .as_deref()
                    .and_then(TraceContext::parse)
                    .map(|ctx| ctx.trace_id)
                    .unwrap_or_default();

                match field("payload").map(|raw| serde_json::from_str::<PaymentEvent>(&raw)) {
                    Some(Ok(event)) => tracing::info!(
                        stream = %stream_key.key,
                        entry_id = %id.id,
                        event_type = %event.event_type(),
                        payment_id = %event.payment_id(),
                        trace_id = %trace_id,
                        "payment event received"
                    ),
                    Some(Err(e)) => tracing::warn!(
                        stream = %stream_key.key,
                        entry_id = %id.id,
                        "undecodable payment event: {}",
                        e
                    ),
                    None => tracing::warn!(stream = %stream_key.key, entry_id = %id.id, "entry without payload"),
                }

                let acked: redis::RedisResult<i64> = redis::cmd("XACK")
                    .arg(&stream_key.key)
                    .arg(&group)
                    .arg(&id.id)
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = acked {
                    tracing::warn!(entry_id = %id.id, "XACK failed: {}", e);
                }
            }
        }
    }
}
