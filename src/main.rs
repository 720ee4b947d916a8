use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use payment_orchestrator::bus::redis_stream::RedisStreamBus;
use payment_orchestrator::circuit::registry::CircuitBreakerRegistry;
use payment_orchestrator::clients::http::{HttpQrCodeService, HttpUserDirectory, HttpWalletService};
use payment_orchestrator::config::AppConfig;
use payment_orchestrator::http::handlers::{circuit_breaker, ops, outbox, payments};
use payment_orchestrator::http::middleware::admin_auth;
use payment_orchestrator::repo::outbox_repo::OutboxRepo;
use payment_orchestrator::repo::payments_repo::PaymentsRepo;
use payment_orchestrator::service::outbox_relay::OutboxRelay;
use payment_orchestrator::service::payment_service::PaymentService;
use payment_orchestrator::service::resilient_caller::ResilientCaller;
use payment_orchestrator::AppState;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let connect_options = PgConnectOptions::from_str(&cfg.database_url)?.options(cfg.db_session_options());
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .connect_with(connect_options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;

    let payments_repo = Arc::new(PaymentsRepo { pool: pool.clone() });
    let outbox_repo = Arc::new(OutboxRepo { pool: pool.clone() });

    let http = reqwest::Client::new();
    let timeout_ms = cfg.downstream_timeout_ms;
    let users = Arc::new(HttpUserDirectory {
        base_url: cfg.user_service_url.clone(),
        timeout_ms,
        client: http.clone(),
    });
    let qr_codes = Arc::new(HttpQrCodeService {
        base_url: cfg.qr_service_url.clone(),
        timeout_ms,
        client: http.clone(),
    });
    let wallets = Arc::new(HttpWalletService {
        base_url: cfg.wallet_service_url.clone(),
        timeout_ms,
        client: http,
    });

    let breakers = CircuitBreakerRegistry::new(cfg.circuit_thresholds());
    let caller = ResilientCaller::new(breakers.clone(), cfg.retry_config(), cfg.downstream_timeout());
    let payment_service = PaymentService::new(payments_repo, users, qr_codes, wallets, caller);

    let relay = OutboxRelay {
        outbox: outbox_repo.clone(),
        bus: Arc::new(RedisStreamBus::new(redis_client.clone(), cfg.event_stream_prefix.clone())),
        config: cfg.relay_config(),
    };
    tokio::spawn(relay.run());

    let state = AppState {
        payment_service,
        outbox: outbox_repo,
        breakers,
        pool,
        redis_client,
    };

    let admin_routes = Router::new()
        .route("/outbox/failed", get(outbox::list_failed))
        .route("/outbox/:id/requeue", post(outbox::requeue))
        .route("/payments/:payment_id/outbox", get(outbox::list_for_payment))
        .layer(from_fn_with_state(
            cfg.internal_api_key.clone(),
            admin_auth::require_internal_api_key,
        ));

    let app = Router::new()
        .route("/health", get(payments::health))
        .route("/payments", post(payments::initiate_payment))
        .route("/payments/:payment_id", get(payments::get_payment))
        .route("/payments/:payment_id/ready", post(payments::mark_ready))
        .route("/payments/:payment_id/process", post(payments::process_payment))
        .route("/payments/:payment_id/cancel", post(payments::cancel_payment))
        .route("/payments/:payment_id/refund", post(payments::refund_payment))
        .route("/circuit-breaker/status", get(circuit_breaker::status))
        .route("/circuit-breaker/:dependency", get(circuit_breaker::dependency_status))
        .route("/ops/readiness", get(ops::readiness))
        .route("/ops/liveness", get(ops::liveness))
        .merge(admin_routes)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
