pub mod bus;
pub mod circuit;
pub mod clients;
pub mod config;
pub mod domain {
    pub mod event;
    pub mod idempotency;
    pub mod outbox;
    pub mod payment;
}
pub mod error;
pub mod http {
    pub mod handlers {
        pub mod circuit_breaker;
        pub mod ops;
        pub mod outbox;
        pub mod payments;
    }
    pub mod middleware {
        pub mod admin_auth;
    }
}
pub mod repo;
pub mod service {
    pub mod idempotency;
    pub mod outbox_relay;
    pub mod outbox_writer;
    pub mod payment_service;
    pub mod resilient_caller;
    pub mod retry_orchestrator;
}
pub mod trace;

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub payment_service: service::payment_service::PaymentService,
    pub outbox: Arc<dyn repo::OutboxStore>,
    pub breakers: circuit::registry::CircuitBreakerRegistry,
    pub pool: sqlx::PgPool,
    pub redis_client: redis::Client,
}
