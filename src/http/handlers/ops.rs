use crate::circuit::state::CircuitState;
use crate::domain::outbox::OutboxStatus;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub db: bool,
    pub redis: bool,
    /// Informational only; an open breaker does not make the instance unready.
    pub open_circuits: Vec<String>,
    pub dead_lettered_events: bool,
}

async fn db_ok(state: &AppState) -> bool {
    let ping = sqlx::query("SELECT 1").execute(&state.pool);
    matches!(tokio::time::timeout(PROBE_TIMEOUT, ping).await, Ok(Ok(_)))
}

async fn redis_ok(state: &AppState) -> bool {
    let ping = async {
        let mut conn = state.redis_client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await
    };
    matches!(tokio::time::timeout(PROBE_TIMEOUT, ping).await, Ok(Ok(_)))
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let (db, redis) = tokio::join!(db_ok(&state), redis_ok(&state));

    let open_circuits = state
        .breakers
        .snapshots()
        .into_iter()
        .filter(|s| s.state != CircuitState::Closed)
        .map(|s| s.dependency)
        .collect();
    let dead_lettered_events = db
        && state
            .outbox
            .list_by_status(OutboxStatus::Failed, 1)
            .await
            .map(|r| !r.is_empty())
            .unwrap_or(false);

    let report = Readiness {
        ready: db && redis,
        db,
        redis,
        open_circuits,
        dead_lettered_events,
    };
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "alive": true })))
}
