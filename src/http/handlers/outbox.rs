use crate::domain::outbox::{OutboxRecord, OutboxStatus};
use crate::error::{err, ErrorCode};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

fn internal(e: anyhow::Error) -> Response {
    tracing::error!("outbox admin query failed: {:#}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(err(ErrorCode::ServiceUnavailable, "outbox store unavailable")),
    )
        .into_response()
}

fn records(result: anyhow::Result<Vec<OutboxRecord>>) -> Response {
    match result {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => internal(e),
    }
}

/// Dead-lettered events awaiting an operator.
pub async fn list_failed(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Response {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    records(state.outbox.list_by_status(OutboxStatus::Failed, limit).await)
}

pub async fn list_for_payment(State(state): State<AppState>, Path(payment_id): Path<Uuid>) -> Response {
    records(state.outbox.list_for_payment(payment_id).await)
}

pub async fn requeue(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.outbox.requeue_failed(id).await {
        Ok(true) => {
            tracing::info!(outbox_id = id, "failed outbox record requeued");
            (StatusCode::OK, Json(serde_json::json!({ "id": id, "status": OutboxStatus::Pending }))).into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(err(ErrorCode::InvalidRequest, "no FAILED outbox record with that id")),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}
