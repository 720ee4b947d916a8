use crate::domain::payment::{InitiatePaymentRequest, Payment, ProcessPaymentRequest, RefundPaymentRequest};
use crate::error::PaymentError;
use crate::trace::{self, TraceContext};
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Malformed or mistyped bodies get the same envelope as any other invalid
/// request instead of axum's plain-text rejection.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, PaymentError> {
    payload
        .map(|Json(req)| req)
        .map_err(|rejection| PaymentError::InvalidRequest(rejection.body_text()))
}

fn respond(result: Result<Payment, PaymentError>, success: StatusCode) -> Response {
    match result {
        Ok(payment) => (success, Json(payment)).into_response(),
        Err(e) => {
            let (status, body) = e.to_http();
            (status, Json(body)).into_response()
        }
    }
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(req) => req,
        Err(e) => return respond(Err(e), StatusCode::CREATED),
    };
    let key = idempotency_key(&headers);
    let ctx = TraceContext::from_headers(&headers);
    let result = trace::scope(ctx, state.payment_service.initiate(req, key.as_deref())).await;
    respond(result, StatusCode::CREATED)
}

pub async fn mark_ready(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
) -> Response {
    let ctx = TraceContext::from_headers(&headers);
    let result = trace::scope(ctx, state.payment_service.mark_ready(payment_id)).await;
    respond(result, StatusCode::OK)
}

pub async fn process_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
    payload: Result<Json<ProcessPaymentRequest>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(req) => req,
        Err(e) => return respond(Err(e), StatusCode::OK),
    };
    let key = idempotency_key(&headers);
    let ctx = TraceContext::from_headers(&headers);
    let result = trace::scope(
        ctx,
        state.payment_service.process(payment_id, req, key.as_deref()),
    )
    .await;
    respond(result, StatusCode::OK)
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
) -> Response {
    let key = idempotency_key(&headers);
    let ctx = TraceContext::from_headers(&headers);
    let result = trace::scope(ctx, state.payment_service.cancel(payment_id, key.as_deref())).await;
    respond(result, StatusCode::OK)
}

pub async fn refund_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
    payload: Result<Json<RefundPaymentRequest>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(req) => req,
        Err(e) => return respond(Err(e), StatusCode::OK),
    };
    let key = idempotency_key(&headers);
    let ctx = TraceContext::from_headers(&headers);
    let result = trace::scope(
        ctx,
        state.payment_service.refund(payment_id, req, key.as_deref()),
    )
    .await;
    respond(result, StatusCode::OK)
}

pub async fn get_payment(State(state): State<AppState>, Path(payment_id): Path<Uuid>) -> Response {
    respond(state.payment_service.get_payment(payment_id).await, StatusCode::OK)
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
