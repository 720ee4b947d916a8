use crate::error::{err, ErrorCode};
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

/// Guards the operator routes. An empty configured key disables them.
pub async fn require_internal_api_key(
    State(expected): State<String>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(INTERNAL_API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if expected.is_empty() || provided != expected {
        tracing::warn!(path = %request.uri().path(), "rejected admin request without a valid api key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(err(ErrorCode::InvalidRequest, "missing or invalid internal api key")),
        )
            .into_response();
    }

    next.run(request).await
}
