use crate::circuit::state::{CircuitSnapshot, CircuitState};
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CircuitStatus {
    pub dependency: String,
    pub state: CircuitState,
    pub failure_rate: f64,
    pub window_calls: usize,
    pub cooldown_until: Option<chrono::DateTime<chrono::Utc>>,
    pub probes_in_flight: u32,
    pub transitioned_at: chrono::DateTime<chrono::Utc>,
}

impl From<&CircuitSnapshot> for CircuitStatus {
    fn from(s: &CircuitSnapshot) -> Self {
        Self {
            dependency: s.dependency.clone(),
            state: s.state,
            failure_rate: s.failure_rate(),
            window_calls: s.window.len(),
            cooldown_until: s.cooldown_until,
            probes_in_flight: s.probes_in_flight,
            transitioned_at: s.transitioned_at,
        }
    }
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let breakers: Vec<CircuitStatus> = state.breakers.snapshots().iter().map(CircuitStatus::from).collect();
    (
        axum::http::StatusCode::OK,
        Json(serde_json::json!({ "breakers": breakers })),
    )
        .into_response()
}

pub async fn dependency_status(
    State(state): State<AppState>,
    Path(dependency): Path<String>,
) -> impl IntoResponse {
    let snapshot = state.breakers.snapshot(&dependency);
    (axum::http::StatusCode::OK, Json(CircuitStatus::from(&snapshot))).into_response()
}
