use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct CircuitThresholds {
    /// Number of most recent calls kept in the sliding window.
    pub window_size: usize,
    /// The failure rate is not evaluated until this many calls are recorded.
    pub minimum_calls: usize,
    pub failure_rate_threshold: f64,
    pub cooldown: Duration,
    /// Trial calls allowed concurrently while half-open.
    pub half_open_permits: u32,
}

impl Default for CircuitThresholds {
    fn default() -> Self {
        Self {
            window_size: 10,
            minimum_calls: 5,
            failure_rate_threshold: 0.50,
            cooldown: Duration::from_secs(10),
            half_open_permits: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub window: VecDeque<CallOutcome>,
    pub opened_at: Option<chrono::DateTime<chrono::Utc>>,
    pub cooldown_until: Option<chrono::DateTime<chrono::Utc>>,
    pub probes_in_flight: u32,
    pub transitioned_at: chrono::DateTime<chrono::Utc>,
}

impl CircuitSnapshot {
    pub fn new(dependency: &str) -> Self {
        Self {
            dependency: dependency.to_string(),
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            cooldown_until: None,
            probes_in_flight: 0,
            transitioned_at: chrono::Utc::now(),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failed = self
            .window
            .iter()
            .filter(|o| **o == CallOutcome::Failure)
            .count();
        failed as f64 / self.window.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    Allow,
    /// Admitted as a trial call; its outcome decides the half-open state.
    Probe,
    Reject(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    CoolingDown { remaining_ms: i64 },
    TrialsExhausted,
}
