use crate::circuit::state::{CircuitDecision, CircuitSnapshot, CircuitState, CircuitThresholds, RejectReason};
use chrono::{DateTime, Utc};

/// Decides whether a call may go out. Pure: admitting a probe is recorded
/// separately by `transitions::admit_probe`.
pub fn pre_call_decision(snapshot: &CircuitSnapshot, thresholds: &CircuitThresholds, now: DateTime<Utc>) -> CircuitDecision {
    match (snapshot.state, snapshot.cooldown_until) {
        (CircuitState::Closed, _) => CircuitDecision::Allow,
        (CircuitState::Open, Some(until)) if now < until => CircuitDecision::Reject(RejectReason::CoolingDown {
            remaining_ms: (until - now).num_milliseconds(),
        }),
        (CircuitState::Open, _) => CircuitDecision::Probe,
        (CircuitState::HalfOpen, _) if snapshot.probes_in_flight >= thresholds.half_open_permits => {
            CircuitDecision::Reject(RejectReason::TrialsExhausted)
        }
        (CircuitState::HalfOpen, _) => CircuitDecision::Probe,
    }
}
