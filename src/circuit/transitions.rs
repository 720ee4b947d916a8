use crate::circuit::state::{CallOutcome, CircuitSnapshot, CircuitState, CircuitThresholds};

/// Registers an admitted trial call. An open circuit whose cooldown elapsed
/// becomes half-open here.
pub fn admit_probe(mut snapshot: CircuitSnapshot, now: chrono::DateTime<chrono::Utc>) -> CircuitSnapshot {
    if snapshot.state == CircuitState::Open {
        snapshot.state = CircuitState::HalfOpen;
        snapshot.probes_in_flight = 0;
        snapshot.transitioned_at = now;
    }
    snapshot.probes_in_flight += 1;
    snapshot
}

/// Frees the slot of a trial call that was abandoned before it finished.
/// Only a trial from the current half-open period holds a slot.
pub fn release_probe(
    mut snapshot: CircuitSnapshot,
    half_open_since: Option<chrono::DateTime<chrono::Utc>>,
) -> CircuitSnapshot {
    if snapshot.state == CircuitState::HalfOpen && half_open_since == Some(snapshot.transitioned_at) {
        snapshot.probes_in_flight = snapshot.probes_in_flight.saturating_sub(1);
    }
    snapshot
}

pub fn apply_transition(
    mut snapshot: CircuitSnapshot,
    thresholds: &CircuitThresholds,
    outcome: CallOutcome,
    was_probe: bool,
    now: chrono::DateTime<chrono::Utc>,
) -> CircuitSnapshot {
    if was_probe {
        snapshot.probes_in_flight = snapshot.probes_in_flight.saturating_sub(1);
    }

    match snapshot.state {
        CircuitState::Closed => {
            snapshot.window.push_back(outcome);
            while snapshot.window.len() > thresholds.window_size {
                snapshot.window.pop_front();
            }
            if snapshot.window.len() >= thresholds.minimum_calls
                && snapshot.failure_rate() >= thresholds.failure_rate_threshold
            {
                open(&mut snapshot, thresholds, now);
            }
        }
        // Late results from calls admitted before the circuit opened.
        CircuitState::Open => {}
        CircuitState::HalfOpen => {
            if !was_probe {
                return snapshot;
            }
            match outcome {
                CallOutcome::Failure => open(&mut snapshot, thresholds, now),
                CallOutcome::Success => {
                    snapshot.state = CircuitState::Closed;
                    snapshot.window.clear();
                    snapshot.opened_at = None;
                    snapshot.cooldown_until = None;
                    snapshot.probes_in_flight = 0;
                    snapshot.transitioned_at = now;
                }
            }
        }
    }

    snapshot
}

fn open(snapshot: &mut CircuitSnapshot, thresholds: &CircuitThresholds, now: chrono::DateTime<chrono::Utc>) {
    let cooldown = chrono::Duration::from_std(thresholds.cooldown).unwrap_or(chrono::Duration::seconds(30));
    snapshot.state = CircuitState::Open;
    snapshot.window.clear();
    snapshot.opened_at = Some(now);
    snapshot.cooldown_until = Some(now + cooldown);
    snapshot.probes_in_flight = 0;
    snapshot.transitioned_at = now;
}
