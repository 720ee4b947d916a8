use crate::circuit::evaluator::pre_call_decision;
use crate::circuit::state::{CallOutcome, CircuitDecision, CircuitSnapshot, CircuitState, CircuitThresholds};
use crate::circuit::transitions::{admit_probe, apply_transition, release_probe};
use crate::clients::CallError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Instance-local breaker state, one snapshot per downstream dependency.
/// Nothing is persisted; a restart starts every dependency closed.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    thresholds: CircuitThresholds,
    inner: Arc<Mutex<HashMap<String, CircuitSnapshot>>>,
}

/// Handed out by [`CircuitBreakerRegistry::acquire`] and returned with the
/// call's outcome.
#[derive(Debug, Clone, Copy)]
pub struct CallPermit {
    pub was_probe: bool,
    /// When the half-open period this trial belongs to started.
    pub half_open_since: Option<chrono::DateTime<chrono::Utc>>,
}

impl CallPermit {
    fn normal() -> Self {
        Self {
            was_probe: false,
            half_open_since: None,
        }
    }
}

impl CircuitBreakerRegistry {
    pub fn new(thresholds: CircuitThresholds) -> Self {
        Self {
            thresholds,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn thresholds(&self) -> &CircuitThresholds {
        &self.thresholds
    }

    pub fn acquire(&self, dependency: &str) -> Result<CallPermit, CallError> {
        let now = chrono::Utc::now();
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let snapshot = map
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitSnapshot::new(dependency));

        match pre_call_decision(snapshot, &self.thresholds, now) {
            CircuitDecision::Allow => Ok(CallPermit::normal()),
            CircuitDecision::Probe => {
                let before = snapshot.state;
                *snapshot = admit_probe(snapshot.clone(), now);
                if before != snapshot.state {
                    tracing::info!(dependency, "circuit half-open, admitting trial calls");
                }
                Ok(CallPermit {
                    was_probe: true,
                    half_open_since: Some(snapshot.transitioned_at),
                })
            }
            CircuitDecision::Reject(reason) => {
                tracing::debug!(dependency, reason = ?reason, "call rejected by circuit breaker");
                Err(CallError::CircuitOpen {
                    dependency: dependency.to_string(),
                })
            }
        }
    }

    pub fn record(&self, dependency: &str, permit: CallPermit, outcome: CallOutcome) {
        let now = chrono::Utc::now();
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let snapshot = map
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitSnapshot::new(dependency));

        let before = snapshot.state;
        *snapshot = apply_transition(snapshot.clone(), &self.thresholds, outcome, permit.was_probe, now);

        match (before, snapshot.state) {
            (CircuitState::Closed, CircuitState::Open) => tracing::warn!(
                dependency,
                cooldown_ms = self.thresholds.cooldown.as_millis() as u64,
                "circuit opened"
            ),
            (CircuitState::HalfOpen, CircuitState::Open) => {
                tracing::warn!(dependency, "trial call failed, circuit reopened")
            }
            (CircuitState::HalfOpen, CircuitState::Closed) => {
                tracing::info!(dependency, "trial call succeeded, circuit closed")
            }
            _ => {}
        }
    }

    /// Returns a permit whose call never finished. No outcome is recorded.
    pub fn release(&self, dependency: &str, permit: CallPermit) {
        if !permit.was_probe {
            return;
        }
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(snapshot) = map.get_mut(dependency) {
            *snapshot = release_probe(snapshot.clone(), permit.half_open_since);
            tracing::debug!(dependency, probes_in_flight = snapshot.probes_in_flight, "abandoned trial call released");
        }
    }

    pub fn snapshot(&self, dependency: &str) -> CircuitSnapshot {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.get(dependency)
            .cloned()
            .unwrap_or_else(|| CircuitSnapshot::new(dependency))
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut all: Vec<CircuitSnapshot> = map.values().cloned().collect();
        all.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        all
    }
}
