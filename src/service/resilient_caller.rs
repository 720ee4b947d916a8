use crate::circuit::registry::{CallPermit, CircuitBreakerRegistry};
use crate::circuit::state::CallOutcome;
use crate::clients::CallError;
use crate::service::retry_orchestrator::{classify_attempt_result, RetryConfig, RetryDirective};
use std::future::Future;
use std::time::Duration;

/// `Retry(CircuitBreaker(timeout(call)))`. Retry is the outer layer so every
/// attempt goes back through the breaker.
#[derive(Clone)]
pub struct ResilientCaller {
    pub breakers: CircuitBreakerRegistry,
    pub retry: RetryConfig,
    pub call_timeout: Duration,
}

impl ResilientCaller {
    pub fn new(breakers: CircuitBreakerRegistry, retry: RetryConfig, call_timeout: Duration) -> Self {
        Self {
            breakers,
            retry,
            call_timeout,
        }
    }

    pub async fn call<T, F, Fut>(&self, dependency: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match self.guarded(dependency, &mut op).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match classify_attempt_result(&err, attempt, &self.retry) {
                RetryDirective::GiveUp => return Err(err),
                RetryDirective::Retry => {
                    let delay = self.retry.backoff_duration(attempt);
                    tracing::warn!(
                        dependency,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient failure: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One attempt through the breaker. A timeout counts as a failure.
    async fn guarded<T, F, Fut>(&self, dependency: &str, op: &mut F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let in_flight = InFlight {
            breakers: &self.breakers,
            dependency,
            permit: Some(self.breakers.acquire(dependency)?),
        };

        let result = match tokio::time::timeout(self.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Transient(format!(
                "{} did not answer within {}ms",
                dependency,
                self.call_timeout.as_millis()
            ))),
        };

        let outcome = match &result {
            Err(e) if e.counts_as_failure() => CallOutcome::Failure,
            _ => CallOutcome::Success,
        };
        in_flight.finish(outcome);
        result
    }
}

/// Holds a breaker permit for one attempt. Dropping it unfinished, as when
/// the caller's future is cancelled, hands a trial slot back.
struct InFlight<'a> {
    breakers: &'a CircuitBreakerRegistry,
    dependency: &'a str,
    permit: Option<CallPermit>,
}

impl InFlight<'_> {
    fn finish(mut self, outcome: CallOutcome) {
        if let Some(permit) = self.permit.take() {
            self.breakers.record(self.dependency, permit, outcome);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breakers.release(self.dependency, permit);
        }
    }
}
