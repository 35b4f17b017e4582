//! Caller-side retry with exponential backoff and full jitter.
//!
//! The pipeline core makes one attempt per task; callers that want more wrap
//! the call in a `RetryPolicy`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::client::ReportGenerator;
use crate::pipeline::types::{ReportOutcome, ReportRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 disables retrying.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Upper bound of the sleep before retry number `retry` (1-based):
    /// `base * 2^(retry-1)`, capped at `max_delay`.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Random delay in `[0, backoff_ceiling(retry)]`.
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// Run `attempt` until it yields a non-retriable outcome or attempts run
    /// out. `sleep` is injected so tests don't wait.
    pub fn run<A, S>(&self, mut attempt: A, mut sleep: S) -> ReportOutcome
    where
        A: FnMut(u32) -> ReportOutcome,
        S: FnMut(Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut number = 1;
        loop {
            let outcome = attempt(number);
            let retriable = outcome.error.as_ref().is_some_and(|e| e.is_retriable());
            if !retriable || number >= max_attempts {
                return outcome;
            }
            let delay = self.jittered_delay(number);
            tracing::info!(
                attempt = number,
                delay_ms = delay.as_millis() as u64,
                "Retriable report failure, backing off"
            );
            sleep(delay);
            number += 1;
        }
    }
}

/// A `ReportGenerator` that applies a `RetryPolicy` around another one.
///
/// Built by callers that opt into retrying; the pipeline itself only ever
/// sees one `generate` call per task.
pub struct RetryingGenerator {
    inner: Arc<dyn ReportGenerator>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn ReportGenerator>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl ReportGenerator for RetryingGenerator {
    fn generate(&self, request: &ReportRequest) -> ReportOutcome {
        self.policy
            .run(|_| self.inner.generate(request), std::thread::sleep)
    }
}
