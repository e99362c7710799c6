//! Retry policy and backoff runner shared by the HTTP-facing components.
//!
//! Every retrying call site classifies each attempt as success, transient
//! failure (optionally carrying a server-suggested delay, e.g. `Retry-After`)
//! or fatal failure; the runner owns the attempt counting and the backoff
//! schedule so the policy lives in one place.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tracing::debug;

/// Backoff and budget knobs for one class of HTTP operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Multiplier applied per completed attempt (exponential backoff).
    pub multiplier: u32,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Adds up to 50% extra delay to spread simultaneous retries.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given 1-based attempt has failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        let delay = self
            .base_delay
            .saturating_mul(exp)
            .min(self.max_delay);
        if self.jitter && !delay.is_zero() {
            let extra = rand::rng().random_range(0..=delay.as_millis() as u64 / 2);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }
}

/// Classification of a single attempt made under [`run`].
pub enum AttemptOutcome<T, E> {
    Success(T),
    /// Worth retrying; `after` overrides the backoff schedule when the
    /// server suggested a delay.
    Retry { error: E, after: Option<Duration> },
    /// Not worth retrying; surfaced immediately.
    Abort(E),
}

/// Drives `op` until it succeeds, aborts, or the attempt budget is spent.
///
/// `op` receives the 1-based attempt number. The error of the last attempt
/// is returned when the budget runs out.
pub async fn run<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            AttemptOutcome::Success(value) => return Ok(value),
            AttemptOutcome::Abort(error) => return Err(error),
            AttemptOutcome::Retry { error, after } => {
                if attempt >= policy.max_attempts {
                    return Err(error);
                }
                let delay = after.unwrap_or_else(|| policy.delay_for(attempt));
                debug!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
