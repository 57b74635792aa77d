//! Bounded retry policy applied at each Execution Gateway call site.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GatewayError, LifecycleError};

/// How many times to try an external call and how long to wait in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub delay: Duration,

    /// Growth factor applied to the delay after each failure (1.0 = fixed delay)
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.delay)
            .with_multiplier(self.multiplier.max(1.0))
            .with_randomization_factor(0.0)
            .with_max_interval(self.delay.saturating_mul(self.max_attempts.max(1)).max(self.delay))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, LifecycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut schedule = self.schedule();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let wait = schedule.next_backoff().unwrap_or(self.delay);
                    warn!(
                        op = op,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Gateway call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(LifecycleError::from_gateway(op, attempt, e)),
            }
        }
    }
}
