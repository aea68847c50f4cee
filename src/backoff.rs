//! Bounded exponential retry for transient ledger errors.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::chain::LedgerError;

/// Upper bound for deadlines, so huge `maxTimeoutSeconds` values cannot overflow `Instant`.
const MAX_BUDGET: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// `Instant::now() + budget`, with the budget capped.
pub fn deadline_after(budget: Duration) -> Instant {
    Instant::now() + budget.min(MAX_BUDGET)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(4),
            factor: 2,
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based), capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.max(1).saturating_pow(attempt);
        self.initial.saturating_mul(multiplier).min(self.max)
    }

    /// Runs `operation` until it succeeds, fails terminally, or `deadline` passes.
    ///
    /// Sleeps are clamped to the remaining budget, so the last attempt happens at the
    /// deadline at the latest. The final error is returned as-is.
    pub async fn retry<T, F, Fut>(
        &self,
        deadline: Instant,
        operation: &'static str,
        mut f: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(operation, attempt, "Ledger call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(error);
                    }
                    let delay = self.delay(attempt).min(remaining);
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Transient ledger error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
