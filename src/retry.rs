use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Metadata extraction: 3 attempts, 1s, 2s.
    pub const RESOLVE: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
    /// Decoder startup health check.
    pub const DECODE_START: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
    /// Voice connect/move.
    pub const JOIN: RetryPolicy = RetryPolicy::new(5, Duration::from_secs(1), 2.0);

    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.multiplier.powi(exp))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!("{label}: attempt {attempt}/{attempts} failed: {err}");
                    if attempt >= attempts || !is_transient(&err) {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
