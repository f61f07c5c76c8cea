// Retry policy for outbound collaborator calls: exponential backoff with jitter

use crate::config::HttpConfig;
use crate::errors::ClientError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Upper bound for a single backoff delay
const MAX_DELAY_MS: u64 = 30_000;

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before retry number `attempt` (0-based); None once retries are exhausted
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    fn max_retries(&self) -> u32;

    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries()
    }
}

/// Exponential backoff: `base * 3^attempt`, capped, plus up to `jitter_factor` extra
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    max_retries: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: MAX_DELAY_MS,
            jitter_factor: 0.1,
            max_retries: 3,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_factor: f64,
        max_retries: u32,
    ) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_retries,
        }
    }

    pub fn from_settings(http: &HttpConfig) -> Self {
        Self::with_config(http.base_delay_ms, MAX_DELAY_MS, 0.1, http.max_retries)
    }

    fn calculate_base_delay(&self, attempt: u32) -> u64 {
        let factor = 3_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    fn add_jitter_ms(&self, base_delay_ms: u64) -> u64 {
        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        if jitter_range_ms == 0 {
            return base_delay_ms;
        }
        base_delay_ms + rand::thread_rng().gen_range(0..=jitter_range_ms)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay_ms = self.add_jitter_ms(self.calculate_base_delay(attempt));
        Some(Duration::from_millis(delay_ms))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Fixed delay retry strategy, mostly for tests
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_retries: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then_some(self.delay)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out
pub async fn with_retry<T, F, Fut>(
    strategy: &dyn RetryStrategy,
    what: &str,
    mut operation: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match strategy.next_delay(attempt) {
                Some(delay) => {
                    warn!(
                        request = what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying collaborator call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}
