//! Bounded exponential backoff.
//!
//! [`with_retry`] is the only retry loop in the crate. Replication never
//! retries on its own; the orchestrator wraps each collection in it.

use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use tracing::{info, warn};

/// Attempt ceiling and base delay. The delay before retry `i` (0-based) is
/// `base_delay * 2^i`; there is no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay:   Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { max_attempts: 5, base_delay: Duration::from_millis(1000) }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self { max_attempts, base_delay }
  }

  pub fn delay_for(&self, attempt_index: u32) -> Duration {
    self
      .base_delay
      .saturating_mul(2u32.saturating_pow(attempt_index))
  }
}

/// Suspends between attempts. Abstracted so tests can record the delays
/// instead of waiting them out.
pub trait Sleeper: Send + Sync {
  fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + '_;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
  async fn sleep(&self, duration: Duration) { tokio::time::sleep(duration).await }
}

impl<T: Sleeper> Sleeper for Arc<T> {
  fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + '_ {
    (**self).sleep(duration)
  }
}

/// The last error of an operation that used up its attempts.
#[derive(Debug)]
pub struct RetryError<E> {
  pub attempts: u32,
  pub error:    E,
}

/// Run `operation` until it succeeds or `policy.max_attempts` attempts have
/// failed. The operation receives the 0-based attempt index.
pub async fn with_retry<T, E, F, Fut>(
  policy: &RetryPolicy,
  sleeper: &impl Sleeper,
  label: &str,
  mut operation: F,
) -> Result<T, RetryError<E>>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Display,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 0;
  loop {
    match operation(attempt).await {
      Ok(value) => {
        if attempt > 0 {
          info!(label, attempts = attempt + 1, "succeeded after retry");
        }
        return Ok(value);
      }
      Err(error) => {
        let made = attempt + 1;
        if made >= max_attempts {
          warn!(label, attempts = made, %error, "giving up");
          return Err(RetryError { attempts: made, error });
        }
        let delay = policy.delay_for(attempt);
        warn!(
          label,
          attempt = made,
          delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
          %error,
          "attempt failed, backing off"
        );
        sleeper.sleep(delay).await;
        attempt = made;
      }
    }
  }
}
