//! Bounded retry with exponential backoff
//!
//! Only errors reporting
//! [`is_retryable`](crate::error::KubehopError::is_retryable) are retried;
//! the delay before attempt `n + 1` is `base_delay * 2^(n - 1)`.

use crate::error::KubehopResult;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try and how long to wait between tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy for establishing SSH sessions
    pub fn connect(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::from_secs(1))
    }

    /// Policy for file transfers over an open session
    pub fn transfer(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::from_secs(1))
    }

    /// Delay after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::connect(3)
    }
}

/// Run `op` until it succeeds, fails fatally, or attempts run out
///
/// `op` receives the 1-based attempt number. The last error is returned
/// when all attempts fail.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> KubehopResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = KubehopResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether an I/O failure looks transient at the network level
pub fn is_transient_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        err.kind(),
        TimedOut
            | ConnectionRefused
            | ConnectionReset
            | ConnectionAborted
            | NotConnected
            | BrokenPipe
            | UnexpectedEof
            | Interrupted
            | WouldBlock
            | AddrNotAvailable
    )
}
