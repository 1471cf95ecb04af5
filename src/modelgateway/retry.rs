//! Exponential backoff with full jitter for `Transient` Model Gateway
//! failures, per spec §4.4. `Permanent` and `OverlongInput` are surfaced
//! immediately without retry.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::GatewayError;

const BASE_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

/// Full-jitter exponential backoff: `delay = random(0, min(MAX, BASE * 2^attempt))`.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(MAX_DELAY_MS);
    let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

/// Run `f` up to `policy.max_retries + 1` times. Only `GatewayError::Transient`
/// triggers a retry; `Permanent` and `OverlongInput` return immediately.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut f: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(GatewayError::Transient(msg)) => {
                if attempt >= policy.max_retries {
                    return Err(GatewayError::Transient(format!(
                        "retry budget exhausted after {attempt} attempt(s): {msg}"
                    )));
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::new(3);
        let result = retry_with_backoff(&policy, || async { Ok::<_, GatewayError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GatewayError::Transient("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(GatewayError::Permanent("bad request".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlong_input_not_retried() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(GatewayError::OverlongInput("too long".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retry_budget() {
        let policy = RetryPolicy::new(2);
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(GatewayError::Transient("always flaky".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
