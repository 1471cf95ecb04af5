//! Token-bucket rate limiting with bounded FIFO waiters, per spec §5:
//! "waiters are FIFO with a bounded queue and fail with `Transient` when the
//! queue is full."

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::GatewayError;

const QUEUE_CAPACITY_MULTIPLIER: usize = 8;
const REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// Bounds outbound concurrency (a `Semaphore` permit per in-flight request)
/// and outbound QPS (a token bucket refilled once per second to
/// `rate_limit_per_minute / 60` tokens, capped at `rate_limit_per_minute`).
pub struct RateLimiter {
    concurrency: Arc<Semaphore>,
    tokens: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    queue_capacity: usize,
    _refill_task: tokio::task::JoinHandle<()>,
}

/// Held for the duration of one gateway call; dropping it releases the
/// concurrency slot. The rate-limit token is consumed permanently at
/// `acquire()` time (via `forget()`) — only the refill task hands tokens
/// back, which is what makes this a bucket rather than a second concurrency
/// gate.
pub struct RateLimitGuard {
    _concurrency: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(rate_limit_per_minute: u32, max_concurrent_requests: usize) -> Self {
        let token_capacity = (rate_limit_per_minute as usize).max(1);
        let concurrency = Arc::new(Semaphore::new(max_concurrent_requests.max(1)));
        let tokens = Arc::new(Semaphore::new(token_capacity));
        let per_second = ((rate_limit_per_minute as usize) / 60).max(1);

        let refill_tokens = tokens.clone();
        let refill_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFILL_INTERVAL);
            loop {
                interval.tick().await;
                let available = refill_tokens.available_permits();
                let deficit = token_capacity.saturating_sub(available);
                let add = deficit.min(per_second);
                if add > 0 {
                    refill_tokens.add_permits(add);
                }
            }
        });

        Self {
            concurrency,
            tokens,
            waiting: Arc::new(AtomicUsize::new(0)),
            queue_capacity: max_concurrent_requests.max(1) * QUEUE_CAPACITY_MULTIPLIER,
            _refill_task: refill_task,
        }
    }

    /// Reserve one concurrency slot and one rate-limit token. Returns
    /// `Transient` immediately (no waiting) if the bounded waiter queue is
    /// already full.
    pub async fn acquire(&self) -> Result<RateLimitGuard, GatewayError> {
        let waiting = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        if waiting > self.queue_capacity {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(GatewayError::Transient(format!(
                "rate limiter queue full ({} waiters)",
                self.queue_capacity
            )));
        }

        let concurrency = self
            .concurrency
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| GatewayError::Transient(format!("concurrency semaphore closed: {e}")))?;
        let token = self
            .tokens
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| GatewayError::Transient(format!("token semaphore closed: {e}")))?;
        // Permanently consume the token — only the refill task replenishes
        // the bucket. Returning it on guard drop (the concurrency permit's
        // behavior) would make this cap a no-op, bounded only by how fast
        // concurrency slots cycle rather than by `rate_limit_per_minute`.
        token.forget();

        self.waiting.fetch_sub(1, Ordering::SeqCst);
        Ok(RateLimitGuard { _concurrency: concurrency })
    }

    /// Tokens immediately available in the rate-limit bucket. Exposed for
    /// tests; callers only need `acquire`.
    #[cfg(test)]
    fn available_tokens(&self) -> usize {
        self.tokens.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_under_capacity() {
        let limiter = RateLimiter::new(6000, 4);
        let g1 = limiter.acquire().await.unwrap();
        let g2 = limiter.acquire().await.unwrap();
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn concurrency_permits_are_released_on_drop() {
        let limiter = RateLimiter::new(6000, 1);
        {
            let _g = limiter.acquire().await.unwrap();
            assert_eq!(limiter.concurrency.available_permits(), 0);
        }
        tokio::task::yield_now().await;
        assert_eq!(limiter.concurrency.available_permits(), 1);
    }

    #[tokio::test]
    async fn rate_limit_tokens_are_not_returned_on_guard_drop() {
        // A high concurrency budget paired with a low QPS cap means the
        // token bucket, not the concurrency semaphore, is what should run
        // dry here — if acquire() leaked tokens back on drop this would
        // never observe a deficit.
        let limiter = RateLimiter::new(120, 100);
        assert_eq!(limiter.available_tokens(), 120);
        for _ in 0..120 {
            let g = limiter.acquire().await.unwrap();
            drop(g);
        }
        assert_eq!(limiter.available_tokens(), 0);
    }
}
