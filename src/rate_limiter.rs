//! Request rate limiting using token bucket algorithm
//!
//! The RateLimiter provides a single request-rate gate shared across all
//! dispatch workers using an efficient lock-free token bucket implementation.

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Global request-rate limiter shared across all dispatch workers
///
/// Uses a token bucket algorithm: `rate` tokens refill per `interval`, capped
/// at `burst`. Every dispatched request consumes one token, so short bursts
/// up to `burst` are allowed without violating the steady-state rate.
///
/// # Implementation
///
/// Uses AtomicU64 for lock-free token tracking:
/// - `rate`: tokens refilled per interval (runtime adjustable)
/// - `tokens`: available tokens (requests that may proceed now)
/// - `last_refill`: timestamp of last token refill (nanoseconds since an
///   arbitrary monotonic epoch)
///
/// Contending acquirers are not served in FIFO order, but every blocked
/// acquirer re-checks the bucket on a bounded sleep, so none can starve.
#[derive(Clone)]
pub struct RateLimiter {
    /// Tokens refilled per interval
    rate: Arc<AtomicU64>,
    /// Refill interval in nanoseconds
    interval_nanos: u64,
    /// Maximum tokens the bucket can hold
    burst: u64,
    /// Available tokens
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since arbitrary epoch)
    last_refill: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Create a new RateLimiter from configuration
    ///
    /// The bucket starts full, so the first `burst` acquisitions proceed
    /// immediately.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            rate: Arc::new(AtomicU64::new(config.rate)),
            interval_nanos: config.interval.as_nanos() as u64,
            burst: config.burst,
            tokens: Arc::new(AtomicU64::new(config.burst)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Set a new refill rate (tokens per interval)
    ///
    /// Takes effect on the next refill; acquirers blocked in [`acquire`]
    /// pick it up on their next wakeup.
    ///
    /// [`acquire`]: RateLimiter::acquire
    pub fn set_rate(&self, rate: u64) {
        self.rate.store(rate.max(1), Ordering::SeqCst);
    }

    /// Get the current refill rate (tokens per interval)
    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    /// Acquire one token, blocking until one is available or `cancel` fires
    ///
    /// Returns `Err(Error::Cancelled)` if the token is cancelled while
    /// waiting; the caller is never silently dropped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            if current > 0 {
                if self
                    .tokens
                    .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Ok(());
                }
                // CAS lost to another worker — retry immediately
                continue;
            }

            // No tokens available — wait roughly one token's worth of refill.
            // Cap the sleep so rate changes and cancellation are picked up
            // promptly.
            let rate = self.rate.load(Ordering::Relaxed).max(1);
            let per_token_ms = (self.interval_nanos / rate / 1_000_000).clamp(10, 100);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(per_token_ms)) => {}
            }
        }
    }

    /// Refill tokens based on elapsed time since last refill
    fn refill_tokens(&self) {
        let rate = self.rate.load(Ordering::Relaxed);
        if rate == 0 {
            return;
        }

        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);

        let elapsed_nanos = now.saturating_sub(last);
        let tokens_to_add = (elapsed_nanos as u128 * rate as u128 / self.interval_nanos as u128) as u64;

        if tokens_to_add > 0 {
            // Advance last_refill by exactly the time the added tokens account
            // for; sub-token remainders keep accruing toward the next refill.
            let consumed_nanos =
                (tokens_to_add as u128 * self.interval_nanos as u128 / rate as u128) as u64;
            if self
                .last_refill
                .compare_exchange(last, last + consumed_nanos, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let current_tokens = self.tokens.load(Ordering::SeqCst);
                let new_tokens = (current_tokens + tokens_to_add).min(self.burst);
                self.tokens.store(new_tokens, Ordering::SeqCst);
            }
        }
    }

    /// Get current monotonic time in nanoseconds
    ///
    /// The epoch is arbitrary but consistent within a process lifetime.
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}
