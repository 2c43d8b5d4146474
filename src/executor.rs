//! Bounded-attempt retry around the dispatcher
//!
//! The dispatcher executes each request exactly once; this module owns the
//! retry policy. Transport timeouts and HTTP 429 are the only retryable
//! outcomes, each with its own fixed backoff. Everything else — hard
//! transport failures, cancellation, ordinary non-2xx statuses — passes
//! through on the first attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::types::{Request, Response};

/// Retrying wrapper over [`Dispatcher::dispatch`]
///
/// Policy, per attempt:
/// - transport timeout → sleep `timeout_backoff`, retry
/// - HTTP 429 → sleep `throttle_backoff` (shorter), retry
/// - any other transport error → fail immediately
/// - any other response, 2xx or not → returned as-is; judging a 404 is the
///   caller's business
/// - attempts exhausted → [`Error::RetriesExhausted`]
///
/// `max_attempts` below 1 behaves as 1: every request is attempted at least
/// once.
#[derive(Clone)]
pub struct RequestExecutor {
    dispatcher: Arc<Dispatcher>,
    retry: RetryConfig,
}

impl RequestExecutor {
    /// Create an executor over the given dispatcher
    pub fn new(dispatcher: Arc<Dispatcher>, retry: RetryConfig) -> Self {
        Self { dispatcher, retry }
    }

    /// The dispatcher this executor submits to
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Execute a request with bounded retries
    ///
    /// Backoff sleeps race against `cancel`, so a shutdown never waits out a
    /// backoff window.
    pub async fn execute(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.dispatcher.dispatch(request.clone(), cancel).await {
                Ok(response) if response.status == 429 => {
                    if attempt >= max_attempts {
                        tracing::error!(
                            url = %request.url(),
                            attempts = attempt,
                            "Still throttled after all retry attempts"
                        );
                        return Err(Error::RetriesExhausted { attempts: attempt });
                    }
                    tracing::warn!(
                        url = %request.url(),
                        attempt,
                        max_attempts,
                        backoff_ms = self.retry.throttle_backoff.as_millis(),
                        "Upstream throttled request, backing off"
                    );
                    self.backoff(self.retry.throttle_backoff, cancel).await?;
                }
                Ok(response) => {
                    if attempt > 1 {
                        tracing::info!(
                            url = %request.url(),
                            attempts = attempt,
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(Error::Throttled) => {
                    // Some transports surface 429 as an error instead of a
                    // response; same policy either way
                    if attempt >= max_attempts {
                        return Err(Error::RetriesExhausted { attempts: attempt });
                    }
                    tracing::warn!(
                        url = %request.url(),
                        attempt,
                        max_attempts,
                        backoff_ms = self.retry.throttle_backoff.as_millis(),
                        "Upstream throttled request, backing off"
                    );
                    self.backoff(self.retry.throttle_backoff, cancel).await?;
                }
                Err(Error::TransportTimeout) => {
                    if attempt >= max_attempts {
                        tracing::error!(
                            url = %request.url(),
                            attempts = attempt,
                            "Request timed out on every retry attempt"
                        );
                        return Err(Error::RetriesExhausted { attempts: attempt });
                    }
                    tracing::warn!(
                        url = %request.url(),
                        attempt,
                        max_attempts,
                        backoff_ms = self.retry.timeout_backoff.as_millis(),
                        "Transport timeout, backing off"
                    );
                    self.backoff(self.retry.timeout_backoff, cancel).await?;
                }
                Err(e) => {
                    // Hard failure (or cancellation): not ours to retry
                    return Err(e);
                }
            }
        }
    }

    /// Sleep out a backoff window, aborting early on cancellation
    async fn backoff(&self, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        let delay = if self.retry.jitter {
            add_jitter(delay)
        } else {
            delay
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatcherConfig, RateLimitConfig};
    use crate::rate_limiter::RateLimiter;
    use crate::test_helpers::{StubTransport, response_for};
    use std::time::Instant;
    use url::Url;

    fn executor_with(transport: Arc<StubTransport>, retry: RetryConfig) -> RequestExecutor {
        let limiter = RateLimiter::new(&RateLimitConfig {
            rate: 10_000,
            interval: Duration::from_secs(1),
            burst: 10_000,
        });
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig {
                workers: 2,
                queue_capacity: 8,
            },
            limiter,
            transport,
        ));
        dispatcher.start().unwrap();
        RequestExecutor::new(dispatcher, retry)
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            timeout_backoff: Duration::from_millis(20),
            throttle_backoff: Duration::from_millis(10),
            jitter: false,
        }
    }

    fn request() -> Request {
        Request::get(Url::parse("https://example.com/page").unwrap())
    }

    #[tokio::test]
    async fn success_on_third_attempt_after_two_timeouts() {
        let transport = StubTransport::new(|request, call| {
            if call <= 2 {
                Err(Error::TransportTimeout)
            } else {
                Ok(response_for(request, 200, "finally"))
            }
        })
        .into_arc();
        let executor = executor_with(Arc::clone(&transport), fast_retry(3));

        let cancel = CancellationToken::new();
        let response = executor.execute(request(), &cancel).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "finally");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn persistent_timeouts_exhaust_after_exactly_max_attempts() {
        let transport = StubTransport::new(|_, _| Err(Error::TransportTimeout)).into_arc();
        let executor = executor_with(Arc::clone(&transport), fast_retry(3));

        let cancel = CancellationToken::new();
        let result = executor.execute(request(), &cancel).await;

        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 3 })));
        assert_eq!(transport.calls(), 3, "exactly 3 attempts, no more");
    }

    #[tokio::test]
    async fn throttled_request_is_retried() {
        let transport = StubTransport::new(|request, call| {
            if call == 1 {
                Ok(response_for(request, 429, "slow down"))
            } else {
                Ok(response_for(request, 200, "ok"))
            }
        })
        .into_arc();
        let executor = executor_with(Arc::clone(&transport), fast_retry(3));

        let cancel = CancellationToken::new();
        let response = executor.execute(request(), &cancel).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn throttle_backoff_is_the_shorter_one() {
        let retry = RetryConfig {
            max_attempts: 3,
            timeout_backoff: Duration::from_millis(400),
            throttle_backoff: Duration::from_millis(40),
            jitter: false,
        };
        let transport = StubTransport::new(|request, call| {
            if call == 1 {
                Ok(response_for(request, 429, ""))
            } else {
                Ok(response_for(request, 200, ""))
            }
        })
        .into_arc();
        let executor = executor_with(transport, retry);

        let cancel = CancellationToken::new();
        let start = Instant::now();
        executor.execute(request(), &cancel).await.unwrap();
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(30),
            "throttle backoff should be observed, elapsed {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_millis(300),
            "a 429 must use the short backoff, not the timeout one; elapsed {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn persistent_throttling_exhausts_retries() {
        let transport =
            StubTransport::new(|request, _| Ok(response_for(request, 429, ""))).into_arc();
        let executor = executor_with(Arc::clone(&transport), fast_retry(3));

        let cancel = CancellationToken::new();
        let result = executor.execute(request(), &cancel).await;

        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 3 })));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn transport_level_throttle_errors_are_retried_too() {
        let transport = StubTransport::new(|request, call| {
            if call == 1 {
                Err(Error::Throttled)
            } else {
                Ok(response_for(request, 200, "ok"))
            }
        })
        .into_arc();
        let executor = executor_with(Arc::clone(&transport), fast_retry(3));

        let cancel = CancellationToken::new();
        let response = executor.execute(request(), &cancel).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn hard_transport_errors_fail_immediately() {
        let transport =
            StubTransport::new(|_, _| Err(Error::Other("connection refused".to_string())))
                .into_arc();
        let executor = executor_with(Arc::clone(&transport), fast_retry(5));

        let cancel = CancellationToken::new();
        let result = executor.execute(request(), &cancel).await;

        assert!(matches!(result, Err(Error::Other(_))));
        assert_eq!(transport.calls(), 1, "hard failures are not retried");
    }

    #[tokio::test]
    async fn non_success_statuses_are_not_the_executors_business() {
        let transport =
            StubTransport::new(|request, _| Ok(response_for(request, 404, "absent"))).into_arc();
        let executor = executor_with(Arc::clone(&transport), fast_retry(5));

        let cancel = CancellationToken::new();
        let response = executor.execute(request(), &cancel).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn zero_max_attempts_still_attempts_once() {
        let transport = StubTransport::new(|_, _| Err(Error::TransportTimeout)).into_arc();
        let executor = executor_with(Arc::clone(&transport), fast_retry(0));

        let cancel = CancellationToken::new();
        let result = executor.execute(request(), &cancel).await;

        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 1 })));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_cuts_a_backoff_short() {
        let retry = RetryConfig {
            max_attempts: 3,
            timeout_backoff: Duration::from_secs(30),
            throttle_backoff: Duration::from_secs(30),
            jitter: false,
        };
        let transport = StubTransport::new(|_, _| Err(Error::TransportTimeout)).into_arc();
        let executor = executor_with(transport, retry);

        let cancel = CancellationToken::new();
        let handle = {
            let executor = executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { executor.execute(request(), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled backoff must not run to completion")
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(
                jittered >= delay,
                "iteration {i}: jittered {jittered:?} < base delay {delay:?}"
            );
            assert!(
                jittered <= delay * 2,
                "iteration {i}: jittered {jittered:?} > 2x base delay"
            );
        }
    }
}
