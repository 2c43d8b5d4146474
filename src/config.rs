//! Configuration types for crawl-dl

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
///
/// Every knob has a sensible default; `Config::default()` produces a working
/// setup for a polite crawl. Durations serialize as integer milliseconds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool and request queue settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Shared token-bucket rate limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy for timeouts and throttling
    #[serde(default)]
    pub retry: RetryConfig,

    /// Crawl traversal settings
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Download fanout settings
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// Worker pool and request queue configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of concurrent dispatch workers (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Request queue capacity; a full queue blocks submitters (default: 16)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 16,
        }
    }
}

/// Token-bucket rate limit configuration
///
/// `rate` tokens are refilled per `interval`, capped at `burst`. Every
/// dispatched request consumes one token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens refilled per interval (default: 5)
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// Refill interval (default: 1 second)
    #[serde(default = "default_interval", with = "duration_ms_serde")]
    pub interval: Duration,

    /// Maximum tokens the bucket can hold; bounds burst size (default: 5)
    #[serde(default = "default_burst")]
    pub burst: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 5,
            interval: Duration::from_secs(1),
            burst: 5,
        }
    }
}

/// Retry policy configuration
///
/// The throttle backoff is deliberately shorter than the timeout backoff: a
/// 429 tells us the upstream is alive and counting, a timeout tells us
/// nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per request; values below 1 behave as 1 (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff after a transport timeout (default: 1 second)
    #[serde(default = "default_timeout_backoff", with = "duration_ms_serde")]
    pub timeout_backoff: Duration,

    /// Backoff after an HTTP 429 (default: 500 milliseconds)
    #[serde(default = "default_throttle_backoff", with = "duration_ms_serde")]
    pub throttle_backoff: Duration,

    /// Add random jitter to backoff delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_backoff: Duration::from_secs(1),
            throttle_backoff: Duration::from_millis(500),
            jitter: false,
        }
    }
}

/// Crawl traversal configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Identifier queue capacity; a full queue blocks the crawl producer (default: 64)
    #[serde(default = "default_id_queue_capacity")]
    pub id_queue_capacity: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            id_queue_capacity: 64,
        }
    }
}

/// Download fanout configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Number of concurrent download consumers (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// HTTP transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request transport timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_ms_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Validate the configuration
    ///
    /// Returns `Error::Config` naming the offending key for the first
    /// problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.dispatcher.workers == 0 {
            return Err(Error::Config {
                message: "dispatcher needs at least one worker".to_string(),
                key: Some("dispatcher.workers".to_string()),
            });
        }
        if self.dispatcher.queue_capacity == 0 {
            return Err(Error::Config {
                message: "request queue capacity must be at least 1".to_string(),
                key: Some("dispatcher.queue_capacity".to_string()),
            });
        }
        if self.rate_limit.rate == 0 {
            return Err(Error::Config {
                message: "rate limit must allow at least one request per interval".to_string(),
                key: Some("rate_limit.rate".to_string()),
            });
        }
        if self.rate_limit.burst == 0 {
            return Err(Error::Config {
                message: "burst capacity must be at least 1".to_string(),
                key: Some("rate_limit.burst".to_string()),
            });
        }
        if self.rate_limit.interval.is_zero() {
            return Err(Error::Config {
                message: "rate limit interval must be non-zero".to_string(),
                key: Some("rate_limit.interval".to_string()),
            });
        }
        if self.crawl.id_queue_capacity == 0 {
            return Err(Error::Config {
                message: "identifier queue capacity must be at least 1".to_string(),
                key: Some("crawl.id_queue_capacity".to_string()),
            });
        }
        if self.fanout.workers == 0 {
            return Err(Error::Config {
                message: "fanout needs at least one worker".to_string(),
                key: Some("fanout.workers".to_string()),
            });
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    16
}

fn default_rate() -> u64 {
    5
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_burst() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_throttle_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_id_queue_capacity() -> usize {
    64
}

fn default_user_agent() -> String {
    format!("crawl-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (integer milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
