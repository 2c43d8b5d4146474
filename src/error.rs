//! Error types for crawl-dl
//!
//! This module provides error handling for the library, including:
//! - The retry taxonomy (timeout vs throttle vs hard failure)
//! - Dispatcher lifecycle errors (not started, closed)
//! - Crawl traversal errors (page fetch, extraction)

use thiserror::Error;

/// Result type alias for crawl-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for crawl-dl
///
/// This is the primary error type used throughout the library. The first
/// three variants form the retry taxonomy consumed by
/// [`RequestExecutor`](crate::executor::RequestExecutor): timeouts and
/// throttling are retryable, everything else is not.
#[derive(Debug, Error)]
pub enum Error {
    /// Cancellation was requested while the caller was blocked
    #[error("operation cancelled")]
    Cancelled,

    /// The transport timed out before a response arrived (retryable)
    #[error("transport timeout")]
    TransportTimeout,

    /// The upstream responded with an explicit throttling signal (HTTP 429, retryable)
    #[error("throttled by upstream (HTTP 429)")]
    Throttled,

    /// All retry attempts were consumed by timeouts or throttling
    #[error("retries exhausted after {attempts} attempt(s)")]
    RetriesExhausted {
        /// Number of attempts performed before giving up
        attempts: u32,
    },

    /// The upstream returned a failure status that a collaborator chose to treat as fatal
    #[error("upstream returned HTTP {status}")]
    Upstream {
        /// The HTTP status code received
        status: u16,
    },

    /// Dispatcher lifecycle error
    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherError),

    /// Crawl traversal error
    #[error("crawl error: {0}")]
    Crawl(#[from] CrawlError),

    /// Failed to hand a completed artifact to the sink
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Shutdown in progress - not accepting new crawls
    #[error("shutdown in progress: not accepting new crawls")]
    ShuttingDown,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "dispatcher.workers")
        key: Option<String>,
    },

    /// Network error that is neither a timeout nor a throttle signal
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A URL could not be parsed or a next-page reference could not be resolved
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Dispatcher lifecycle errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// `dispatch` was called before `start`
    #[error("dispatcher has not been started")]
    NotStarted,

    /// `dispatch` was called after `close`, or `start` on a closed dispatcher
    #[error("dispatcher is closed")]
    Closed,
}

/// Crawl traversal errors
#[derive(Debug, Error)]
pub enum CrawlError {
    /// A listing page could not be fetched after bounded retries
    #[error("failed to fetch page {url}: {reason}")]
    PageFailed {
        /// The page URL that could not be fetched
        url: String,
        /// Why the fetch failed
        reason: String,
    },

    /// The extractor could not make sense of a fetched page
    #[error("failed to extract page {url}: {reason}")]
    ExtractionFailed {
        /// The page URL whose body could not be extracted
        url: String,
        /// Why extraction failed
        reason: String,
    },
}

impl Error {
    /// Returns true if the error is transient and the request should be retried
    ///
    /// Only transport timeouts and explicit throttling are retryable; hard
    /// transport failures, cancellation, and domain errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransportTimeout | Error::Throttled)
    }
}
