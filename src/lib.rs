//! # crawl-dl
//!
//! Rate-limited, bounded-concurrency crawl and download pipeline library.
//!
//! ## Design Philosophy
//!
//! crawl-dl is designed to be:
//! - **Polite by construction** - a shared token-bucket gate bounds the
//!   request rate across every worker; bounded queues apply backpressure
//!   instead of buffering unbounded work
//! - **Restartable** - identifiers whose artifact already exists are skipped
//!   without touching the network
//! - **Library-first** - no CLI or UI; parsing and persistence are injected
//!   at narrow trait seams (`Transport`, `Extractor`, `ItemFetcher`, `Sink`)
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use crawl_dl::{
//!     Config, CrawlDownloader, Extraction, Extractor, FileSink, HttpTransport, PageFetcher,
//! };
//! use url::Url;
//!
//! struct MyExtractor;
//!
//! impl Extractor for MyExtractor {
//!     fn extract(&self, _body: &str, _page: &Url) -> crawl_dl::Result<Extraction> {
//!         // Parsing semantics live outside the library
//!         Ok(Extraction::default())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let downloader = CrawlDownloader::new(
//!         config.clone(),
//!         Arc::new(HttpTransport::new(&config.http)?),
//!         Arc::new(MyExtractor),
//!         Arc::new(PageFetcher::new(Url::parse("https://example.com/items/")?)),
//!         Arc::new(FileSink::new("./artifacts")),
//!     )?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = downloader
//!         .crawl(Url::parse("https://example.com/list")?, 100)
//!         .await?;
//!     println!("{} items persisted", report.items_completed);
//!
//!     downloader.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Pagination traversal of listing pages
pub mod crawler;
/// Bounded worker pool executing rate-gated requests
pub mod dispatcher;
/// Top-level orchestrator
pub mod downloader;
/// Error types
pub mod error;
/// Bounded-attempt retry around the dispatcher
pub mod executor;
/// Download fanout draining the identifier queue
pub mod fanout;
/// Token-bucket request rate limiting
pub mod rate_limiter;
/// Artifact persistence boundary
pub mod sink;
/// Transport boundary
pub mod transport;
/// Core types and events
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{
    Config, CrawlConfig, DispatcherConfig, FanoutConfig, HttpConfig, RateLimitConfig, RetryConfig,
};
pub use crawler::{CrawlSummary, Crawler, Extraction, Extractor};
pub use dispatcher::{Dispatcher, DispatcherState};
pub use downloader::{CrawlDownloader, CrawlReport};
pub use error::{CrawlError, DispatcherError, Error, Result};
pub use executor::RequestExecutor;
pub use fanout::{DownloadFanout, FanoutSummary, ItemFetcher, PageFetcher};
pub use rate_limiter::RateLimiter;
pub use sink::{FileSink, Sink};
pub use transport::{HttpTransport, Transport};
pub use types::{Artifact, Event, ItemId, Request, Response};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's
/// `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(downloader: CrawlDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
