//! Top-level orchestrator tying the pipeline together.
//!
//! The `CrawlDownloader` owns the dispatcher, rate limiter, and retry
//! executor, and wires one crawl producer to a pool of download consumers
//! per seed. Collaborators (transport, extractor, item fetcher, sink) are
//! injected as trait objects.

mod lifecycle;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::Config;
use crate::crawler::{Crawler, Extractor};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::fanout::{DownloadFanout, ItemFetcher};
use crate::rate_limiter::RateLimiter;
use crate::sink::Sink;
use crate::transport::Transport;
use crate::types::Event;

/// Outcome of one seed crawl: traversal and fanout counters plus timing.
#[derive(Clone, Debug)]
pub struct CrawlReport {
    /// The seed URL the traversal started from
    pub seed: Url,
    /// Listing pages fetched and extracted
    pub pages_fetched: u32,
    /// Identifiers published to the download queue
    pub ids_published: u64,
    /// Items fetched and persisted
    pub items_completed: u64,
    /// Items skipped because their artifact already existed
    pub items_skipped: u64,
    /// Items that failed to fetch or persist
    pub items_failed: u64,
    /// When the crawl started
    pub started_at: DateTime<Utc>,
    /// When the fanout finished draining
    pub finished_at: DateTime<Utc>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct CrawlDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Shared bounded worker pool all requests flow through
    pub(crate) dispatcher: Arc<Dispatcher>,
    /// Retrying executor over the dispatcher
    pub(crate) executor: RequestExecutor,
    /// Shared token-bucket gate (runtime adjustable)
    pub(crate) limiter: RateLimiter,
    /// Listing-page extractor
    pub(crate) extractor: Arc<dyn Extractor>,
    /// Per-item fetch sequence
    pub(crate) fetcher: Arc<dyn ItemFetcher>,
    /// Artifact persistence
    pub(crate) sink: Arc<dyn Sink>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Cancelled on shutdown; unblocks producers, consumers, and submitters
    pub(crate) shutdown: CancellationToken,
    /// Flag to indicate whether new crawls are accepted (false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl CrawlDownloader {
    /// Create a new CrawlDownloader instance
    ///
    /// Validates the configuration and wires the rate limiter, dispatcher,
    /// and retry executor. Workers are spawned lazily by the first crawl.
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        extractor: Arc<dyn Extractor>,
        fetcher: Arc<dyn ItemFetcher>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self> {
        config.validate()?;

        // Buffered so slow subscribers do not stall the pipeline; a
        // subscriber that falls behind sees RecvError::Lagged
        let (event_tx, _rx) = broadcast::channel(1024);

        let limiter = RateLimiter::new(&config.rate_limit);
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher.clone(),
            limiter.clone(),
            transport,
        ));
        let executor = RequestExecutor::new(Arc::clone(&dispatcher), config.retry.clone());

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            executor,
            limiter,
            extractor,
            fetcher,
            sink,
            event_tx,
            shutdown: CancellationToken::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Crawl one seed end-to-end
    ///
    /// Runs the listing traversal as the producer and a consumer pool
    /// draining the identifier queue, sharing the dispatcher and rate gate.
    /// Blocks until the traversal ends AND every published identifier has
    /// been handled. A traversal error is returned after the fanout drains,
    /// so partial progress is always persisted.
    pub async fn crawl(&self, seed: Url, max_pages: u32) -> Result<CrawlReport> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        self.dispatcher.start()?;

        let started_at = Utc::now();
        let (ids_tx, ids_rx) = mpsc::channel(self.config.crawl.id_queue_capacity);

        let fanout = DownloadFanout::new(
            &self.config.fanout,
            self.executor.clone(),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.sink),
            self.event_tx.clone(),
            self.shutdown.clone(),
        );
        let fanout_handle = tokio::spawn(fanout.run(ids_rx));

        let crawler = Crawler::new(
            self.executor.clone(),
            Arc::clone(&self.extractor),
            ids_tx,
            self.event_tx.clone(),
            self.shutdown.clone(),
        );
        let crawl_result = crawler.run(seed.clone(), max_pages).await;

        // The queue is closed now; wait for the consumers to drain it so
        // already-published identifiers are handled even when the traversal
        // failed partway.
        let fanout_summary = fanout_handle
            .await
            .map_err(|e| Error::Other(format!("download fanout task panicked: {e}")))?;

        let summary = crawl_result?;

        self.emit_event(Event::CrawlFinished {
            seed: seed.to_string(),
            pages_fetched: summary.pages_fetched,
            ids_published: summary.ids_published,
        });

        Ok(CrawlReport {
            seed,
            pages_fetched: summary.pages_fetched,
            ids_published: summary.ids_published,
            items_completed: fanout_summary.completed,
            items_skipped: fanout_summary.skipped,
            items_failed: fanout_summary.failed,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Subscribe to crawl and download events
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. A subscriber more than 1024 events behind receives
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The shared rate limiter, for runtime rate adjustments
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// the pipeline never depends on anyone listening.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
