//! Page-by-page traversal of a paginated listing resource.
//!
//! The crawler fetches the current page through the retrying executor, hands
//! the body to the external extractor, publishes the extracted identifiers
//! onto the bounded identifier queue, and follows the next-page reference
//! until none remains, the page budget runs out, or an unrecoverable error
//! stops the traversal.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{CrawlError, Error, Result};
use crate::executor::RequestExecutor;
use crate::types::{Event, ItemId, Request};

/// What the extractor found on one listing page.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    /// Item identifiers listed on the page
    pub ids: Vec<ItemId>,
    /// Reference to the next page, possibly relative to the page that
    /// produced it
    pub next_page: Option<String>,
}

/// Abstraction over listing-page field extraction.
///
/// Parsing semantics are outside this crate; implementations receive the raw
/// page body and the URL that served it (post-redirect) and return the item
/// identifiers plus an optional next-page reference.
pub trait Extractor: Send + Sync {
    /// Extract identifiers and the next-page reference from a page body
    fn extract(&self, body: &str, page_url: &Url) -> Result<Extraction>;
}

/// Counters describing one finished traversal.
#[derive(Clone, Copy, Debug, Default)]
pub struct CrawlSummary {
    /// Listing pages fetched and extracted
    pub pages_fetched: u32,
    /// Identifiers published to the download queue
    pub ids_published: u64,
}

/// Drives the traversal of one seed URL.
///
/// `run` consumes the crawler; dropping the identifier sender on return is
/// what closes the queue, exactly once, however the traversal ends.
pub struct Crawler {
    executor: RequestExecutor,
    extractor: Arc<dyn Extractor>,
    ids: mpsc::Sender<ItemId>,
    events: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Crawler {
    /// Create a crawler publishing into `ids`
    pub fn new(
        executor: RequestExecutor,
        extractor: Arc<dyn Extractor>,
        ids: mpsc::Sender<ItemId>,
        events: broadcast::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            extractor,
            ids,
            events,
            cancel,
        }
    }

    /// Traverse the listing starting at `seed`, for at most `max_pages` pages
    ///
    /// Blocks until the traversal completes or fails. Identifiers published
    /// before a failure remain valid and are consumed downstream; the
    /// identifier queue is closed when this returns.
    pub async fn run(self, seed: Url, max_pages: u32) -> Result<CrawlSummary> {
        let mut summary = CrawlSummary::default();
        let mut current = seed.clone();
        let mut remaining = max_pages;

        tracing::info!(seed = %seed, max_pages, "Starting crawl traversal");

        while remaining > 0 {
            let request = Request::get(current.clone());
            let response = match self.executor.execute(request, &self.cancel).await {
                Ok(response) => response,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    return Err(CrawlError::PageFailed {
                        url: current.to_string(),
                        reason: e.to_string(),
                    }
                    .into());
                }
            };

            if !response.is_success() {
                // A 404 mid-chain just means the listing ran out
                tracing::info!(
                    url = %current,
                    status = response.status,
                    "Listing page returned a terminal status, ending traversal"
                );
                break;
            }

            // Post-redirect URL: next-page references resolve against the
            // host that actually served this page
            let page_url = response.final_url.clone();
            let extraction = self
                .extractor
                .extract(&response.text(), &page_url)
                .map_err(|e| CrawlError::ExtractionFailed {
                    url: page_url.to_string(),
                    reason: e.to_string(),
                })?;

            summary.pages_fetched += 1;
            remaining -= 1;

            let ids_found = extraction.ids.len();
            for id in extraction.ids {
                let published = id.clone();
                tokio::select! {
                    sent = self.ids.send(id) => {
                        if sent.is_err() {
                            tracing::warn!("Identifier queue dropped by consumers, ending traversal");
                            return Ok(summary);
                        }
                    }
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                }
                summary.ids_published += 1;
                self.events.send(Event::ItemDiscovered { id: published }).ok();
            }

            tracing::debug!(url = %page_url, ids_found, "Listing page extracted");
            self.events
                .send(Event::PageFetched {
                    url: page_url.to_string(),
                    ids_found,
                })
                .ok();

            match extraction.next_page {
                Some(next_ref) if remaining > 0 => {
                    current = page_url.join(&next_ref)?;
                }
                Some(_) => {
                    tracing::info!(
                        pages = summary.pages_fetched,
                        "Page budget exhausted with pages remaining upstream"
                    );
                    break;
                }
                None => {
                    tracing::info!(pages = summary.pages_fetched, "No next page reference");
                    break;
                }
            }
        }

        tracing::info!(
            pages = summary.pages_fetched,
            ids = summary.ids_published,
            "Crawl traversal finished"
        );
        Ok(summary)
    }
}
