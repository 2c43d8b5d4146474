//! Download fanout — fixed pool of consumers draining the identifier queue.
//!
//! Each consumer takes identifiers until the queue is closed and empty,
//! skips those whose artifact already exists, and otherwise runs the fetch
//! sequence through the shared executor before handing the artifact to the
//! sink. A failed item is reported and the consumer moves on.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FanoutConfig;
use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::sink::Sink;
use crate::types::{Artifact, Event, ItemId, Request};

/// Abstraction over the per-item fetch sequence.
///
/// An item may take more than one request to materialize (detail page plus
/// asset, say); implementations run every hop through the shared executor so
/// the whole sequence stays rate-gated and retried.
#[async_trait::async_trait]
pub trait ItemFetcher: Send + Sync {
    /// Fetch the artifact for one identifier
    async fn fetch(
        &self,
        id: &ItemId,
        executor: &RequestExecutor,
        cancel: &CancellationToken,
    ) -> Result<Artifact>;
}

/// Default [`ItemFetcher`]: one GET against `item_base` joined with the id.
pub struct PageFetcher {
    item_base: Url,
}

impl PageFetcher {
    /// Create a fetcher resolving ids against `item_base`
    ///
    /// `item_base` should end with a trailing slash so ids join as children
    /// (`https://host/items/` + `a` → `https://host/items/a`).
    pub fn new(item_base: Url) -> Self {
        Self { item_base }
    }
}

#[async_trait::async_trait]
impl ItemFetcher for PageFetcher {
    async fn fetch(
        &self,
        id: &ItemId,
        executor: &RequestExecutor,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let url = self.item_base.join(id.as_str())?;
        let response = executor.execute(Request::get(url), cancel).await?;
        if !response.is_success() {
            return Err(Error::Upstream {
                status: response.status,
            });
        }
        Ok(Artifact {
            data: response.body,
            content_type: response.content_type,
            source: response.final_url,
        })
    }
}

/// Counters describing one drained fanout.
#[derive(Clone, Copy, Debug, Default)]
pub struct FanoutSummary {
    /// Items fetched and persisted
    pub completed: u64,
    /// Items skipped because their artifact already existed
    pub skipped: u64,
    /// Items that failed to fetch or persist
    pub failed: u64,
}

impl FanoutSummary {
    fn merge(&mut self, other: FanoutSummary) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Fixed pool of download consumers over a shared identifier queue.
pub struct DownloadFanout {
    executor: RequestExecutor,
    fetcher: Arc<dyn ItemFetcher>,
    sink: Arc<dyn Sink>,
    events: broadcast::Sender<Event>,
    cancel: CancellationToken,
    workers: usize,
}

/// Everything one consumer needs, cloned out of the fanout at spawn time.
struct ConsumerContext {
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<ItemId>>>,
    executor: RequestExecutor,
    fetcher: Arc<dyn ItemFetcher>,
    sink: Arc<dyn Sink>,
    events: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl DownloadFanout {
    /// Create a fanout with `config.workers` consumers
    pub fn new(
        config: &FanoutConfig,
        executor: RequestExecutor,
        fetcher: Arc<dyn ItemFetcher>,
        sink: Arc<dyn Sink>,
        events: broadcast::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            fetcher,
            sink,
            events,
            cancel,
            workers: config.workers,
        }
    }

    /// Drain the identifier queue until it is closed and empty
    ///
    /// Spawns the consumer pool, waits for every consumer to exit, and
    /// returns the merged counters.
    pub async fn run(self, ids: mpsc::Receiver<ItemId>) -> FanoutSummary {
        let queue = Arc::new(Mutex::new(ids));

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let ctx = ConsumerContext {
                worker_id,
                queue: Arc::clone(&queue),
                executor: self.executor.clone(),
                fetcher: Arc::clone(&self.fetcher),
                sink: Arc::clone(&self.sink),
                events: self.events.clone(),
                cancel: self.cancel.clone(),
            };
            handles.push(tokio::spawn(run_consumer(ctx)));
        }

        let mut summary = FanoutSummary::default();
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(worker_summary) => summary.merge(worker_summary),
                Err(e) => tracing::error!(error = %e, "Download consumer panicked"),
            }
        }

        tracing::info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Download fanout drained"
        );
        summary
    }
}

async fn run_consumer(ctx: ConsumerContext) -> FanoutSummary {
    tracing::info!(worker_id = ctx.worker_id, "Download consumer started");
    let mut summary = FanoutSummary::default();

    loop {
        let id = {
            let mut queue = ctx.queue.lock().await;
            queue.recv().await
        };
        let Some(id) = id else { break };

        if ctx.cancel.is_cancelled() {
            tracing::info!(
                worker_id = ctx.worker_id,
                "Shutdown requested, consumer exiting"
            );
            break;
        }

        if ctx.sink.exists(&id).await {
            tracing::debug!(id = %id, "Artifact already present, skipping");
            summary.skipped += 1;
            ctx.events.send(Event::ItemSkipped { id }).ok();
            continue;
        }

        match ctx.fetcher.fetch(&id, &ctx.executor, &ctx.cancel).await {
            Ok(artifact) => match ctx.sink.persist(&id, artifact).await {
                Ok(()) => {
                    tracing::debug!(id = %id, "Item completed");
                    summary.completed += 1;
                    ctx.events.send(Event::ItemCompleted { id }).ok();
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Failed to persist item");
                    summary.failed += 1;
                    ctx.events
                        .send(Event::ItemFailed {
                            id,
                            reason: e.to_string(),
                        })
                        .ok();
                }
            },
            Err(Error::Cancelled) => {
                tracing::info!(
                    worker_id = ctx.worker_id,
                    id = %id,
                    "Fetch cancelled, consumer exiting"
                );
                break;
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Failed to fetch item");
                summary.failed += 1;
                ctx.events
                    .send(Event::ItemFailed {
                        id,
                        reason: e.to_string(),
                    })
                    .ok();
            }
        }
    }

    tracing::info!(
        worker_id = ctx.worker_id,
        completed = summary.completed,
        skipped = summary.skipped,
        failed = summary.failed,
        "Download consumer stopped"
    );
    summary
}
