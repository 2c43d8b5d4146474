//! Shutdown coordination.

use crate::error::Result;
use crate::types::Event;

use super::CrawlDownloader;

impl CrawlDownloader {
    /// Gracefully shut down the downloader
    ///
    /// Shutdown sequence:
    /// 1. Stop accepting new crawls
    /// 2. Cancel the shared token, unblocking crawl producers, fanout
    ///    consumers, and any submitter waiting on the queue or a backoff
    /// 3. Signal dispatch workers to fail remaining envelopes instead of
    ///    waiting out the rate gate
    /// 4. Close the dispatcher: drain the request queue and join the workers
    /// 5. Emit the shutdown event
    ///
    /// Every envelope accepted before shutdown still receives an outcome;
    /// nothing is left blocked.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        tracing::info!("Stopped accepting new crawls");

        self.shutdown.cancel();
        self.dispatcher.shutdown_token().cancel();

        self.dispatcher.close().await;
        tracing::info!("Dispatcher drained and closed");

        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
