//! Dispatch worker loop.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::rate_limiter::RateLimiter;
use crate::transport::Transport;

use super::WorkEnvelope;

/// Everything one worker needs, cloned out of the dispatcher at spawn time.
pub(super) struct WorkerContext {
    pub(super) worker_id: usize,
    pub(super) queue: Arc<Mutex<mpsc::Receiver<WorkEnvelope>>>,
    pub(super) limiter: RateLimiter,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) shutdown: CancellationToken,
}

/// Run one dispatch worker until the queue is closed and drained.
///
/// The loop is deliberately minimal: rate-gate, execute once, deliver. Retry
/// policy lives in [`RequestExecutor`](crate::executor::RequestExecutor), not
/// here. Workers share nothing mutable except the limiter and the queue.
pub(super) async fn run_worker(ctx: WorkerContext) {
    tracing::info!(worker_id = ctx.worker_id, "Dispatch worker started");

    loop {
        // The receiver lock is only held while waiting for the next envelope,
        // so idle workers queue up on the lock, not on each other's requests.
        let envelope = {
            let mut queue = ctx.queue.lock().await;
            queue.recv().await
        };

        let Some(WorkEnvelope { request, slot }) = envelope else {
            // Queue closed and fully drained
            break;
        };

        tracing::debug!(
            worker_id = ctx.worker_id,
            url = %request.url(),
            "Executing request"
        );

        // A shutdown-cancelled gate still delivers an outcome; no submitter
        // is left waiting on an envelope that will never complete.
        let outcome = match ctx.limiter.acquire(&ctx.shutdown).await {
            Ok(()) => ctx.transport.execute(&request).await,
            Err(e) => Err(e),
        };

        slot.deliver(outcome).await;
    }

    tracing::info!(worker_id = ctx.worker_id, "Dispatch worker stopped");
}
