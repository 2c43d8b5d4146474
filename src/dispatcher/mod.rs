//! Bounded worker pool executing rate-gated outbound requests.
//!
//! The dispatcher owns a fixed number of workers, a bounded request queue,
//! and a pool of reusable one-shot response slots. Submitters block until
//! a worker completes their request; a saturated queue slows submitters down
//! instead of buffering unbounded work.

mod slot;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::error::{DispatcherError, Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::transport::Transport;
use crate::types::{Request, Response};

use slot::{ResponseSlot, SlotPool};

/// Dispatcher lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    /// Constructed but not started; submissions are rejected
    Idle,
    /// Workers active, queue accepting requests
    Running,
    /// Queue closed, all workers exited; terminal
    Closed,
}

impl DispatcherState {
    /// Convert the atomic representation to a DispatcherState
    fn from_u8(state: u8) -> Self {
        match state {
            0 => DispatcherState::Idle,
            1 => DispatcherState::Running,
            _ => DispatcherState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DispatcherState::Idle => 0,
            DispatcherState::Running => 1,
            DispatcherState::Closed => 2,
        }
    }
}

/// A request paired with its private result slot.
pub(crate) struct WorkEnvelope {
    pub(crate) request: Request,
    pub(crate) slot: Arc<ResponseSlot>,
}

/// Bounded worker pool executing rate-gated outbound requests.
///
/// All shared state is internally synchronized; the dispatcher is used
/// behind an `Arc` by any number of concurrent submitters. Lifecycle is
/// `Idle → Running → Closed`, driven by [`start`](Dispatcher::start) and
/// [`close`](Dispatcher::close); `Closed` is terminal.
pub struct Dispatcher {
    config: DispatcherConfig,
    limiter: RateLimiter,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    queue_tx: std::sync::Mutex<Option<mpsc::Sender<WorkEnvelope>>>,
    queue_rx: std::sync::Mutex<Option<mpsc::Receiver<WorkEnvelope>>>,
    workers: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    shutdown: CancellationToken,
    slots: SlotPool,
}

impl Dispatcher {
    /// Create a new dispatcher
    ///
    /// The dispatcher starts in `Idle` and rejects submissions until
    /// [`start`](Dispatcher::start) is called.
    pub fn new(
        config: DispatcherConfig,
        limiter: RateLimiter,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        // Slots in circulation are bounded by the queue plus in-flight work
        let max_idle = config.queue_capacity + config.workers;

        Self {
            config,
            limiter,
            transport,
            state: AtomicU8::new(DispatcherState::Idle.as_u8()),
            queue_tx: std::sync::Mutex::new(Some(tx)),
            queue_rx: std::sync::Mutex::new(Some(rx)),
            workers: std::sync::Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            slots: SlotPool::new(max_idle),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Transition `Idle → Running`, spawning the worker pool
    ///
    /// Idempotent: calling `start` while already running is a no-op. Must be
    /// called from within a Tokio runtime. Starting a closed dispatcher
    /// fails; re-opening is not supported.
    pub fn start(&self) -> Result<()> {
        match self.state.compare_exchange(
            DispatcherState::Idle.as_u8(),
            DispatcherState::Running.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(current) if current == DispatcherState::Running.as_u8() => return Ok(()),
            Err(_) => return Err(DispatcherError::Closed.into()),
        }

        let receiver = self
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(receiver) = receiver else {
            // A concurrent close() won the receiver; nothing to start
            return Err(DispatcherError::Closed.into());
        };
        let queue = Arc::new(tokio::sync::Mutex::new(receiver));

        let mut handles = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            let ctx = worker::WorkerContext {
                worker_id,
                queue: Arc::clone(&queue),
                limiter: self.limiter.clone(),
                transport: Arc::clone(&self.transport),
                shutdown: self.shutdown.clone(),
            };
            handles.push(tokio::spawn(worker::run_worker(ctx)));
        }

        tracing::info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "Dispatcher started"
        );

        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(handles);
        Ok(())
    }

    /// Submit a request and block until a worker delivers its result
    ///
    /// Backpressure: when the queue is full this call blocks in `send` until
    /// a worker frees a slot. Safe to call from any number of concurrent
    /// tasks; each accepted request is executed exactly once and its outcome
    /// delivered only to its submitter. `cancel` unblocks both the enqueue
    /// and the result wait, surfacing as [`Error::Cancelled`].
    pub async fn dispatch(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        match self.state() {
            DispatcherState::Idle => return Err(DispatcherError::NotStarted.into()),
            DispatcherState::Closed => return Err(DispatcherError::Closed.into()),
            DispatcherState::Running => {}
        }

        let sender = self
            .queue_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(sender) = sender else {
            return Err(DispatcherError::Closed.into());
        };

        let slot = self.slots.acquire();
        let envelope = WorkEnvelope {
            request,
            slot: Arc::clone(&slot),
        };

        tokio::select! {
            sent = sender.send(envelope) => {
                if sent.is_err() {
                    // Queue closed between the state check and the send
                    self.slots.release(slot);
                    return Err(DispatcherError::Closed.into());
                }
            }
            _ = cancel.cancelled() => {
                // Never enqueued; the slot is still clean
                self.slots.release(slot);
                return Err(Error::Cancelled);
            }
        }

        tokio::select! {
            outcome = slot.wait() => {
                self.slots.release(slot);
                outcome
            }
            _ = cancel.cancelled() => {
                // The worker may still deliver into this slot; abandoning it
                // (instead of recycling) keeps the late write unreadable.
                Err(Error::Cancelled)
            }
        }
    }

    /// Close the queue, drain all accepted work, and wait for workers to exit
    ///
    /// No accepted request is dropped: queued envelopes are still executed
    /// and their results delivered before the workers stop. Idle or
    /// already-closed dispatchers are a no-op. After `close` returns, no
    /// envelope is queued or in flight, and further `dispatch` calls fail
    /// deterministically.
    pub async fn close(&self) {
        let previous = DispatcherState::from_u8(
            self.state
                .swap(DispatcherState::Closed.as_u8(), Ordering::SeqCst),
        );
        if previous == DispatcherState::Closed {
            return;
        }

        // Dropping the sender closes the queue; workers drain what remains
        // and exit when the channel reports empty-and-closed.
        self.queue_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        let worker_count = handles.len();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch worker panicked");
            }
        }

        tracing::info!(workers = worker_count, "Dispatcher closed");
    }

    /// Cancellation token observed by workers while rate-gating
    ///
    /// Cancelling it makes workers fail remaining envelopes with
    /// [`Error::Cancelled`] instead of waiting out the limiter; used for
    /// forced shutdown.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
