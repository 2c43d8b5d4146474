//! Pooled one-shot response slots.
//!
//! Every submitted request is paired with a private slot that receives
//! exactly one outcome and is read exactly once. Slots are recycled through
//! a pool instead of being allocated per request.

use crate::error::Result;
use crate::types::Response;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// A single-use result cell: one write, one read, then eligible for reuse.
pub(crate) struct ResponseSlot {
    cell: Mutex<Option<Result<Response>>>,
    signal: Notify,
}

impl ResponseSlot {
    fn new() -> Self {
        Self {
            cell: Mutex::new(None),
            signal: Notify::new(),
        }
    }

    /// Write the outcome and wake the waiter.
    ///
    /// Must be called at most once per checkout; the pool only hands out
    /// slots whose cell is empty.
    pub(crate) async fn deliver(&self, outcome: Result<Response>) {
        let mut cell = self.cell.lock().await;
        debug_assert!(cell.is_none(), "response slot delivered twice");
        *cell = Some(outcome);
        drop(cell);
        self.signal.notify_one();
    }

    /// Block until the outcome arrives, consuming it.
    ///
    /// The loop tolerates a stale wakeup permit left over from a previous
    /// checkout of the same pooled slot.
    pub(crate) async fn wait(&self) -> Result<Response> {
        loop {
            if let Some(outcome) = self.cell.lock().await.take() {
                return outcome;
            }
            self.signal.notified().await;
        }
    }
}

/// Pool of reusable response slots.
///
/// A caller that abandons its wait (cancellation) must NOT release the slot
/// back here: the worker's late delivery would otherwise be read by the next
/// checkout. Abandoned slots are simply dropped once the worker's reference
/// goes away.
pub(crate) struct SlotPool {
    idle: std::sync::Mutex<Vec<Arc<ResponseSlot>>>,
    max_idle: usize,
}

impl SlotPool {
    /// Create a pool that retains at most `max_idle` idle slots.
    pub(crate) fn new(max_idle: usize) -> Self {
        Self {
            idle: std::sync::Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Take an idle slot, or allocate a fresh one if the pool is empty.
    pub(crate) fn acquire(&self) -> Arc<ResponseSlot> {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        idle.pop()
            .unwrap_or_else(|| Arc::new(ResponseSlot::new()))
    }

    /// Return a slot whose outcome has been consumed.
    pub(crate) fn release(&self, slot: Arc<ResponseSlot>) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.max_idle {
            idle.push(slot);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
