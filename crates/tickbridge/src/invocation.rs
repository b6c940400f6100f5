//! Invocation providers.
//!
//! A provider decides *where* a piece of work runs. It is the only
//! cross-thread hand-off in the bridge: anything that mutates world state is
//! scheduled onto the provider owned by the simulation thread, which drains
//! it once per tick.
//!
//! ```text
//! network task ──invoke()──► QueuedProvider ──drain() (tick thread)──► run
//! ```

use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// A unit of deferred work.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Schedules runnables for execution.
pub trait InvocationProvider: Send + Sync {
    /// Runs `task` now or hands it to the owning thread.
    fn invoke(&self, task: Runnable);
}

/// Runs every task inline on the caller's stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncProvider;

impl InvocationProvider for SyncProvider {
    fn invoke(&self, task: Runnable) {
        task();
    }
}

/// A runnable queue drained by its owning thread.
///
/// `invoke` may be called from any thread; `drain` runs the queued tasks on
/// the caller. Tasks scheduled while a drain is in progress wait for the
/// next drain, so a tick always terminates.
pub struct QueuedProvider {
    tx: mpsc::UnboundedSender<Runnable>,
    rx: Mutex<mpsc::UnboundedReceiver<Runnable>>,
}

impl QueuedProvider {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Number of tasks waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs every task that was queued before this call. Returns how many ran.
    pub fn drain(&self) -> usize {
        let batch: Vec<Runnable> = {
            let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
            let queued = rx.len();
            let mut batch = Vec::with_capacity(queued);
            while batch.len() < queued {
                match rx.try_recv() {
                    Ok(task) => batch.push(task),
                    Err(_) => break,
                }
            }
            batch
        };

        let count = batch.len();
        for task in batch {
            task();
        }
        if count > 0 {
            tracing::trace!(count, "drained invocation queue");
        }
        count
    }
}

impl Default for QueuedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueuedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedProvider")
            .field("pending", &self.pending())
            .finish()
    }
}

impl InvocationProvider for QueuedProvider {
    fn invoke(&self, task: Runnable) {
        // The receiver lives as long as `self`, so send cannot fail here.
        if self.tx.send(task).is_err() {
            tracing::warn!("invocation queue closed, task dropped");
        }
    }
}
