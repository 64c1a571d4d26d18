//! The flush gate: staged buffers, the `flushing` latch, and the rules for
//! who may run a flush.
//!
//! One flush runs at a time per store. A flush requested from another
//! thread or task while one is active waits for it to finish and then runs
//! its own merge, so the caller always sees its own staged changes. A flush
//! requested from inside the active flush (a read hook that calls back into
//! the store, for example) cannot wait for itself and is skipped instead.
//!
//! "Inside" is tracked per store ID: a thread-local stack for blocking
//! flushes and a task-local stack for awaitable ones.

use std::cell::RefCell;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use jsonrepo_types::Entity;
use tokio::sync::Notify;
use tracing::debug;

use crate::pending::PendingChanges;

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_FLUSHES: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_FLUSHES: Vec<u64>;
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    // Staging never fails: recover the buffers from a poisoned lock.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct GateState<T> {
    pending: PendingChanges<T>,
    flushing: bool,
}

/// Serializes the flushes of one store.
pub(crate) struct FlushGate<T> {
    id: u64,
    path: PathBuf,
    state: Mutex<GateState<T>>,
    idle: Condvar,
    idle_async: Notify,
}

impl<T: Entity> FlushGate<T> {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            path: path.to_path_buf(),
            state: Mutex::new(GateState {
                pending: PendingChanges::new(),
                flushing: false,
            }),
            idle: Condvar::new(),
            idle_async: Notify::new(),
        }
    }

    /// Run `f` against the live buffers under the lock.
    pub(crate) fn with_pending<R>(&self, f: impl FnOnce(&mut PendingChanges<T>) -> R) -> R {
        f(&mut lock(&self.state).pending)
    }

    /// Whether the caller is running inside this gate's active flush.
    pub(crate) fn is_nested(&self) -> bool {
        let on_thread = THREAD_FLUSHES.with(|ids| ids.borrow().contains(&self.id));
        on_thread
            || TASK_FLUSHES
                .try_with(|ids| ids.contains(&self.id))
                .unwrap_or(false)
    }

    /// Claim the flush, blocking while another caller holds it.
    ///
    /// `None` for a nested call.
    pub(crate) fn claim(&self) -> Option<FlushTicket<'_, T>> {
        if self.is_nested() {
            return None;
        }
        let mut state = lock(&self.state);
        if state.flushing {
            debug!(path = %self.path.display(), "waiting for the active flush");
        }
        while state.flushing {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Some(self.start(state, Some(ThreadMarker::enter(self.id))))
    }

    /// Awaitable [`claim`](Self::claim).
    ///
    /// The returned ticket must be used inside [`scope`](Self::scope) so
    /// that nested calls made by the flush are recognised.
    pub(crate) async fn claim_async(&self) -> Option<FlushTicket<'_, T>> {
        if self.is_nested() {
            return None;
        }
        loop {
            // Register before looking at the latch so a release between
            // the check and the await still wakes us.
            let mut released = pin!(self.idle_async.notified());
            released.as_mut().enable();
            {
                let state = lock(&self.state);
                if !state.flushing {
                    return Some(self.start(state, None));
                }
            }
            debug!(path = %self.path.display(), "waiting for the active flush");
            released.await;
        }
    }

    /// Run `fut` marked as inside this gate's flush for the current task.
    pub(crate) async fn scope<F: Future>(&self, fut: F) -> F::Output {
        let mut ids = TASK_FLUSHES.try_with(Vec::clone).unwrap_or_default();
        ids.push(self.id);
        TASK_FLUSHES.scope(ids, fut).await
    }

    fn start(
        &self,
        mut state: MutexGuard<'_, GateState<T>>,
        marker: Option<ThreadMarker>,
    ) -> FlushTicket<'_, T> {
        state.flushing = true;
        let batch = state.pending.clone();
        FlushTicket {
            gate: self,
            batch,
            _marker: marker,
        }
    }
}

/// Marks the current thread as inside a blocking flush until dropped.
struct ThreadMarker {
    id: u64,
}

impl ThreadMarker {
    fn enter(id: u64) -> Self {
        THREAD_FLUSHES.with(|ids| ids.borrow_mut().push(id));
        Self { id }
    }
}

impl Drop for ThreadMarker {
    fn drop(&mut self) {
        THREAD_FLUSHES.with(|ids| {
            let mut ids = ids.borrow_mut();
            if let Some(pos) = ids.iter().rposition(|&id| id == self.id) {
                ids.remove(pos);
            }
        });
    }
}

/// Proof that this caller owns the active flush.
///
/// Dropping the ticket clears the latch and wakes every waiter, including
/// when the flush fails part way or its future is dropped.
pub(crate) struct FlushTicket<'a, T> {
    gate: &'a FlushGate<T>,
    batch: PendingChanges<T>,
    _marker: Option<ThreadMarker>,
}

impl<'a, T: Entity> FlushTicket<'a, T> {
    /// The staged changes copied when the flush was claimed.
    pub(crate) fn batch(&self) -> &PendingChanges<T> {
        &self.batch
    }

    /// Remove the applied items from the live buffers.
    ///
    /// Returns `false` if the buffers were discarded while the flush ran;
    /// everything staged since then is kept.
    pub(crate) fn complete(self) -> bool {
        lock(&self.gate.state).pending.drain_applied(&self.batch)
    }
}

impl<'a, T> Drop for FlushTicket<'a, T> {
    fn drop(&mut self) {
        lock(&self.gate.state).flushing = false;
        self.gate.idle.notify_all();
        self.gate.idle_async.notify_waiters();
    }
}
