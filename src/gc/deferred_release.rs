//! Deferred release queue for engine handles.
//!
//! ## Problem
//!
//! Wrapper disposal can run from inside the engine's own collection pass:
//! a before-collect callback evicts a wrapper, the wrapper fires its
//! listeners, and those dispose further wrappers. The engine refuses any
//! call made from inside a before-collect callback, so those wrappers
//! cannot unregister their callbacks or drop their host references yet.
//!
//! ## Solution
//!
//! Queue the engine-side work and run it the next time the host is allowed
//! to call the engine: on [`ExecutionScope`](crate::ExecutionScope) entry,
//! and when the runtime is disposed.
//!
//! ```ignore
//! // Inside a collection pass
//! queue.defer(DeferredRelease::Release(handle));
//!
//! // Later, on scope entry
//! queue.process_all(engine.as_ref());
//! ```

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Registration, in_collection};
use crate::engine::{EngineApi, RawHandle};

/// Engine-side work postponed until the engine accepts calls again.
#[derive(Debug, Clone)]
pub enum DeferredRelease {
    /// Remove the before-collect callback registered for the handle,
    /// unless a newer wrapper took the registration over meanwhile.
    UnregisterCallback(RawHandle, Arc<Registration>),
    /// Drop one host reference on the handle.
    Release(RawHandle),
}

/// Per-runtime queue of deferred engine releases.
///
/// Thread-safe; work may be queued from any thread, including from inside
/// a collection pass.
pub struct DeferredReleaseQueue {
    queue: Mutex<VecDeque<DeferredRelease>>,

    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending_count: AtomicU64,
}

impl Default for DeferredReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredReleaseQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(8)),
            pending_count: AtomicU64::new(0),
        }
    }

    pub fn defer(&self, op: DeferredRelease) {
        tracing::trace!("Deferring {:?} (pending: {})", op, self.len());

        self.queue.lock().push_back(op);
        self.pending_count.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Run every queued release against the engine.
    ///
    /// Does nothing while a collection pass is running on this thread.
    /// Failures are ignored: the engine may have reclaimed the handle in
    /// the meantime. Returns the number of processed entries.
    pub fn process_all(&self, engine: &dyn EngineApi) -> usize {
        if !self.has_pending() || in_collection() {
            return 0;
        }

        let ops: VecDeque<DeferredRelease> = std::mem::take(&mut *self.queue.lock());
        let count = ops.len();

        if count == 0 {
            return 0;
        }

        self.pending_count
            .fetch_sub(count as u64, Ordering::Release);

        for op in ops {
            let result = match &op {
                DeferredRelease::UnregisterCallback(handle, registration) => registration
                    .release_with(|| engine.set_before_collect_callback(*handle, None))
                    .unwrap_or(Ok(())),
                DeferredRelease::Release(handle) => engine.release(*handle).map(|_| ()),
            };

            if let Err(err) = result {
                tracing::trace!("Deferred {:?} ignored: {}", op, err);
            }
        }

        tracing::trace!("Processed {} deferred releases", count);
        count
    }
}

impl std::fmt::Debug for DeferredReleaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredReleaseQueue")
            .field("pending_count", &self.len())
            .finish()
    }
}
