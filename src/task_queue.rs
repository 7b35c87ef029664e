//! Promise job queue.
//!
//! The engine hands every promise job to the host through the continuation
//! callback. Jobs are kept here (with one host reference each) until the
//! host drains them after a module evaluation. Draining is bounded: it
//! never waits for work that is not already queued.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::context::JsContext;
use crate::engine::{EngineApi, PromiseContinuationCallback, RawHandle, SharedEngine};
use crate::error::Result;

/// Per-runtime FIFO of pending promise jobs.
#[derive(Debug, Default)]
pub struct PromiseTaskQueue {
    tasks: Mutex<VecDeque<RawHandle>>,
}

impl PromiseTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuation callback feeding this queue.
    ///
    /// Holds the queue and the engine weakly; the engine stores the callback.
    pub(crate) fn continuation_callback(
        self: &Arc<Self>,
        engine: &SharedEngine,
    ) -> PromiseContinuationCallback {
        let queue = Arc::downgrade(self);
        let engine: Weak<dyn EngineApi> = Arc::downgrade(engine);

        Arc::new(move |task: RawHandle| {
            let (Some(queue), Some(engine)) = (queue.upgrade(), engine.upgrade()) else {
                return;
            };

            if let Err(err) = engine.add_ref(task) {
                tracing::warn!("Cannot retain promise job {}: {}", task, err);
                return;
            }

            queue.enqueue(task);
        })
    }

    pub(crate) fn enqueue(&self, task: RawHandle) {
        let mut tasks = self.tasks.lock();
        tasks.push_back(task);
        tracing::trace!("Queued promise job {} (pending: {})", task, tasks.len());
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    fn pop(&self) -> Option<RawHandle> {
        self.tasks.lock().pop_front()
    }

    /// Run queued jobs (and jobs they queue) until the queue is empty or
    /// `limit` jobs ran. Returns the number of jobs run.
    ///
    /// A job that throws stops the drain and surfaces as a script error.
    pub fn drain(&self, context: &JsContext, limit: usize) -> Result<usize> {
        let engine = context.engine();
        let undefined = context.check(engine.undefined_value())?;
        let mut ran = 0usize;

        loop {
            context.check(engine.run_microtasks())?;

            let Some(task) = self.pop() else {
                break;
            };

            if ran >= limit {
                self.tasks.lock().push_front(task);
                tracing::warn!(
                    "Promise job drain stopped after {} jobs ({} still pending)",
                    ran,
                    self.len()
                );
                break;
            }

            let result = engine.call_function(task, undefined, &[]);

            if let Err(err) = engine.release(task) {
                tracing::trace!("Releasing promise job {} failed: {}", task, err);
            }

            context.check(result)?;
            ran += 1;
        }

        if ran > 0 {
            tracing::debug!("Drained {} promise jobs", ran);
        }

        Ok(ran)
    }

    /// Drop every queued job without running it.
    pub(crate) fn clear(&self, engine: &dyn EngineApi) {
        let tasks = std::mem::take(&mut *self.tasks.lock());

        for task in tasks {
            if let Err(err) = engine.release(task) {
                tracing::trace!("Releasing promise job {} failed: {}", task, err);
            }
        }
    }
}
