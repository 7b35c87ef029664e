//! Engine runtimes.
//!
//! A runtime owns a separate engine heap. Everything created inside it is
//! tracked by pools hanging off the runtime:
//!
//! ```text
//! JsRuntime
//! ├── contexts: ReferencePool<JsContext>
//! │   └── JsContext
//! │       ├── values:  ReferencePool<JsValue>
//! │       └── modules: ReferencePool<JsModuleRecord>
//! ├── property ids: ReferencePool<JsPropertyId>
//! ├── promise jobs: PromiseTaskQueue
//! └── deferred releases: DeferredReleaseQueue
//! ```
//!
//! Disposal runs leaves first: contexts (which dispose their modules and
//! values), property ids, queued jobs and deferred releases, then the
//! engine runtime itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::RuntimeConfig;
use crate::context::JsContext;
use crate::engine::{EngineStatus, RawHandle, SharedEngine};
use crate::error::{Error, Result};
use crate::gc::{DeferredReleaseQueue, ReferencePool, ReferencePoolStats};
use crate::property::JsPropertyId;
use crate::task_queue::PromiseTaskQueue;
use crate::value::JsValue;

/// State shared by a runtime and every context created in it.
pub(crate) struct RuntimeShared {
    engine: SharedEngine,
    raw: RawHandle,
    config: RuntimeConfig,
    deferred: Arc<DeferredReleaseQueue>,
    property_ids: Arc<ReferencePool<JsPropertyId>>,
    tasks: Arc<PromiseTaskQueue>,
    disposed: AtomicBool,
}

impl RuntimeShared {
    pub(crate) fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.raw
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn deferred(&self) -> &Arc<DeferredReleaseQueue> {
        &self.deferred
    }

    pub(crate) fn tasks(&self) -> &Arc<PromiseTaskQueue> {
        &self.tasks
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::disposed::<JsRuntime>());
        }
        Ok(())
    }

    /// Pooled property id for a name. Requires a current context.
    pub(crate) fn property_id(&self, name: &str) -> Result<Arc<JsPropertyId>> {
        self.ensure_live()?;
        let raw = self.engine.property_id_from_name(name)?;
        self.property_ids
            .get_or_add(raw, || JsPropertyId::create(self, raw))
    }

    /// Pooled property id for a symbol value.
    pub(crate) fn symbol_property_id(&self, symbol: &JsValue) -> Result<Arc<JsPropertyId>> {
        self.ensure_live()?;
        let raw = self.engine.property_id_from_symbol(symbol.live()?)?;
        self.property_ids
            .get_or_add(raw, || JsPropertyId::create(self, raw))
    }
}

/// Statistics for one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeStats {
    pub contexts: ReferencePoolStats,
    pub property_ids: ReferencePoolStats,
    pub pending_jobs: usize,
    pub deferred_releases: u64,
}

/// A separate engine heap with its own contexts.
pub struct JsRuntime {
    shared: Arc<RuntimeShared>,
    contexts: Arc<ReferencePool<JsContext>>,
}

impl JsRuntime {
    pub(crate) fn create(engine: SharedEngine, config: RuntimeConfig) -> Result<Self> {
        let raw = engine.create_runtime(&config)?;

        if raw.is_null() {
            return Err(Error::InvalidHandle);
        }

        let tasks = Arc::new(PromiseTaskQueue::new());

        if let Err(err) =
            engine.set_promise_continuation_callback(raw, Some(tasks.continuation_callback(&engine)))
        {
            if let Err(dispose_err) = engine.dispose_runtime(raw) {
                tracing::warn!("Disposing half-created runtime {} failed: {}", raw, dispose_err);
            }
            return Err(err.into());
        }

        tracing::info!(
            "Created runtime {} (heap {}-{}MB, await promises: {})",
            raw,
            config.heap_initial_mb,
            config.heap_max_mb,
            config.await_pending_promises
        );

        Ok(Self {
            shared: Arc::new(RuntimeShared {
                engine,
                raw,
                config,
                deferred: Arc::new(DeferredReleaseQueue::new()),
                property_ids: ReferencePool::new("property id"),
                tasks,
                disposed: AtomicBool::new(false),
            }),
            contexts: ReferencePool::new("context"),
        })
    }

    pub fn raw(&self) -> RawHandle {
        self.shared.raw
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.shared.engine
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Create a new context in this runtime.
    pub fn create_context(&self) -> Result<Arc<JsContext>> {
        self.shared.ensure_live()?;

        let raw = self.shared.engine.create_context(self.shared.raw)?;
        let shared = &self.shared;
        let context = self
            .contexts
            .get_or_add(raw, || JsContext::create(shared, raw))?;

        tracing::debug!("Created context {} in runtime {}", raw, self.shared.raw);
        Ok(context)
    }

    /// Live context wrapper for a handle, if any.
    pub fn context(&self, raw: RawHandle) -> Option<Arc<JsContext>> {
        self.contexts.try_get(raw)
    }

    /// Run a full engine collection, then the releases it deferred.
    pub fn collect_garbage(&self) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.engine.collect_garbage(self.shared.raw)?;
        self.shared
            .deferred
            .process_all(self.shared.engine.as_ref());
        Ok(())
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            contexts: self.contexts.stats(),
            property_ids: self.shared.property_ids.stats(),
            pending_jobs: self.shared.tasks.len(),
            deferred_releases: self.shared.deferred.len(),
        }
    }

    /// Tear the runtime down.
    ///
    /// Fails with `RuntimeInUse` while any context has an active scope.
    /// Disposing twice is a no-op.
    pub fn dispose(&self) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }

        let in_use = self
            .contexts
            .live()
            .iter()
            .any(|context| context.scope_flag().is_active());

        if in_use {
            return Err(EngineStatus::RuntimeInUse.into());
        }

        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let engine = self.shared.engine.as_ref();

        self.contexts.dispose_all();
        self.shared.property_ids.dispose_all();
        self.shared.tasks.clear(engine);
        self.shared.deferred.process_all(engine);

        if let Err(err) = engine.set_promise_continuation_callback(self.shared.raw, None) {
            tracing::trace!("Clearing continuation callback failed: {}", err);
        }

        engine.dispose_runtime(self.shared.raw)?;

        tracing::info!("Disposed runtime {}", self.shared.raw);
        Ok(())
    }
}

impl Drop for JsRuntime {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            tracing::warn!("Disposing runtime {} on drop failed: {}", self.shared.raw, err);
        }
    }
}

impl std::fmt::Debug for JsRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsRuntime")
            .field("handle", &self.shared.raw)
            .field("disposed", &self.is_disposed())
            .field("contexts", &self.contexts.len())
            .finish()
    }
}
