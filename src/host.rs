//! Root of the pool of pools.
//!
//! An [`EngineHost`] owns every runtime it creates. Disposing the host
//! disposes them newest first, which in turn disposes their contexts,
//! module records, values and property ids.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RuntimeConfig;
use crate::engine::SharedEngine;
use crate::error::Result;
use crate::runtime::{JsRuntime, RuntimeStats};

/// Host statistics
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    /// Runtimes created over the host's lifetime
    pub created: u64,
    /// Runtimes still alive
    pub live: usize,
    /// Per-runtime statistics, oldest first
    pub runtimes: Vec<RuntimeStats>,
}

/// Entry point: one engine, any number of runtimes.
///
/// ```ignore
/// let host = EngineHost::new(engine, RuntimeConfig::default());
/// let runtime = host.create_runtime()?;
/// let context = runtime.create_context()?;
///
/// let value = context.evaluate_module("export default 6 * 7;")?;
/// ```
pub struct EngineHost {
    engine: SharedEngine,
    config: RuntimeConfig,
    runtimes: Mutex<Vec<Arc<JsRuntime>>>,
    created: AtomicU64,
}

impl EngineHost {
    pub fn new(engine: SharedEngine, config: RuntimeConfig) -> Self {
        tracing::info!(
            "Initializing EngineHost (heap {}-{}MB)",
            config.heap_initial_mb,
            config.heap_max_mb
        );

        Self {
            engine,
            config,
            runtimes: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create a runtime with the host's configuration.
    pub fn create_runtime(&self) -> Result<Arc<JsRuntime>> {
        self.create_runtime_with(self.config.clone())
    }

    /// Create a runtime with its own configuration.
    pub fn create_runtime_with(&self, config: RuntimeConfig) -> Result<Arc<JsRuntime>> {
        let runtime = Arc::new(JsRuntime::create(self.engine.clone(), config)?);

        let mut runtimes = self.runtimes.lock();
        runtimes.retain(|r| !r.is_disposed());
        runtimes.push(Arc::clone(&runtime));

        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            "Runtime {} added to host ({} live, {} created)",
            runtime.raw(),
            runtimes.len(),
            created
        );

        Ok(runtime)
    }

    /// Runtimes not yet disposed.
    pub fn runtime_count(&self) -> usize {
        self.runtimes
            .lock()
            .iter()
            .filter(|r| !r.is_disposed())
            .count()
    }

    pub fn stats(&self) -> HostStats {
        let runtimes = self.runtimes.lock();
        let live: Vec<RuntimeStats> = runtimes
            .iter()
            .filter(|r| !r.is_disposed())
            .map(|r| r.stats())
            .collect();

        HostStats {
            created: self.created.load(Ordering::Relaxed),
            live: live.len(),
            runtimes: live,
        }
    }

    /// Dispose every runtime, newest first.
    ///
    /// Keeps going after a failure and returns the first one. Runtimes
    /// that failed to dispose stay registered.
    pub fn dispose(&self) -> Result<()> {
        let runtimes = std::mem::take(&mut *self.runtimes.lock());
        let mut first_error = None;
        let mut kept = Vec::new();

        for runtime in runtimes.into_iter().rev() {
            if let Err(err) = runtime.dispose() {
                tracing::warn!("Disposing runtime {} failed: {}", runtime.raw(), err);
                first_error.get_or_insert(err);
                kept.push(runtime);
            }
        }

        if !kept.is_empty() {
            kept.reverse();
            self.runtimes.lock().extend(kept);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for EngineHost {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            tracing::warn!("Disposing EngineHost on drop failed: {}", err);
        }
    }
}

impl std::fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHost")
            .field("runtimes", &self.runtime_count())
            .field("created", &self.created.load(Ordering::Relaxed))
            .finish()
    }
}
