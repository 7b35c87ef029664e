//! ExecutionScope - RAII token for calling into one context.
//!
//! The engine is single-threaded per runtime and keeps one "current
//! context" slot. A scope claims its context with a compare-and-swap on the
//! context's flag, installs the context in that slot, and undoes both on
//! drop. Scopes are not reentrant: a second `enter` on the same context
//! fails instead of nesting or blocking.

use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use crate::context::JsContext;
use crate::engine::RawHandle;
use crate::error::{Error, Result};
use crate::gc::Flyweight;

/// Per-context "a scope is active" flag plus the thread holding it.
#[derive(Debug, Default)]
pub(crate) struct ScopeFlag {
    active: AtomicBool,
    owner: Mutex<Option<ThreadId>>,
}

impl ScopeFlag {
    pub(crate) fn try_acquire(&self) -> Result<()> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ScopeAlreadyActive)?;

        *self.owner.lock() = Some(thread::current().id());
        Ok(())
    }

    pub(crate) fn release(&self) {
        *self.owner.lock() = None;
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn is_held_by_current_thread(&self) -> bool {
        self.is_active() && *self.owner.lock() == Some(thread::current().id())
    }
}

/// Proof that this thread may call into a context.
///
/// Obtained from [`JsContext::scope`]. While it lives, the context is the
/// engine's current context and value operations on the context succeed.
///
/// On construction:
/// - Claims the context's scope flag (fails with `ScopeAlreadyActive`)
/// - Processes releases deferred during collection passes
/// - Installs the context as the engine's current context
///
/// On drop:
/// - Restores the previously current context (normally none)
/// - Releases the flag
///
/// Restoring instead of clearing only matters when scopes on two contexts
/// nest on one thread: dropping the inner scope reinstates the outer
/// context, so the outer scope keeps working. Without nesting the previous
/// context is none and the slot ends up cleared.
///
/// # Example
///
/// ```ignore
/// let scope = context.scope()?;
/// let answer = context.number(42.0)?;
/// drop(scope);
///
/// // Now a new scope can be entered
/// let _scope = context.scope()?;
/// ```
pub struct ExecutionScope<'a> {
    context: &'a JsContext,
    previous: Option<RawHandle>,
    // The engine's current-context slot is per thread
    _not_send: PhantomData<*const ()>,
}

impl<'a> ExecutionScope<'a> {
    pub(crate) fn enter(context: &'a JsContext) -> Result<Self> {
        let raw = context.core().live_handle::<JsContext>()?;
        context.scope_flag().try_acquire()?;

        let engine = context.engine();
        context.runtime().deferred().process_all(engine.as_ref());

        let installed = engine
            .current_context()
            .and_then(|previous| engine.set_current_context(Some(raw)).map(|_| previous));

        let previous = match installed {
            Ok(previous) => previous,
            Err(err) => {
                context.scope_flag().release();
                return Err(err.into());
            }
        };

        tracing::debug!("Entered execution scope for context {}", raw);

        Ok(Self {
            context,
            previous,
            _not_send: PhantomData,
        })
    }

    pub fn context(&self) -> &'a JsContext {
        self.context
    }
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        let engine = self.context.engine();

        if let Err(err) = engine.set_current_context(self.previous) {
            tracing::warn!("Restoring current context failed: {}", err);
        }

        self.context.purge_dead_values();
        self.context.scope_flag().release();

        tracing::debug!(
            "Left execution scope for context {}",
            self.context.core().raw()
        );
    }
}

impl std::fmt::Debug for ExecutionScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("context", &self.context.core().raw())
            .field("previous", &self.previous)
            .finish()
    }
}
