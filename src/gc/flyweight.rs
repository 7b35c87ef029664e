//! Wrapper base shared by every host object that fronts an engine handle.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{DeferredRelease, DeferredReleaseQueue, EngineHandle, in_collection};
use crate::engine::{RawHandle, SharedEngine};
use crate::error::{Error, Result};

/// Listener fired once, right before a wrapper's handle goes away.
pub type BeforeCollectListener = Box<dyn FnOnce(RawHandle) + Send>;

/// A host object that fronts exactly one engine handle.
///
/// Wrappers are shared as `Arc<W>` and tracked by a
/// [`ReferencePool`](super::ReferencePool), which guarantees at most one
/// live wrapper per handle.
pub trait Flyweight: Send + Sync + 'static {
    fn core(&self) -> &FlyweightCore;

    #[inline]
    fn raw(&self) -> RawHandle {
        self.core().raw()
    }

    #[inline]
    fn is_disposed(&self) -> bool {
        self.core().is_disposed()
    }

    /// Dispose the wrapper. Returns `false` if it was already disposed.
    fn dispose(&self) -> bool {
        self.core().dispose()
    }
}

/// Ownership of the engine's before-collect registration for one handle.
///
/// Shared between a wrapper and its pool slot. When a dead wrapper's slot
/// is taken over, the pool supersedes the old registration before the new
/// wrapper registers, so a late unregister from the old wrapper cannot
/// remove the new wrapper's callback.
#[derive(Debug, Default)]
pub struct Registration {
    held: Mutex<bool>,
}

impl Registration {
    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }

    pub(crate) fn mark(&self) {
        *self.held.lock() = true;
    }

    /// Give the registration up, running `unregister` under the lock when
    /// it was still held. Returns `None` when it was not.
    pub(crate) fn release_with<R>(&self, unregister: impl FnOnce() -> R) -> Option<R> {
        let mut held = self.held.lock();

        if !*held {
            return None;
        }

        *held = false;
        Some(unregister())
    }

    /// A newer wrapper owns the handle's registration. Waits for an
    /// unregister already in flight.
    pub(crate) fn supersede(&self) {
        *self.held.lock() = false;
    }
}

/// State common to all wrappers: the handle, the disposed flag, the
/// before-collect registration and listeners.
///
/// Dropping the core disposes it.
pub struct FlyweightCore {
    engine: SharedEngine,
    handle: EngineHandle,
    /// The wrapper holds one host reference on the handle.
    owned: bool,
    disposed: AtomicBool,
    registration: Arc<Registration>,
    listeners: Mutex<Vec<BeforeCollectListener>>,
    deferred: Arc<DeferredReleaseQueue>,
}

impl FlyweightCore {
    /// Core for a handle the engine may reclaim on its own.
    pub fn new(
        engine: SharedEngine,
        raw: RawHandle,
        deferred: Arc<DeferredReleaseQueue>,
    ) -> Result<Self> {
        Self::build(engine, raw, false, deferred)
    }

    /// Core that takes over one host reference on the handle and releases
    /// it on disposal.
    pub fn owned(
        engine: SharedEngine,
        raw: RawHandle,
        deferred: Arc<DeferredReleaseQueue>,
    ) -> Result<Self> {
        Self::build(engine, raw, true, deferred)
    }

    fn build(
        engine: SharedEngine,
        raw: RawHandle,
        owned: bool,
        deferred: Arc<DeferredReleaseQueue>,
    ) -> Result<Self> {
        Ok(Self {
            engine,
            handle: EngineHandle::new(raw)?,
            owned,
            disposed: AtomicBool::new(false),
            registration: Arc::new(Registration::default()),
            listeners: Mutex::new(Vec::new()),
            deferred,
        })
    }

    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.handle.raw()
    }

    #[inline]
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// The handle, or `ObjectDisposed` naming `T`.
    #[inline]
    pub fn live_handle<T: ?Sized>(&self) -> Result<RawHandle> {
        if self.is_disposed() {
            return Err(Error::disposed::<T>());
        }

        self.handle.get().ok_or_else(Error::disposed::<T>)
    }

    pub fn is_callback_registered(&self) -> bool {
        self.registration.is_held()
    }

    pub(crate) fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    /// Subscribe to the before-collect event.
    ///
    /// Returns `false` (dropping the listener) if the wrapper is already
    /// disposed.
    pub fn on_before_collect(&self, listener: BeforeCollectListener) -> bool {
        let mut listeners = self.listeners.lock();

        if self.is_disposed() {
            return false;
        }

        listeners.push(listener);
        true
    }

    /// The engine has begun reclaiming the handle; disposal must not pass
    /// it back to the engine.
    pub(crate) fn mark_collected(&self) {
        self.handle.close();
    }

    /// Dispose: fire listeners, then unregister the callback and drop the
    /// host reference. Engine work is deferred while a collection pass is
    /// running and skipped entirely when the engine reclaimed the handle.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let raw = self.handle.raw();
        let listeners = std::mem::take(&mut *self.listeners.lock());

        for listener in listeners {
            listener(raw);
        }

        if !self.handle.close() {
            // The engine dropped its callback along with the handle
            self.registration.supersede();
            tracing::trace!("Disposed collected handle {}", raw);
            return true;
        }

        if in_collection() {
            if self.registration.is_held() {
                self.deferred.defer(DeferredRelease::UnregisterCallback(
                    raw,
                    Arc::clone(&self.registration),
                ));
            }
        } else if let Some(Err(err)) = self
            .registration
            .release_with(|| self.engine.set_before_collect_callback(raw, None))
        {
            tracing::trace!("Unregistering callback for {} failed: {}", raw, err);
        }

        self.release_reference(raw);
        true
    }

    /// Drop a wrapper that never became canonical. Listeners are not fired
    /// and the callback registration is left alone; an owned host
    /// reference is still given back.
    pub(crate) fn discard(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.listeners.lock().clear();

        if self.handle.close() {
            self.release_reference(self.handle.raw());
        }
    }

    fn release_reference(&self, raw: RawHandle) {
        if !self.owned {
            return;
        }

        if in_collection() {
            self.deferred.defer(DeferredRelease::Release(raw));
        } else if let Err(err) = self.engine.release(raw) {
            tracing::warn!("Releasing handle {} failed: {}", raw, err);
        }
    }
}

impl Drop for FlyweightCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for FlyweightCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlyweightCore")
            .field("handle", &self.handle.raw())
            .field("owned", &self.owned)
            .field("disposed", &self.is_disposed())
            .field("callback_registered", &self.is_callback_registered())
            .finish()
    }
}
