//! Lifetime bridging between host wrappers and the engine's collector.
//!
//! The engine owns a separate garbage-collected heap. The host only holds
//! handles into it, and the engine reclaims them on its own schedule.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ReferencePool<W>                                           │
//! │  ├── DashMap<RawHandle, Weak<W>> (identity map)             │
//! │  ├── get_or_add: one canonical wrapper per handle           │
//! │  └── registers a before-collect callback per wrapper        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ engine collects handle
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Before-collect callback (CollectionGuard active)           │
//! │  ├── pool.remove(handle)                                    │
//! │  └── wrapper marked collected, then disposed                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ listeners dispose nested wrappers
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  DeferredReleaseQueue                                       │
//! │  ├── engine calls refused during collection are queued      │
//! │  └── processed on scope entry and after collect_garbage     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use crate::gc::{Flyweight, FlyweightCore, ReferencePool};
//!
//! struct MyWrapper {
//!     core: FlyweightCore,
//! }
//!
//! impl Flyweight for MyWrapper {
//!     fn core(&self) -> &FlyweightCore {
//!         &self.core
//!     }
//! }
//!
//! let pool = ReferencePool::<MyWrapper>::new("my");
//! let wrapper = pool.get_or_add(handle, || {
//!     Ok(Arc::new(MyWrapper {
//!         core: FlyweightCore::new(engine.clone(), handle, queue.clone())?,
//!     }))
//! })?;
//! ```

mod deferred_release;
mod flyweight;
mod handle;
mod reference_pool;

pub use deferred_release::{DeferredRelease, DeferredReleaseQueue};
pub use flyweight::{BeforeCollectListener, Flyweight, FlyweightCore, Registration};
pub use handle::EngineHandle;
pub use reference_pool::{ReferencePool, ReferencePoolStats};

use std::cell::Cell;

thread_local! {
    /// Depth of before-collect callbacks running on this thread.
    static COLLECTION_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// True while a before-collect callback runs on this thread.
pub fn in_collection() -> bool {
    COLLECTION_DEPTH.with(|d| d.get() > 0)
}

/// RAII marker for "inside the engine's collection pass".
///
/// Installed by the callbacks a [`ReferencePool`] registers. While any
/// guard is alive on a thread, wrapper disposal defers its engine calls.
pub struct CollectionGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl CollectionGuard {
    pub fn enter() -> Self {
        COLLECTION_DEPTH.with(|d| d.set(d.get() + 1));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for CollectionGuard {
    fn drop(&mut self) {
        COLLECTION_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}
