//! Identity map from engine handles to their wrappers.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Weak};

use super::{CollectionGuard, Flyweight, Registration};
use crate::engine::{BeforeCollectCallback, EngineStatus, RawHandle};
use crate::error::{Error, Result};

/// Snapshot of a pool's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferencePoolStats {
    /// Entries whose wrapper is alive and not disposed.
    pub live: usize,
    /// Entries whose wrapper was dropped or disposed.
    pub stale: usize,
}

/// One pool entry: the wrapper and its callback registration, which
/// outlives the wrapper so a stale slot can be superseded.
struct Slot<W> {
    wrapper: Weak<W>,
    registration: Arc<Registration>,
}

impl<W: Flyweight> Slot<W> {
    fn of(wrapper: &Arc<W>) -> Self {
        Self {
            wrapper: Arc::downgrade(wrapper),
            registration: Arc::clone(wrapper.core().registration()),
        }
    }

    fn live(&self) -> Option<Arc<W>> {
        self.wrapper.upgrade().filter(|w| !w.is_disposed())
    }
}

/// Concurrent `handle → Weak<wrapper>` map keeping at most one live
/// wrapper per handle.
///
/// The pool never owns its wrappers. Entries leave the pool when the
/// engine fires the before-collect callback the pool registers for each
/// wrapper, or are replaced once their wrapper is gone.
pub struct ReferencePool<W: Flyweight> {
    entries: DashMap<RawHandle, Slot<W>>,
    label: &'static str,
}

impl<W: Flyweight> ReferencePool<W> {
    pub fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            label,
        })
    }

    /// Return the live wrapper for `raw`, or build one with `factory`.
    ///
    /// Safe to call concurrently for the same handle: one candidate wins
    /// the slot and registers the before-collect callback; losers are
    /// discarded without registering.
    pub fn get_or_add<F>(self: &Arc<Self>, raw: RawHandle, factory: F) -> Result<Arc<W>>
    where
        F: FnOnce() -> Result<Arc<W>>,
    {
        if raw.is_null() {
            return Err(Error::InvalidHandle);
        }

        if let Some(existing) = self.try_get(raw) {
            tracing::trace!("{} pool hit for {}", self.label, raw);
            return Ok(existing);
        }

        let candidate = factory()?;
        debug_assert_eq!(candidate.raw(), raw);

        let superseded = match self.entries.entry(raw) {
            Entry::Occupied(mut slot) => {
                if let Some(existing) = slot.get().live() {
                    drop(slot);
                    tracing::trace!("{} pool lost race for {}", self.label, raw);
                    candidate.core().discard();
                    return Ok(existing);
                }

                // Stale slot: the previous wrapper is gone or going
                Some(slot.insert(Slot::of(&candidate)).registration)
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::of(&candidate));
                None
            }
        };

        if let Some(previous) = superseded {
            previous.supersede();
        }

        tracing::trace!("{} pool miss for {}, inserted", self.label, raw);

        if let Err(err) = self.register(&candidate) {
            let weak = Arc::downgrade(&candidate);
            self.entries
                .remove_if(&raw, |_, slot| slot.wrapper.ptr_eq(&weak));
            candidate.core().discard();
            return Err(err);
        }

        Ok(candidate)
    }

    /// Non-creating lookup.
    pub fn try_get(&self, raw: RawHandle) -> Option<Arc<W>> {
        self.entries.get(&raw).and_then(|slot| slot.live())
    }

    /// Evict `raw` because the engine is reclaiming it.
    ///
    /// Idempotent: unknown handles and repeated calls are no-ops.
    pub fn remove(&self, raw: RawHandle) {
        let Some((_, slot)) = self.entries.remove(&raw) else {
            tracing::trace!("{} pool remove for unknown {}", self.label, raw);
            return;
        };

        if let Some(wrapper) = slot.wrapper.upgrade() {
            wrapper.core().mark_collected();
            wrapper.dispose();
            tracing::trace!("{} pool evicted {}", self.label, raw);
        }
    }

    /// Snapshot of the live wrappers.
    pub fn live(&self) -> Vec<Arc<W>> {
        self.entries
            .iter()
            .filter_map(|entry| entry.value().live())
            .collect()
    }

    /// Dispose every remaining live wrapper and empty the pool.
    ///
    /// Disposing one wrapper may evict others reentrantly; those are skipped.
    pub fn dispose_all(&self) {
        let handles: Vec<RawHandle> = self.entries.iter().map(|e| *e.key()).collect();
        let mut disposed = 0usize;

        for raw in handles {
            let Some((_, slot)) = self.entries.remove(&raw) else {
                continue;
            };

            if let Some(wrapper) = slot.wrapper.upgrade() {
                if wrapper.dispose() {
                    disposed += 1;
                }
            }
        }

        tracing::debug!("{} pool disposed {} wrappers", self.label, disposed);
    }

    /// Drop entries whose wrapper is gone. Returns the number removed.
    pub fn purge_dead(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| slot.live().is_some());
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ReferencePoolStats {
        let mut stats = ReferencePoolStats::default();

        for entry in self.entries.iter() {
            match entry.value().live() {
                Some(_) => stats.live += 1,
                None => stats.stale += 1,
            }
        }

        stats
    }

    fn register(self: &Arc<Self>, wrapper: &Arc<W>) -> Result<()> {
        let core = wrapper.core();
        let pool = Arc::downgrade(self);

        let callback: BeforeCollectCallback = Arc::new(move |handle: RawHandle| {
            let _guard = CollectionGuard::enter();

            if let Some(pool) = pool.upgrade() {
                pool.remove(handle);
            }
        });

        match core
            .engine()
            .set_before_collect_callback(core.raw(), Some(callback))
        {
            Ok(()) => {
                core.registration().mark();
                Ok(())
            }
            Err(err) if err.status == EngineStatus::NoWeakRefRequired => {
                tracing::trace!("{} handle {} needs no callback", self.label, core.raw());
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl<W: Flyweight> std::fmt::Debug for ReferencePool<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferencePool")
            .field("label", &self.label)
            .field("entries", &self.entries.len())
            .finish()
    }
}
