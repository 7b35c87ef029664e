//! Host-side view of one engine handle.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::RawHandle;
use crate::error::{Error, Result};

/// A [`RawHandle`] plus a validity flag.
///
/// The host never owns the storage behind the handle. Once the handle is
/// closed (released by the host, or reclaimed by the engine) the raw value
/// must not be passed to the engine again.
#[derive(Debug)]
pub struct EngineHandle {
    raw: RawHandle,
    closed: AtomicBool,
}

impl EngineHandle {
    /// Wrap a raw handle. Null handles are rejected.
    pub fn new(raw: RawHandle) -> Result<Self> {
        if raw.is_null() {
            return Err(Error::InvalidHandle);
        }

        Ok(Self {
            raw,
            closed: AtomicBool::new(false),
        })
    }

    /// The raw value, whether or not it is still valid.
    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// The raw value while the handle is open.
    #[inline]
    pub fn get(&self) -> Option<RawHandle> {
        (!self.is_closed()).then_some(self.raw)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the handle. Returns `true` for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

impl PartialEq for EngineHandle {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for EngineHandle {}
