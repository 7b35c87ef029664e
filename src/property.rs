//! Property identifiers.

use std::sync::Arc;

use crate::engine::RawHandle;
use crate::error::Result;
use crate::gc::{Flyweight, FlyweightCore};
use crate::runtime::RuntimeShared;

/// Engine property id, keyed by a name or by a symbol.
///
/// Pooled per runtime: asking twice for the same name yields the same
/// `Arc<JsPropertyId>`.
pub struct JsPropertyId {
    core: FlyweightCore,
    name: Option<String>,
}

impl JsPropertyId {
    pub(crate) fn create(runtime: &RuntimeShared, raw: RawHandle) -> Result<Arc<Self>> {
        let name = runtime.engine().property_id_name(raw)?;
        let core = FlyweightCore::new(runtime.engine().clone(), raw, runtime.deferred().clone())?;

        Ok(Arc::new(Self { core, name }))
    }

    /// Name of a string-keyed id; `None` for symbol-keyed ids.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_symbol(&self) -> bool {
        self.name.is_none()
    }

    pub(crate) fn live(&self) -> Result<RawHandle> {
        self.core.live_handle::<Self>()
    }
}

impl Flyweight for JsPropertyId {
    fn core(&self) -> &FlyweightCore {
        &self.core
    }
}

impl std::fmt::Debug for JsPropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsPropertyId")
            .field("handle", &self.core.raw())
            .field("name", &self.name)
            .finish()
    }
}
