//! Engine call interface.
//!
//! The embedded engine owns its own garbage-collected heap. The host only
//! ever sees [`RawHandle`]s into that heap and talks to the engine through
//! the synchronous, object-safe [`EngineApi`] trait.
//!
//! ## Conventions
//!
//! - Value, property and exception calls operate on the engine's *current
//!   context* (see [`EngineApi::set_current_context`]) and fail with
//!   [`EngineStatus::NoCurrentContext`] when none is set.
//! - Contexts and module records are returned with one host reference
//!   ([`EngineApi::add_ref`]) that the host must [`EngineApi::release`].
//!   Values are returned unowned: the engine may reclaim them whenever they
//!   are unreachable from script, firing the before-collect callback first.
//! - Engines may invoke host callbacks (before-collect, module fetch and
//!   ready, promise continuation) synchronously from inside any call. They
//!   never hold internal locks while doing so.
//! - Calls made from inside a before-collect callback fail with
//!   [`EngineStatus::InObjectBeforeCollectCallback`].
//!
//! Every method has a default body returning [`EngineStatus::NotImplemented`]
//! so that restricted engines only provide what they support.

mod status;

pub use status::{EngineError, EngineStatus, StatusCategory};

use std::fmt;
use std::sync::Arc;

use crate::config::RuntimeConfig;

/// Result of an engine call.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine shared by every wrapper that refers into it.
pub type SharedEngine = Arc<dyn EngineApi>;

/// Opaque identifier of an engine-owned object.
///
/// Handles compare by identity: the engine hands out the same value for
/// repeated lookups of the same object, and never reuses a value while the
/// object it named is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(u64);

impl RawHandle {
    pub const NULL: RawHandle = RawHandle(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of an engine value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Symbol,
    Object,
    Array,
    Function,
    Error,
}

impl ValueType {
    /// Kinds the engine interns and never collects.
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            Self::Undefined | Self::Null | Self::Boolean | Self::Number
        )
    }

    /// Kinds that carry properties.
    pub fn is_object_like(self) -> bool {
        matches!(
            self,
            Self::Object | Self::Array | Self::Function | Self::Error
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Symbol => "symbol",
            Self::Object => "object",
            Self::Array => "array",
            Self::Function => "function",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Answer of the host's module fetch callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The specifier resolved to this module record.
    Resolved(RawHandle),
    /// Resolution failed; the host has set a pending exception.
    Failed,
}

/// Called once before the engine reclaims a handle.
pub type BeforeCollectCallback = Arc<dyn Fn(RawHandle) + Send + Sync>;

/// Called with `(referencing_record, specifier)` while a module is parsed.
pub type FetchImportedModuleCallback = Arc<dyn Fn(RawHandle, &str) -> FetchOutcome + Send + Sync>;

/// Called with `(record, exception)` once a record's import subtree resolved.
/// Returns `true` when the engine may keep going.
pub type NotifyModuleReadyCallback = Arc<dyn Fn(RawHandle, Option<RawHandle>) -> bool + Send + Sync>;

/// Called with a task function whenever a promise job is queued.
pub type PromiseContinuationCallback = Arc<dyn Fn(RawHandle) + Send + Sync>;

/// Host information attached to a module record.
///
/// Callbacks are looked up on the root of a record's referencing chain, so
/// only root records carry them.
#[derive(Clone)]
pub enum ModuleHostInfo {
    FetchImportedModule(Option<FetchImportedModuleCallback>),
    NotifyModuleReady(Option<NotifyModuleReadyCallback>),
    HostDefined(Option<RawHandle>),
    Exception(RawHandle),
    Url(String),
}

impl fmt::Debug for ModuleHostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchImportedModule(cb) => f
                .debug_tuple("FetchImportedModule")
                .field(&cb.is_some())
                .finish(),
            Self::NotifyModuleReady(cb) => f
                .debug_tuple("NotifyModuleReady")
                .field(&cb.is_some())
                .finish(),
            Self::HostDefined(h) => f.debug_tuple("HostDefined").field(h).finish(),
            Self::Exception(h) => f.debug_tuple("Exception").field(h).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// Pending exception with whatever source metadata the engine could derive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub exception: RawHandle,
    /// Zero-based line of the faulting expression.
    pub line: Option<u32>,
    /// Zero-based column of the faulting expression.
    pub column: Option<u32>,
    /// Length of the faulting source text (0 when unknown).
    pub length: usize,
    /// Text of the faulting source line.
    pub source: Option<String>,
    pub url: Option<String>,
}

impl ExceptionInfo {
    /// Exception without metadata.
    pub fn bare(exception: RawHandle) -> Self {
        Self {
            exception,
            line: None,
            column: None,
            length: 0,
            source: None,
            url: None,
        }
    }
}

fn not_implemented<T>() -> EngineResult<T> {
    Err(EngineError::new(EngineStatus::NotImplemented))
}

/// Synchronous call boundary to the embedded engine.
#[allow(unused_variables)]
pub trait EngineApi: Send + Sync + 'static {
    // ---- runtimes and contexts ------------------------------------------

    fn create_runtime(&self, config: &RuntimeConfig) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn dispose_runtime(&self, runtime: RawHandle) -> EngineResult<()> {
        not_implemented()
    }

    /// Run a full collection; before-collect callbacks fire synchronously.
    fn collect_garbage(&self, runtime: RawHandle) -> EngineResult<()> {
        not_implemented()
    }

    fn create_context(&self, runtime: RawHandle) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn set_current_context(&self, context: Option<RawHandle>) -> EngineResult<()> {
        not_implemented()
    }

    fn current_context(&self) -> EngineResult<Option<RawHandle>> {
        not_implemented()
    }

    // ---- ownership and lifetime -----------------------------------------

    /// Add a host reference; returns the new count.
    fn add_ref(&self, handle: RawHandle) -> EngineResult<u32> {
        not_implemented()
    }

    /// Drop a host reference; returns the new count.
    fn release(&self, handle: RawHandle) -> EngineResult<u32> {
        not_implemented()
    }

    /// Register (or with `None`, unregister) the before-collect callback.
    ///
    /// Fails with [`EngineStatus::NoWeakRefRequired`] for handle kinds the
    /// engine never collects.
    fn set_before_collect_callback(
        &self,
        handle: RawHandle,
        callback: Option<BeforeCollectCallback>,
    ) -> EngineResult<()> {
        not_implemented()
    }

    // ---- values ---------------------------------------------------------

    fn value_type(&self, value: RawHandle) -> EngineResult<ValueType> {
        not_implemented()
    }

    fn undefined_value(&self) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn null_value(&self) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn boolean_value(&self, value: bool) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn number_value(&self, value: f64) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn string_value(&self, value: &str) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn create_symbol(&self, description: &str) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn create_object(&self) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn create_array(&self, length: u32) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn create_error(&self, message: &str) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn global_object(&self) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn to_number(&self, value: RawHandle) -> EngineResult<f64> {
        not_implemented()
    }

    fn to_boolean(&self, value: RawHandle) -> EngineResult<bool> {
        not_implemented()
    }

    fn to_string(&self, value: RawHandle) -> EngineResult<String> {
        not_implemented()
    }

    fn strict_equals(&self, a: RawHandle, b: RawHandle) -> EngineResult<bool> {
        not_implemented()
    }

    // ---- properties -----------------------------------------------------

    fn property_id_from_name(&self, name: &str) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn property_id_from_symbol(&self, symbol: RawHandle) -> EngineResult<RawHandle> {
        not_implemented()
    }

    /// Name of a string-keyed property id, `None` for symbol-keyed ids.
    fn property_id_name(&self, property_id: RawHandle) -> EngineResult<Option<String>> {
        not_implemented()
    }

    fn get_property(&self, object: RawHandle, property_id: RawHandle) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn set_property(
        &self,
        object: RawHandle,
        property_id: RawHandle,
        value: RawHandle,
    ) -> EngineResult<()> {
        not_implemented()
    }

    fn has_property(&self, object: RawHandle, property_id: RawHandle) -> EngineResult<bool> {
        not_implemented()
    }

    fn delete_property(&self, object: RawHandle, property_id: RawHandle) -> EngineResult<bool> {
        not_implemented()
    }

    fn get_indexed_property(&self, object: RawHandle, index: u32) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn set_indexed_property(
        &self,
        object: RawHandle,
        index: u32,
        value: RawHandle,
    ) -> EngineResult<()> {
        not_implemented()
    }

    fn has_indexed_property(&self, object: RawHandle, index: u32) -> EngineResult<bool> {
        not_implemented()
    }

    fn delete_indexed_property(&self, object: RawHandle, index: u32) -> EngineResult<bool> {
        not_implemented()
    }

    /// Own enumerable string-keyed property names, in insertion order.
    fn own_property_names(&self, object: RawHandle) -> EngineResult<Vec<String>> {
        not_implemented()
    }

    // ---- functions ------------------------------------------------------

    fn call_function(
        &self,
        function: RawHandle,
        this: RawHandle,
        args: &[RawHandle],
    ) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn construct_object(&self, function: RawHandle, args: &[RawHandle]) -> EngineResult<RawHandle> {
        not_implemented()
    }

    // ---- exceptions -----------------------------------------------------

    fn has_exception(&self) -> EngineResult<bool> {
        not_implemented()
    }

    fn set_exception(&self, exception: RawHandle) -> EngineResult<()> {
        not_implemented()
    }

    fn get_and_clear_exception(&self) -> EngineResult<ExceptionInfo> {
        not_implemented()
    }

    // ---- modules --------------------------------------------------------

    /// Create a module record; `referencing` is `None` only for roots.
    fn initialize_module_record(
        &self,
        referencing: Option<RawHandle>,
        normalized_name: &str,
    ) -> EngineResult<RawHandle> {
        not_implemented()
    }

    /// Parse a record's source. Fetch callbacks for its imports, and the
    /// ready callback for the record, fire before this returns.
    fn parse_module_source(
        &self,
        record: RawHandle,
        source_context: u64,
        source: &str,
    ) -> EngineResult<()> {
        not_implemented()
    }

    /// Evaluate a root record and everything it imports.
    fn module_evaluation(&self, record: RawHandle) -> EngineResult<RawHandle> {
        not_implemented()
    }

    fn set_module_host_info(&self, record: RawHandle, info: ModuleHostInfo) -> EngineResult<()> {
        not_implemented()
    }

    // ---- promises -------------------------------------------------------

    fn set_promise_continuation_callback(
        &self,
        runtime: RawHandle,
        callback: Option<PromiseContinuationCallback>,
    ) -> EngineResult<()> {
        not_implemented()
    }

    /// Run jobs the engine keeps internally. Engines that hand every job to
    /// the continuation callback have nothing to do here.
    fn run_microtasks(&self) -> EngineResult<()> {
        Ok(())
    }
}
