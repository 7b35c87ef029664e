//! Script contexts.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};

use crate::config::RuntimeConfig;
use crate::conversion::{JsonConverter, ValueConverter};
use crate::engine::{EngineApi, EngineResult, ExceptionInfo, RawHandle, SharedEngine};
use crate::error::{Error, Result, ScriptException};
use crate::gc::{Flyweight, FlyweightCore, ReferencePool, ReferencePoolStats};
use crate::module::{self, JsModuleRecord, ModuleLoader};
use crate::property::JsPropertyId;
use crate::runtime::RuntimeShared;
use crate::scope::{ExecutionScope, ScopeFlag};
use crate::value::JsValue;

/// A global object plus everything created against it.
///
/// Value and module wrappers are pooled per context and disposed together
/// with it. Most operations require an [`ExecutionScope`]; the convenience
/// entry points ([`evaluate_module`](Self::evaluate_module)) open one when
/// none is active on this thread.
pub struct JsContext {
    core: FlyweightCore,
    runtime: Arc<RuntimeShared>,
    scope_flag: ScopeFlag,
    values: Arc<ReferencePool<JsValue>>,
    modules: Arc<ReferencePool<JsModuleRecord>>,
    loader: RwLock<Option<Arc<dyn ModuleLoader>>>,
    converter: RwLock<Arc<dyn ValueConverter>>,
    this: Weak<JsContext>,
}

impl JsContext {
    pub(crate) fn create(runtime: &Arc<RuntimeShared>, raw: RawHandle) -> Result<Arc<Self>> {
        let core = FlyweightCore::owned(runtime.engine().clone(), raw, runtime.deferred().clone())?;
        let values = ReferencePool::new("value");
        let modules = ReferencePool::new("module record");

        let context = Arc::new_cyclic(|this| Self {
            core,
            runtime: Arc::clone(runtime),
            scope_flag: ScopeFlag::default(),
            values: Arc::clone(&values),
            modules: Arc::clone(&modules),
            loader: RwLock::new(None),
            converter: RwLock::new(Arc::new(JsonConverter::default())),
            this: this.clone(),
        });

        context.core.on_before_collect(Box::new(move |raw| {
            tracing::debug!("Context {} going away, disposing its modules and values", raw);
            modules.dispose_all();
            values.dispose_all();
        }));

        Ok(context)
    }

    pub(crate) fn engine(&self) -> &SharedEngine {
        self.core.engine()
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.runtime
    }

    pub(crate) fn scope_flag(&self) -> &ScopeFlag {
        &self.scope_flag
    }

    pub(crate) fn modules(&self) -> &Arc<ReferencePool<JsModuleRecord>> {
        &self.modules
    }

    pub(crate) fn arc(&self) -> Result<Arc<JsContext>> {
        self.this.upgrade().ok_or_else(Error::disposed::<Self>)
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.runtime.config()
    }

    // ---- scopes ---------------------------------------------------------

    /// Enter an execution scope on this context.
    ///
    /// Fails with `ScopeAlreadyActive` if any scope is active on it.
    pub fn scope(&self) -> Result<ExecutionScope<'_>> {
        ExecutionScope::enter(self)
    }

    /// True when this thread holds a scope on this context.
    pub fn has_active_scope(&self) -> bool {
        self.scope_flag.is_held_by_current_thread()
    }

    /// The live context handle, provided this thread holds its scope.
    pub(crate) fn require_scope(&self) -> Result<RawHandle> {
        let raw = self.core.live_handle::<Self>()?;

        if !self.scope_flag.is_held_by_current_thread() {
            return Err(Error::NoActiveScope);
        }

        Ok(raw)
    }

    /// Run `f` inside a scope, opening one only if this thread holds none.
    pub fn with_scope<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        if self.has_active_scope() {
            return f(self);
        }

        let _scope = self.scope()?;
        f(self)
    }

    // ---- values ---------------------------------------------------------

    /// Canonical wrapper for a value handle.
    pub(crate) fn wrap(&self, raw: RawHandle) -> Result<Arc<JsValue>> {
        let context = self.arc()?;
        self.values
            .get_or_add(raw, || JsValue::create(&context, raw))
    }

    fn make<F>(&self, f: F) -> Result<Arc<JsValue>>
    where
        F: FnOnce(&dyn EngineApi) -> EngineResult<RawHandle>,
    {
        self.require_scope()?;
        let raw = self.check(f(self.engine().as_ref()))?;
        self.wrap(raw)
    }

    pub fn undefined(&self) -> Result<Arc<JsValue>> {
        self.make(|e| e.undefined_value())
    }

    pub fn null(&self) -> Result<Arc<JsValue>> {
        self.make(|e| e.null_value())
    }

    pub fn boolean(&self, value: bool) -> Result<Arc<JsValue>> {
        self.make(|e| e.boolean_value(value))
    }

    pub fn number(&self, value: f64) -> Result<Arc<JsValue>> {
        self.make(|e| e.number_value(value))
    }

    pub fn string(&self, value: &str) -> Result<Arc<JsValue>> {
        self.make(|e| e.string_value(value))
    }

    pub fn symbol(&self, description: &str) -> Result<Arc<JsValue>> {
        self.make(|e| e.create_symbol(description))
    }

    pub fn object(&self) -> Result<Arc<JsValue>> {
        self.make(|e| e.create_object())
    }

    pub fn array(&self, length: u32) -> Result<Arc<JsValue>> {
        self.make(|e| e.create_array(length))
    }

    pub fn error(&self, message: &str) -> Result<Arc<JsValue>> {
        self.make(|e| e.create_error(message))
    }

    pub fn global(&self) -> Result<Arc<JsValue>> {
        self.make(|e| e.global_object())
    }

    /// Pooled property id for `name`.
    pub fn property_id(&self, name: &str) -> Result<Arc<JsPropertyId>> {
        self.require_scope()?;
        self.runtime.property_id(name)
    }

    pub fn value_stats(&self) -> ReferencePoolStats {
        self.values.stats()
    }

    pub(crate) fn purge_dead_values(&self) {
        let purged = self.values.purge_dead();

        if purged > 0 {
            tracing::trace!("Purged {} stale value entries", purged);
        }
    }

    // ---- conversion -----------------------------------------------------

    pub fn set_converter(&self, converter: Arc<dyn ValueConverter>) {
        *self.converter.write() = converter;
    }

    pub fn converter(&self) -> Arc<dyn ValueConverter> {
        self.converter.read().clone()
    }

    pub fn to_engine_value(&self, value: &serde_json::Value) -> Result<Arc<JsValue>> {
        self.converter().to_engine_value(self, value)
    }

    pub fn to_host_value(&self, value: &JsValue) -> Result<serde_json::Value> {
        self.converter().to_host_value(value)
    }

    // ---- exceptions -----------------------------------------------------

    /// Map an engine failure to an error. Script failures fetch and clear
    /// the pending exception, so none is left behind.
    pub(crate) fn check<T>(&self, result: EngineResult<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.status.has_pending_exception() => match self.take_exception()? {
                Some(exception) => Err(Error::Script(exception)),
                None => Err(err.into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch and clear the engine's pending exception.
    pub fn take_exception(&self) -> Result<Option<ScriptException>> {
        let engine = self.engine();

        if !engine.has_exception()? {
            return Ok(None);
        }

        let info = engine.get_and_clear_exception()?;
        Ok(Some(self.describe_exception(info)))
    }

    fn describe_exception(&self, info: ExceptionInfo) -> ScriptException {
        let engine = self.engine();

        let message = match engine.to_string(info.exception) {
            Ok(message) => message,
            Err(err) => {
                // A throwing toString must not leave its own exception behind
                if matches!(engine.has_exception(), Ok(true)) {
                    if let Err(err) = engine.get_and_clear_exception() {
                        tracing::trace!("Clearing stringify exception failed: {}", err);
                    }
                }
                format!("<exception {} could not be stringified: {}>", info.exception, err)
            }
        };

        ScriptException {
            message,
            value: self.wrap(info.exception).ok(),
            line: info.line,
            column: info.column,
            length: info.length,
            source_line: info.source,
            url: info.url,
        }
    }

    /// Script exception for a value that was thrown or rejected.
    pub(crate) fn exception_from_value(&self, value: Arc<JsValue>) -> ScriptException {
        let message = value
            .to_rust_string()
            .unwrap_or_else(|err| format!("<unprintable rejection: {}>", err));

        ScriptException {
            value: Some(value),
            ..ScriptException::from_message(message)
        }
    }

    /// Make `err` the engine's pending exception. Used where host failures
    /// cross back into the engine; a pending exception takes precedence.
    pub(crate) fn raise(&self, err: &Error) {
        let engine = self.engine();

        if matches!(engine.has_exception(), Ok(true)) {
            return;
        }

        if let Error::Script(ScriptException {
            value: Some(value), ..
        }) = err
        {
            if let Ok(raw) = value.live() {
                if engine.set_exception(raw).is_ok() {
                    return;
                }
            }
        }

        let result = engine
            .create_error(&err.to_string())
            .and_then(|exception| engine.set_exception(exception));

        if let Err(engine_err) = result {
            tracing::warn!("Cannot raise '{}' in the engine: {}", err, engine_err);
        }
    }

    // ---- modules --------------------------------------------------------

    pub fn set_module_loader(&self, loader: Arc<dyn ModuleLoader>) {
        *self.loader.write() = Some(loader);
    }

    pub fn clear_module_loader(&self) {
        *self.loader.write() = None;
    }

    pub fn module_loader(&self) -> Option<Arc<dyn ModuleLoader>> {
        self.loader.read().clone()
    }

    /// Evaluate `source` as an ES module and return its default export.
    ///
    /// Opens a scope for the call when this thread holds none. Fails with
    /// `ScopeAlreadyActive` if another thread holds one.
    pub fn evaluate_module(&self, source: &str) -> Result<Arc<JsValue>> {
        self.with_scope(|context| module::evaluate_module(&context.arc()?, source))
    }

    /// Run queued promise jobs, bounded by the runtime's drain limit.
    pub fn drain_jobs(&self) -> Result<usize> {
        self.require_scope()?;
        self.runtime
            .tasks()
            .drain(self, self.config().max_drained_tasks)
    }

    pub fn module_stats(&self) -> ReferencePoolStats {
        self.modules.stats()
    }
}

impl Flyweight for JsContext {
    fn core(&self) -> &FlyweightCore {
        &self.core
    }
}

impl std::fmt::Debug for JsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsContext")
            .field("handle", &self.core.raw())
            .field("runtime", &self.runtime.raw())
            .field("disposed", &self.core.is_disposed())
            .field("scope_active", &self.scope_flag.is_active())
            .field("values", &self.values.len())
            .field("modules", &self.modules.len())
            .finish()
    }
}
