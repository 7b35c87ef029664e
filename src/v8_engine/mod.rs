//! V8 binding for the engine call interface.
//!
//! A [`V8Engine`] owns one isolate and is bound to the thread that created
//! it: calls from any other thread fail with [`EngineStatus::WrongThread`].
//! Runtimes created through it share the isolate and group the contexts
//! disposed with them.
//!
//! Values are held strongly until the host registers a before-collect
//! callback, then weakly. Reclaimed values are detected after a collection
//! and on every context switch, and their callbacks run once no V8 scope is
//! open. Promise jobs stay in V8's microtask queue; [`EngineApi::run_microtasks`]
//! runs a checkpoint.

mod platform;
mod table;

pub use platform::get_platform;

use std::cell::{Cell, RefCell, RefMut};
use std::pin::pin;
use std::thread::{self, ThreadId};

use table::{Entry, HandleTable, Identity, ModuleEntry, ModuleLink, Strength, ValueEntry, invalid};

use crate::config::RuntimeConfig;
use crate::engine::{
    BeforeCollectCallback, EngineApi, EngineError, EngineResult, EngineStatus, ExceptionInfo,
    FetchOutcome, ModuleHostInfo, PromiseContinuationCallback, RawHandle, ValueType,
};

thread_local! {
    /// Import links of the graph being instantiated on this thread.
    static LINKS: RefCell<Vec<ModuleLink>> = const { RefCell::new(Vec::new()) };
}

struct Inner {
    // Handles go before the isolate they point into
    table: HandleTable,
    isolate: v8::OwnedIsolate,
}

/// [`EngineApi`] over a V8 isolate.
pub struct V8Engine {
    owner: ThreadId,
    inner: RefCell<Option<Inner>>,
    collecting: Cell<bool>,
}

// SAFETY: every entry point checks `owner` before touching any other field,
// so the isolate and its handles are only used from the creating thread.
unsafe impl Send for V8Engine {}
unsafe impl Sync for V8Engine {}

impl V8Engine {
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    /// Create the isolate with `config`'s heap limits.
    pub fn with_config(config: &RuntimeConfig) -> Self {
        get_platform();

        let params = v8::CreateParams::default().heap_limits(
            config.heap_initial_mb * 1024 * 1024,
            config.heap_max_mb * 1024 * 1024,
        );
        let mut isolate = v8::Isolate::new(params);
        isolate.set_microtasks_policy(v8::MicrotasksPolicy::Explicit);

        log::debug!(
            "Created V8 isolate (heap {}..{} MB)",
            config.heap_initial_mb,
            config.heap_max_mb
        );

        Self {
            owner: thread::current().id(),
            inner: RefCell::new(Some(Inner {
                table: HandleTable::default(),
                isolate,
            })),
            collecting: Cell::new(false),
        }
    }

    fn enter(&self) -> EngineResult<RefMut<'_, Inner>> {
        if thread::current().id() != self.owner {
            return Err(EngineError::new(EngineStatus::WrongThread));
        }

        if self.collecting.get() {
            return Err(EngineError::new(EngineStatus::InObjectBeforeCollectCallback));
        }

        let inner = self
            .inner
            .try_borrow_mut()
            .map_err(|_| EngineError::new(EngineStatus::InDisabledState))?;

        RefMut::filter_map(inner, Option::as_mut)
            .map_err(|_| EngineError::new(EngineStatus::InDisabledState))
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut HandleTable) -> EngineResult<R>) -> EngineResult<R> {
        let mut inner = self.enter()?;
        f(&mut inner.table)
    }

    /// Run `f` inside a handle scope entered into `context` (or the current context).
    fn in_context<R>(
        &self,
        context: Option<u64>,
        f: impl FnOnce(&mut v8::PinScope, &mut HandleTable) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut inner = self.enter()?;
        let Inner { table, isolate } = &mut *inner;

        let context = match context {
            Some(context) => context,
            None => table.current()?,
        };
        let global = table.context(context)?.clone();

        let scope = pin!(v8::HandleScope::new(isolate));
        let mut scope = scope.init();
        let ctx = v8::Local::new(&scope, &global);
        let scope = &mut v8::ContextScope::new(&mut scope, ctx);

        f(scope, table)
    }

    /// Compile `record` and return its import specifiers in source order.
    fn compile(
        &self,
        record: RawHandle,
        source_context: u64,
        source: &str,
    ) -> EngineResult<Vec<String>> {
        let (context, name) = self.with_table(|table| {
            let module = table.module(record.as_raw())?;

            if module.module.is_some() {
                return Err(EngineError::new(EngineStatus::ModuleParsed));
            }

            let name = module.url.clone().unwrap_or_else(|| module.name.clone());
            Ok((module.context, name))
        })?;

        self.in_context(Some(context), |scope, table| {
            let previous = table.current.replace(context);
            let compiled = compile_module(scope, table, &name, source_context, source);
            table.current = previous;

            let (module, specifiers) = compiled?;
            table.module_mut(record.as_raw())?.module = Some(module);
            Ok(specifiers)
        })
    }

    /// Report a failed import to the ready callback and leave the failure pending.
    fn fail_import(&self, record: RawHandle, specifier: &str) -> EngineError {
        let info = match self.get_and_clear_exception() {
            Ok(info) => info,
            Err(_) => match self.create_error(&format!("cannot resolve module '{specifier}'")) {
                Ok(error) => ExceptionInfo::bare(error),
                Err(err) => return err,
            },
        };

        let ready = self
            .with_table(|table| Ok(table.root_of(record.as_raw())?.ready.clone()))
            .ok()
            .flatten();

        if let Some(ready) = ready {
            ready(record, Some(info.exception));
        }

        let restored = self.with_table(|table| {
            if table.pending.is_none() {
                table.pending = Some(info);
            }
            Ok(())
        });

        if let Err(err) = restored {
            log::warn!("Cannot keep import failure of '{}' pending: {}", specifier, err);
        }

        EngineError::new(EngineStatus::ScriptException)
    }

    /// Notify the host about values the collector reclaimed.
    fn deliver_reclaimed(&self) -> EngineResult<()> {
        let reclaimed = self.with_table(|table| Ok(table.take_reclaimed()))?;

        if reclaimed.is_empty() {
            return Ok(());
        }

        log::trace!("Delivering {} before-collect callbacks", reclaimed.len());

        for (id, callback) in reclaimed {
            let _collecting = CollectingGuard::new(&self.collecting);
            callback(RawHandle::from_raw(id));
        }

        Ok(())
    }
}

impl Default for V8Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for V8Engine {
    fn drop(&mut self) {
        let Some(mut inner) = self.inner.get_mut().take() else {
            return;
        };

        if thread::current().id() != self.owner {
            log::error!("V8Engine dropped off its owner thread, leaking the isolate");
            std::mem::forget(inner);
            return;
        }

        inner.table.clear();
    }
}

struct CollectingGuard<'a>(&'a Cell<bool>);

impl<'a> CollectingGuard<'a> {
    fn new(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

// ---- handle helpers --------------------------------------------------------

fn classify(value: v8::Local<v8::Value>) -> ValueType {
    if value.is_undefined() {
        ValueType::Undefined
    } else if value.is_null() {
        ValueType::Null
    } else if value.is_boolean() {
        ValueType::Boolean
    } else if value.is_number() {
        ValueType::Number
    } else if value.is_string() {
        ValueType::String
    } else if value.is_symbol() {
        ValueType::Symbol
    } else if value.is_array() {
        ValueType::Array
    } else if value.is_function() {
        ValueType::Function
    } else if value.is_native_error() {
        ValueType::Error
    } else {
        ValueType::Object
    }
}

fn identity(scope: &mut v8::PinScope, value: v8::Local<v8::Value>, kind: ValueType) -> Identity {
    match kind {
        ValueType::Undefined => Identity::Undefined,
        ValueType::Null => Identity::Null,
        ValueType::Boolean => Identity::Boolean(value.is_true()),
        ValueType::Number => Identity::Number(value.number_value(scope).unwrap_or(f64::NAN).to_bits()),
        ValueType::String => Identity::String(value.to_rust_string_lossy(scope)),
        ValueType::Symbol => match v8::Local::<v8::Symbol>::try_from(value) {
            Ok(symbol) => Identity::Hashed(symbol.get_identity_hash().get()),
            Err(_) => Identity::Hashed(0),
        },
        _ => match v8::Local::<v8::Object>::try_from(value) {
            Ok(object) => Identity::Hashed(object.get_identity_hash().get()),
            Err(_) => Identity::Hashed(0),
        },
    }
}

fn local<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    table: &HandleTable,
    handle: RawHandle,
) -> EngineResult<v8::Local<'s, v8::Value>> {
    match &table.value(handle.as_raw())?.handle {
        Strength::Strong(global) => Ok(v8::Local::new(scope, global)),
        Strength::Weak(weak) => weak.to_local(scope).ok_or(invalid()),
    }
}

fn object<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    table: &HandleTable,
    handle: RawHandle,
) -> EngineResult<v8::Local<'s, v8::Object>> {
    if !table.value(handle.as_raw())?.kind.is_object_like() {
        return Err(EngineError::new(EngineStatus::ArgumentNotObject));
    }

    let value = local(scope, table, handle)?;
    v8::Local::<v8::Object>::try_from(value)
        .map_err(|_| EngineError::new(EngineStatus::ArgumentNotObject))
}

fn function<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    table: &HandleTable,
    handle: RawHandle,
) -> EngineResult<v8::Local<'s, v8::Function>> {
    let value = local(scope, table, handle)?;
    v8::Local::<v8::Function>::try_from(value).map_err(|_| invalid())
}

fn key<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    table: &HandleTable,
    property_id: RawHandle,
) -> EngineResult<v8::Local<'s, v8::Value>> {
    let key = table.property_key(property_id.as_raw())?;
    Ok(v8::Local::new(scope, key))
}

/// Handle for `value`, reusing the one already issued for the same value.
fn intern(scope: &mut v8::PinScope, table: &mut HandleTable, value: v8::Local<v8::Value>) -> RawHandle {
    let kind = classify(value);
    let identity = identity(scope, value, kind);
    let context = if kind.is_immediate() {
        None
    } else {
        table.current
    };

    for candidate in table.candidates(context, &identity) {
        let same = match &identity {
            Identity::Hashed(_) => local(scope, table, RawHandle::from_raw(candidate))
                .map(|existing| existing == value)
                .unwrap_or(false),
            _ => true,
        };

        if same {
            return RawHandle::from_raw(candidate);
        }
    }

    let handle = Strength::Strong(v8::Global::new(scope, value));

    RawHandle::from_raw(table.insert(Entry::Value(ValueEntry {
        context,
        kind,
        identity,
        handle,
        refs: 0,
        callback: None,
    })))
}

/// Record `exception` as pending with the metadata V8 derives for it.
fn raise(
    scope: &mut v8::PinScope,
    table: &mut HandleTable,
    exception: Option<v8::Local<v8::Value>>,
    status: EngineStatus,
) -> EngineError {
    let Some(exception) = exception else {
        return EngineError::new(EngineStatus::ScriptTerminated);
    };

    let handle = intern(scope, table, exception);
    let message = v8::Exception::create_message(scope, exception);

    let line = message
        .get_line_number(scope)
        .map(|line| line.saturating_sub(1) as u32);
    let start = message.get_start_column();
    let end = message.get_end_column();
    let source = message
        .get_source_line(scope)
        .map(|text| text.to_rust_string_lossy(scope));
    let url = message
        .get_script_resource_name(scope)
        .filter(|name| !name.is_undefined())
        .map(|name| name.to_rust_string_lossy(scope));

    table.pending = Some(ExceptionInfo {
        exception: handle,
        line,
        column: line.map(|_| start as u32),
        length: end.saturating_sub(start),
        source,
        url,
    });

    EngineError::new(status)
}

/// Unwrap a V8 call made under a `TryCatch`, raising what it caught.
macro_rules! caught {
    ($tc:ident, $table:ident, $call:expr) => {
        match $call {
            Some(value) => value,
            None => {
                let exception = $tc.exception();
                return Err(raise($tc, $table, exception, EngineStatus::ScriptException));
            }
        }
    };
}

enum Released {
    Context,
    Module,
    /// Whether a before-collect callback still watches the value.
    Value(bool),
}

fn compile_module(
    scope: &mut v8::PinScope,
    table: &mut HandleTable,
    name: &str,
    source_context: u64,
    source: &str,
) -> EngineResult<(v8::Global<v8::Module>, Vec<String>)> {
    let out_of_memory = || EngineError::new(EngineStatus::OutOfMemory);
    let code = v8::String::new(scope, source).ok_or_else(out_of_memory)?;
    let resource = v8::String::new(scope, name).ok_or_else(out_of_memory)?;

    let origin = v8::ScriptOrigin::new(
        scope,
        resource.into(),
        0,
        0,
        false,
        source_context as i32,
        None,
        false,
        false,
        true,
        None,
    );
    let mut source = v8::script_compiler::Source::new(code, Some(&origin));

    let tc = pin!(v8::TryCatch::new(scope));
    let tc = &mut tc.init();

    let Some(module) = v8::script_compiler::compile_module(tc, &mut source) else {
        let exception = tc.exception();
        return Err(raise(tc, table, exception, EngineStatus::ScriptCompile));
    };

    let requests = module.get_module_requests();
    let mut specifiers = Vec::new();

    for index in 0..requests.length() {
        let Some(request) = requests.get(tc, index) else {
            continue;
        };
        let Ok(request) = v8::Local::<v8::ModuleRequest>::try_from(request) else {
            continue;
        };

        let specifier = request.get_specifier().to_rust_string_lossy(tc);

        if !specifiers.contains(&specifier) {
            specifiers.push(specifier);
        }
    }

    Ok((v8::Global::new(tc, module), specifiers))
}

fn resolve_import<'s>(
    context: v8::Local<'s, v8::Context>,
    specifier: v8::Local<'s, v8::String>,
    _attributes: v8::Local<'s, v8::FixedArray>,
    referrer: v8::Local<'s, v8::Module>,
) -> Option<v8::Local<'s, v8::Module>> {
    let scope = pin!(unsafe { v8::CallbackScope::new(context) });
    let scope = &mut scope.init();

    let specifier = specifier.to_rust_string_lossy(scope);
    let referrer = referrer.get_identity_hash();

    LINKS.with(|links| {
        links
            .borrow()
            .iter()
            .find(|link| {
                link.specifier == specifier
                    && v8::Local::new(scope, &link.referrer).get_identity_hash() == referrer
            })
            .map(|link| v8::Local::new(scope, &link.target))
    })
}

fn evaluate_graph(
    scope: &mut v8::PinScope,
    table: &mut HandleTable,
    root: &v8::Global<v8::Module>,
) -> EngineResult<RawHandle> {
    let tc = pin!(v8::TryCatch::new(scope));
    let tc = &mut tc.init();

    let module = v8::Local::new(tc, root);

    if module.get_status() == v8::ModuleStatus::Uninstantiated {
        caught!(tc, table, module.instantiate_module(tc, resolve_import));
    }

    let value = caught!(tc, table, module.evaluate(tc));

    if module.get_status() == v8::ModuleStatus::Errored {
        let exception = module.get_exception();
        return Err(raise(tc, table, Some(exception), EngineStatus::ScriptException));
    }

    if let Ok(promise) = v8::Local::<v8::Promise>::try_from(value) {
        if promise.state() == v8::PromiseState::Rejected {
            promise.mark_as_handled();
            let exception = promise.result(tc);
            return Err(raise(tc, table, Some(exception), EngineStatus::ScriptException));
        }
    }

    Ok(intern(tc, table, value))
}

impl EngineApi for V8Engine {
    // ---- runtimes and contexts ----------------------------------------------

    fn create_runtime(&self, config: &RuntimeConfig) -> EngineResult<RawHandle> {
        self.with_table(|table| {
            let id = table.insert(Entry::Runtime {
                config: config.clone(),
                continuation: None,
            });
            log::debug!("Created V8 runtime #{}", id);
            Ok(RawHandle::from_raw(id))
        })
    }

    fn dispose_runtime(&self, runtime: RawHandle) -> EngineResult<()> {
        self.with_table(|table| {
            table.runtime_config(runtime.as_raw())?;

            if let Some(current) = table.current {
                if table.runtime_of(current) == Some(runtime.as_raw()) {
                    return Err(EngineError::new(EngineStatus::RuntimeInUse));
                }
            }

            for context in table.contexts_of(runtime.as_raw()) {
                table.dispose_context(context);
            }

            table.remove(runtime.as_raw());
            log::debug!("Disposed V8 runtime {}", runtime);
            Ok(())
        })
    }

    fn collect_garbage(&self, runtime: RawHandle) -> EngineResult<()> {
        {
            let mut inner = self.enter()?;
            inner.table.runtime_config(runtime.as_raw())?;
            inner.isolate.low_memory_notification();
        }

        self.deliver_reclaimed()
    }

    fn create_context(&self, runtime: RawHandle) -> EngineResult<RawHandle> {
        let mut inner = self.enter()?;
        let Inner { table, isolate } = &mut *inner;
        let disable_eval = table.runtime_config(runtime.as_raw())?.disable_eval;

        let context = {
            let scope = pin!(v8::HandleScope::new(isolate));
            let mut scope = scope.init();
            let context = v8::Context::new(&scope, Default::default());

            if disable_eval {
                context.set_allow_generation_from_strings(false);
            }

            let scope = &mut v8::ContextScope::new(&mut scope, context);
            v8::Global::new(scope.as_ref(), context)
        };

        let id = table.insert(Entry::Context {
            runtime: runtime.as_raw(),
            context,
            refs: 1,
        });
        Ok(RawHandle::from_raw(id))
    }

    fn set_current_context(&self, context: Option<RawHandle>) -> EngineResult<()> {
        self.with_table(|table| {
            if let Some(context) = context {
                table.context(context.as_raw())?;
            }

            table.current = context.map(RawHandle::as_raw);
            Ok(())
        })?;

        self.deliver_reclaimed()
    }

    fn current_context(&self) -> EngineResult<Option<RawHandle>> {
        self.with_table(|table| Ok(table.current.map(RawHandle::from_raw)))
    }

    // ---- ownership and lifetime ---------------------------------------------

    fn add_ref(&self, handle: RawHandle) -> EngineResult<u32> {
        let mut inner = self.enter()?;
        let Inner { table, isolate } = &mut *inner;

        match table.get_mut(handle.as_raw())? {
            Entry::Context { refs, .. } => {
                *refs += 1;
                Ok(*refs)
            }
            Entry::Module(module) => {
                module.refs += 1;
                Ok(module.refs)
            }
            Entry::Value(value) => {
                value.promote(isolate)?;
                value.refs += 1;
                Ok(value.refs)
            }
            _ => Err(invalid()),
        }
    }

    fn release(&self, handle: RawHandle) -> EngineResult<u32> {
        let mut inner = self.enter()?;
        let Inner { table, isolate } = &mut *inner;
        let id = handle.as_raw();

        let (remaining, released) = match table.get_mut(id)? {
            Entry::Context { refs, .. } => {
                *refs = refs.saturating_sub(1);
                (*refs, Released::Context)
            }
            Entry::Module(module) => {
                module.refs = module.refs.saturating_sub(1);
                (module.refs, Released::Module)
            }
            Entry::Value(value) => {
                value.refs = value.refs.saturating_sub(1);
                value.demote(isolate);
                (value.refs, Released::Value(value.callback.is_some()))
            }
            _ => return Err(invalid()),
        };

        if remaining == 0 {
            match released {
                Released::Context => table.dispose_context(id),
                Released::Module => table.remove(id),
                // Nothing on the host side can reach it any more
                Released::Value(false) => {
                    table.remove_value(id);
                }
                Released::Value(true) => {}
            }
        }

        Ok(remaining)
    }

    fn set_before_collect_callback(
        &self,
        handle: RawHandle,
        callback: Option<BeforeCollectCallback>,
    ) -> EngineResult<()> {
        let mut inner = self.enter()?;
        let Inner { table, isolate } = &mut *inner;
        let id = handle.as_raw();

        let value = match table.get_mut(id)? {
            Entry::Value(value) if !value.kind.is_immediate() => value,
            _ => return Err(EngineError::new(EngineStatus::NoWeakRefRequired)),
        };

        match callback {
            Some(callback) => {
                value.callback = Some(callback);
                value.demote(isolate);
            }
            None => {
                value.callback = None;

                if value.refs == 0 {
                    table.remove_value(id);
                }
            }
        }

        Ok(())
    }

    // ---- values -------------------------------------------------------------

    fn value_type(&self, value: RawHandle) -> EngineResult<ValueType> {
        self.with_table(|table| Ok(table.value(value.as_raw())?.kind))
    }

    fn undefined_value(&self) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let value = v8::undefined(scope).into();
            Ok(intern(scope, table, value))
        })
    }

    fn null_value(&self) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let value = v8::null(scope).into();
            Ok(intern(scope, table, value))
        })
    }

    fn boolean_value(&self, value: bool) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let value = v8::Boolean::new(scope, value).into();
            Ok(intern(scope, table, value))
        })
    }

    fn number_value(&self, value: f64) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let value = v8::Number::new(scope, value).into();
            Ok(intern(scope, table, value))
        })
    }

    fn string_value(&self, value: &str) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let value = v8::String::new(scope, value)
                .ok_or(EngineError::new(EngineStatus::OutOfMemory))?
                .into();
            Ok(intern(scope, table, value))
        })
    }

    fn create_symbol(&self, description: &str) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let description = v8::String::new(scope, description)
                .ok_or(EngineError::new(EngineStatus::OutOfMemory))?;
            let value = v8::Symbol::new(scope, Some(description)).into();
            Ok(intern(scope, table, value))
        })
    }

    fn create_object(&self) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let value = v8::Object::new(scope).into();
            Ok(intern(scope, table, value))
        })
    }

    fn create_array(&self, length: u32) -> EngineResult<RawHandle> {
        let length = i32::try_from(length).map_err(|_| invalid())?;

        self.in_context(None, |scope, table| {
            let value = v8::Array::new(scope, length).into();
            Ok(intern(scope, table, value))
        })
    }

    fn create_error(&self, message: &str) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let message = v8::String::new(scope, message)
                .ok_or(EngineError::new(EngineStatus::OutOfMemory))?;
            let value = v8::Exception::error(scope, message);
            Ok(intern(scope, table, value))
        })
    }

    fn global_object(&self) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let context = scope.get_current_context();
            let value = context.global(scope).into();
            Ok(intern(scope, table, value))
        })
    }

    fn to_number(&self, value: RawHandle) -> EngineResult<f64> {
        self.in_context(None, |scope, table| {
            let value = local(scope, table, value)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            Ok(caught!(tc, table, value.number_value(tc)))
        })
    }

    fn to_boolean(&self, value: RawHandle) -> EngineResult<bool> {
        self.in_context(None, |scope, table| {
            let value = local(scope, table, value)?;
            Ok(value.boolean_value(scope))
        })
    }

    fn to_string(&self, value: RawHandle) -> EngineResult<String> {
        self.in_context(None, |scope, table| {
            let value = local(scope, table, value)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            let text = caught!(tc, table, value.to_string(tc));
            Ok(text.to_rust_string_lossy(tc))
        })
    }

    fn strict_equals(&self, a: RawHandle, b: RawHandle) -> EngineResult<bool> {
        self.in_context(None, |scope, table| {
            let a = local(scope, table, a)?;
            let b = local(scope, table, b)?;
            Ok(a.strict_equals(b))
        })
    }

    // ---- properties ---------------------------------------------------------

    fn property_id_from_name(&self, name: &str) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            if let Some(id) = table.property_by_name(name) {
                return Ok(RawHandle::from_raw(id));
            }

            let key = v8::String::new_from_utf8(scope, name.as_bytes(), v8::NewStringType::Internalized)
                .ok_or(EngineError::new(EngineStatus::OutOfMemory))?;
            let key = v8::Global::new(scope, v8::Local::<v8::Value>::from(key));

            Ok(RawHandle::from_raw(table.insert_property(
                key,
                Some(name.to_string()),
                None,
            )))
        })
    }

    fn property_id_from_symbol(&self, symbol: RawHandle) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            if table.value(symbol.as_raw())?.kind != ValueType::Symbol {
                return Err(EngineError::new(EngineStatus::PropertyNotSymbol));
            }

            if let Some(id) = table.property_by_symbol(symbol.as_raw()) {
                return Ok(RawHandle::from_raw(id));
            }

            let key = local(scope, table, symbol)?;
            let key = v8::Global::new(scope, key);

            Ok(RawHandle::from_raw(table.insert_property(
                key,
                None,
                Some(symbol.as_raw()),
            )))
        })
    }

    fn property_id_name(&self, property_id: RawHandle) -> EngineResult<Option<String>> {
        self.with_table(|table| match table.get(property_id.as_raw())? {
            Entry::PropertyId { name, .. } => Ok(name.clone()),
            _ => Err(invalid()),
        })
    }

    fn get_property(&self, object: RawHandle, property_id: RawHandle) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let key = key(scope, table, property_id)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            let value = caught!(tc, table, target.get(tc, key));
            Ok(intern(tc, table, value))
        })
    }

    fn set_property(
        &self,
        object: RawHandle,
        property_id: RawHandle,
        value: RawHandle,
    ) -> EngineResult<()> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let key = key(scope, table, property_id)?;
            let value = local(scope, table, value)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            caught!(tc, table, target.set(tc, key, value));
            Ok(())
        })
    }

    fn has_property(&self, object: RawHandle, property_id: RawHandle) -> EngineResult<bool> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let key = key(scope, table, property_id)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            Ok(caught!(tc, table, target.has(tc, key)))
        })
    }

    fn delete_property(&self, object: RawHandle, property_id: RawHandle) -> EngineResult<bool> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let key = key(scope, table, property_id)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            Ok(caught!(tc, table, target.delete(tc, key)))
        })
    }

    fn get_indexed_property(&self, object: RawHandle, index: u32) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            let value = caught!(tc, table, target.get_index(tc, index));
            Ok(intern(tc, table, value))
        })
    }

    fn set_indexed_property(
        &self,
        object: RawHandle,
        index: u32,
        value: RawHandle,
    ) -> EngineResult<()> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let value = local(scope, table, value)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            caught!(tc, table, target.set_index(tc, index, value));
            Ok(())
        })
    }

    fn has_indexed_property(&self, object: RawHandle, index: u32) -> EngineResult<bool> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            Ok(caught!(tc, table, target.has_index(tc, index)))
        })
    }

    fn delete_indexed_property(&self, object: RawHandle, index: u32) -> EngineResult<bool> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            Ok(caught!(tc, table, target.delete_index(tc, index)))
        })
    }

    fn own_property_names(&self, object: RawHandle) -> EngineResult<Vec<String>> {
        self.in_context(None, |scope, table| {
            let target = self::object(scope, table, object)?;
            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            let names = caught!(
                tc,
                table,
                target.get_own_property_names(tc, Default::default())
            );

            let mut result = Vec::with_capacity(names.length() as usize);

            for index in 0..names.length() {
                let name = caught!(tc, table, names.get_index(tc, index));
                result.push(name.to_rust_string_lossy(tc));
            }

            Ok(result)
        })
    }

    // ---- functions ----------------------------------------------------------

    fn call_function(
        &self,
        function: RawHandle,
        this: RawHandle,
        args: &[RawHandle],
    ) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let callee = self::function(scope, table, function)?;
            let this = local(scope, table, this)?;
            let args = args
                .iter()
                .map(|arg| local(scope, table, *arg))
                .collect::<EngineResult<Vec<_>>>()?;

            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            let value = caught!(tc, table, callee.call(tc, this, &args));
            Ok(intern(tc, table, value))
        })
    }

    fn construct_object(&self, function: RawHandle, args: &[RawHandle]) -> EngineResult<RawHandle> {
        self.in_context(None, |scope, table| {
            let constructor = self::function(scope, table, function)?;
            let args = args
                .iter()
                .map(|arg| local(scope, table, *arg))
                .collect::<EngineResult<Vec<_>>>()?;

            let tc = pin!(v8::TryCatch::new(scope));
            let tc = &mut tc.init();
            let value = caught!(tc, table, constructor.new_instance(tc, &args));
            Ok(intern(tc, table, value.into()))
        })
    }

    // ---- exceptions ---------------------------------------------------------

    fn has_exception(&self) -> EngineResult<bool> {
        self.with_table(|table| Ok(table.pending.is_some()))
    }

    fn set_exception(&self, exception: RawHandle) -> EngineResult<()> {
        self.with_table(|table| {
            table.value(exception.as_raw())?;
            table.pending = Some(ExceptionInfo::bare(exception));
            Ok(())
        })
    }

    fn get_and_clear_exception(&self) -> EngineResult<ExceptionInfo> {
        self.with_table(|table| table.pending.take().ok_or(invalid()))
    }

    // ---- modules ------------------------------------------------------------

    fn initialize_module_record(
        &self,
        referencing: Option<RawHandle>,
        normalized_name: &str,
    ) -> EngineResult<RawHandle> {
        self.with_table(|table| {
            let context = table.current()?;

            if let Some(referencing) = referencing {
                table.module(referencing.as_raw())?;
            }

            let id = table.insert(Entry::Module(Box::new(ModuleEntry {
                context,
                name: normalized_name.to_string(),
                referencing: referencing.map(RawHandle::as_raw),
                fetch: None,
                ready: None,
                host_defined: None,
                exception: None,
                url: None,
                module: None,
                imports: Vec::new(),
                refs: 1,
            })));

            Ok(RawHandle::from_raw(id))
        })
    }

    fn parse_module_source(
        &self,
        record: RawHandle,
        source_context: u64,
        source: &str,
    ) -> EngineResult<()> {
        let specifiers = self.compile(record, source_context, source)?;

        for specifier in &specifiers {
            let fetch = self.with_table(|table| Ok(table.root_of(record.as_raw())?.fetch.clone()))?;

            let outcome = match fetch {
                Some(fetch) => fetch(record, specifier),
                None => FetchOutcome::Failed,
            };

            match outcome {
                FetchOutcome::Resolved(child) => self.with_table(|table| {
                    table.module(child.as_raw())?;
                    table
                        .module_mut(record.as_raw())?
                        .imports
                        .push((specifier.clone(), child.as_raw()));
                    Ok(())
                })?,
                FetchOutcome::Failed => return Err(self.fail_import(record, specifier)),
            }
        }

        let ready = self.with_table(|table| Ok(table.root_of(record.as_raw())?.ready.clone()))?;

        if let Some(ready) = ready {
            ready(record, None);
        }

        Ok(())
    }

    fn module_evaluation(&self, record: RawHandle) -> EngineResult<RawHandle> {
        let (context, root, links) = self.with_table(|table| {
            let module = table.module(record.as_raw())?;
            let root = module
                .module
                .clone()
                .ok_or(EngineError::new(EngineStatus::ModuleNotEvaluated))?;
            Ok((module.context, root, table.module_links(record.as_raw())))
        })?;

        LINKS.with(|current| *current.borrow_mut() = links);

        let result = self.in_context(Some(context), |scope, table| {
            let previous = table.current.replace(context);
            let result = evaluate_graph(scope, table, &root);
            table.current = previous;
            result
        });

        LINKS.with(|current| current.borrow_mut().clear());
        result
    }

    fn set_module_host_info(&self, record: RawHandle, info: ModuleHostInfo) -> EngineResult<()> {
        self.with_table(|table| {
            let module = table.module_mut(record.as_raw())?;

            match info {
                ModuleHostInfo::FetchImportedModule(callback) => module.fetch = callback,
                ModuleHostInfo::NotifyModuleReady(callback) => module.ready = callback,
                ModuleHostInfo::HostDefined(value) => module.host_defined = value,
                ModuleHostInfo::Exception(exception) => module.exception = Some(exception),
                ModuleHostInfo::Url(url) => module.url = Some(url),
            }

            Ok(())
        })
    }

    // ---- promises -----------------------------------------------------------

    fn set_promise_continuation_callback(
        &self,
        runtime: RawHandle,
        callback: Option<PromiseContinuationCallback>,
    ) -> EngineResult<()> {
        self.with_table(|table| match table.get_mut(runtime.as_raw())? {
            Entry::Runtime { continuation, .. } => {
                // Jobs stay in V8's queue; the callback is kept for the host's bookkeeping
                *continuation = callback;
                Ok(())
            }
            _ => Err(invalid()),
        })
    }

    fn run_microtasks(&self) -> EngineResult<()> {
        self.in_context(None, |scope, _| {
            scope.perform_microtask_checkpoint();
            Ok(())
        })
    }
}
