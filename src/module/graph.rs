//! Fetch and ready callbacks driving import resolution.

use ring::rand::{SecureRandom, SystemRandom};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use super::{JsModuleRecord, ModuleSource, ModuleState, NativeModuleFactory, normalize_specifier};
use crate::context::JsContext;
use crate::engine::{
    FetchImportedModuleCallback, FetchOutcome, ModuleHostInfo, NotifyModuleReadyCallback,
    RawHandle,
};
use crate::error::{Error, Result};
use crate::gc::Flyweight;

/// Install the fetch and ready callbacks on a root record.
///
/// Both only hold the context weakly; once it is gone, fetches fail and
/// ready notifications stop the engine.
pub(super) fn install_callbacks(root: &JsModuleRecord, context: &Arc<JsContext>) -> Result<()> {
    root.set_host_info(ModuleHostInfo::FetchImportedModule(Some(fetch_callback(
        Arc::downgrade(context),
    ))))?;
    root.set_host_info(ModuleHostInfo::NotifyModuleReady(Some(ready_callback(
        Arc::downgrade(context),
    ))))?;
    Ok(())
}

fn fetch_callback(context: Weak<JsContext>) -> FetchImportedModuleCallback {
    Arc::new(move |referencing: RawHandle, specifier: &str| {
        let Some(context) = context.upgrade() else {
            tracing::warn!("Fetch of '{}' after its context went away", specifier);
            return FetchOutcome::Failed;
        };

        let resolved = panic::catch_unwind(AssertUnwindSafe(|| {
            resolve_import(&context, referencing, specifier)
        }));

        let err = match resolved {
            Ok(Ok(record)) => return FetchOutcome::Resolved(record.raw()),
            Ok(Err(err)) => err,
            Err(payload) => Error::ModuleLoader {
                name: specifier.to_string(),
                source: panic_message(payload.as_ref()).into(),
            },
        };

        tracing::debug!("Import '{}' from {} failed: {}", specifier, referencing, err);
        context.raise(&err);
        FetchOutcome::Failed
    })
}

fn ready_callback(context: Weak<JsContext>) -> NotifyModuleReadyCallback {
    Arc::new(move |record: RawHandle, exception: Option<RawHandle>| {
        let Some(context) = context.upgrade() else {
            return false;
        };

        let wrapper = context.modules().try_get(record);

        let Some(exception) = exception else {
            if let Some(wrapper) = wrapper {
                wrapper.set_state(ModuleState::Ready);
            }
            return true;
        };

        // Leave the failure pending for the parse call that triggered us
        let engine = context.engine();
        if !matches!(engine.has_exception(), Ok(true)) {
            if let Err(err) = engine.set_exception(exception) {
                tracing::warn!("Cannot keep exception for module {}: {}", record, err);
            }
        }

        if let Some(wrapper) = wrapper {
            wrapper.set_state(ModuleState::Errored);
        }

        false
    })
}

/// Resolve `specifier` as imported by the record `referencing`.
fn resolve_import(
    context: &Arc<JsContext>,
    referencing: RawHandle,
    specifier: &str,
) -> Result<Arc<JsModuleRecord>> {
    let referrer = context
        .modules()
        .try_get(referencing)
        .ok_or_else(Error::disposed::<JsModuleRecord>)?;
    let root = referrer
        .root()
        .ok_or_else(Error::disposed::<JsModuleRecord>)?;

    let name = normalize_specifier(referrer.name(), specifier);

    if name == referrer.name() {
        tracing::debug!("Module '{}' imports itself", name);
        return Ok(referrer);
    }

    if let Some(existing) = referrer.imported(&name) {
        return Ok(existing);
    }

    if let Some(shared) = root.registered(&name) {
        tracing::debug!("Module '{}' already in graph, sharing it", name);
        referrer.add_import(&name, &shared);
        return Ok(shared);
    }

    let source = match root.take_staged(&name) {
        Some(source) => source,
        None => load(context, &name)?,
    };

    let child = JsModuleRecord::create_child(context, &referrer, &name)?;

    // Registered before parsing so cycles back to it resolve
    referrer.add_import(&name, &child);
    root.register(&name, &child);

    tracing::debug!("Resolved '{}' to new record {}", name, child.raw());

    match source {
        ModuleSource::Script(text) => child.parse(&text)?,
        ModuleSource::Native(factory) => install_native(context, &root, &child, &factory)?,
    }

    Ok(child)
}

fn load(context: &JsContext, name: &str) -> Result<ModuleSource> {
    let loader = context
        .module_loader()
        .ok_or_else(|| Error::ModuleNotFound(name.to_string()))?;

    match loader.get_module(name) {
        Ok(Some(source)) => Ok(source),
        Ok(None) => Err(Error::ModuleNotFound(name.to_string())),
        Err(source) => Err(Error::ModuleLoader {
            name: name.to_string(),
            source,
        }),
    }
}

/// Expose a host value as a module's default export, through a uniquely
/// named global read back by a generated module body.
fn install_native(
    context: &JsContext,
    root: &JsModuleRecord,
    child: &JsModuleRecord,
    factory: &NativeModuleFactory,
) -> Result<()> {
    let value = factory().map_err(|source| Error::ModuleLoader {
        name: child.name().to_string(),
        source,
    })?;

    let exported = context.to_engine_value(&value)?;
    let binding = unique_name("__embedNative")?;

    context.global()?.set(&binding, &exported)?;
    root.track_temp_global(&binding);

    child.parse(&format!(
        "const value = globalThis.{binding};\ndelete globalThis.{binding};\nexport default value;"
    ))
}

/// `<prefix>_<16 hex digits>` from the system random source.
pub(super) fn unique_name(prefix: &str) -> Result<String> {
    let mut bytes = [0u8; 8];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| Error::RandomUnavailable)?;

    let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!("{prefix}_{suffix}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("loader panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("loader panicked: {message}")
    } else {
        "loader panicked".to_string()
    }
}
