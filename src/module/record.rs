//! Module record wrappers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::ModuleSource;
use crate::context::JsContext;
use crate::engine::{ModuleHostInfo, RawHandle};
use crate::error::{Error, Result};
use crate::gc::{Flyweight, FlyweightCore, in_collection};

/// Source context ids handed to the engine, one per parse.
static NEXT_SOURCE_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Initialized, source not parsed yet.
    Created,
    /// Source parsed, imports still resolving.
    Parsed,
    /// The record and its whole import subtree resolved.
    Ready,
    /// Parsing or resolution failed.
    Errored,
}

/// Bookkeeping only the root of a graph carries.
#[derive(Default)]
struct RootState {
    /// Every record created under this root, by normalized name.
    registry: Mutex<HashMap<String, Arc<JsModuleRecord>>>,
    /// Sources served ahead of the loader.
    staged: Mutex<HashMap<String, ModuleSource>>,
    /// Globals installed while resolving, removed with the root.
    temp_globals: Mutex<Vec<String>>,
}

/// Host wrapper for an engine module record.
///
/// Records form a graph under one synthetic root per evaluation. Each
/// record keeps the records it imported alive; the root additionally
/// keeps every record of the graph by name, which is what lets cycles and
/// diamonds share records. Disposing the root disposes the whole graph.
pub struct JsModuleRecord {
    core: FlyweightCore,
    name: String,
    context: Weak<JsContext>,
    root: Weak<JsModuleRecord>,
    imports: Mutex<HashMap<String, Arc<JsModuleRecord>>>,
    state: Mutex<ModuleState>,
    root_state: Option<RootState>,
}

impl JsModuleRecord {
    /// Create a root record, never shown to the loader.
    pub(crate) fn create_root(context: &Arc<JsContext>, name: &str) -> Result<Arc<Self>> {
        let engine = context.engine();
        let raw = context.check(engine.initialize_module_record(None, name))?;

        context.modules().get_or_add(raw, || {
            let core = FlyweightCore::owned(engine.clone(), raw, context.runtime().deferred().clone())?;

            Ok(Arc::new_cyclic(|this| Self {
                core,
                name: name.to_string(),
                context: Arc::downgrade(context),
                root: this.clone(),
                imports: Mutex::new(HashMap::new()),
                state: Mutex::new(ModuleState::Created),
                root_state: Some(RootState::default()),
            }))
        })
    }

    /// Create a record imported by `parent` under `name`.
    pub(crate) fn create_child(
        context: &Arc<JsContext>,
        parent: &JsModuleRecord,
        name: &str,
    ) -> Result<Arc<Self>> {
        let engine = context.engine();
        let referencing = parent.live()?;
        let raw = context.check(engine.initialize_module_record(Some(referencing), name))?;

        context.modules().get_or_add(raw, || {
            Ok(Arc::new(Self {
                core: FlyweightCore::owned(engine.clone(), raw, context.runtime().deferred().clone())?,
                name: name.to_string(),
                context: Arc::downgrade(context),
                root: parent.root.clone(),
                imports: Mutex::new(HashMap::new()),
                state: Mutex::new(ModuleState::Created),
                root_state: None,
            }))
        })
    }

    /// Normalized module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ModuleState {
        *self.state.lock()
    }

    pub fn is_root(&self) -> bool {
        self.root_state.is_some()
    }

    /// Names this record imported, sorted.
    pub fn imported_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.imports.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn set_state(&self, state: ModuleState) {
        let mut current = self.state.lock();

        if *current != state {
            tracing::debug!("Module '{}' {:?} -> {:?}", self.name, *current, state);
            *current = state;
        }
    }

    pub(crate) fn live(&self) -> Result<RawHandle> {
        self.core.live_handle::<Self>()
    }

    pub(crate) fn context(&self) -> Result<Arc<JsContext>> {
        self.context.upgrade().ok_or_else(Error::disposed::<JsContext>)
    }

    pub(crate) fn root(&self) -> Option<Arc<JsModuleRecord>> {
        self.root.upgrade()
    }

    // ---- graph bookkeeping ----------------------------------------------

    pub(crate) fn imported(&self, name: &str) -> Option<Arc<JsModuleRecord>> {
        self.imports.lock().get(name).cloned()
    }

    pub(crate) fn add_import(&self, name: &str, record: &Arc<JsModuleRecord>) {
        self.imports
            .lock()
            .insert(name.to_string(), Arc::clone(record));
    }

    pub(crate) fn registered(&self, name: &str) -> Option<Arc<JsModuleRecord>> {
        let root = self.root_state.as_ref()?;
        root.registry.lock().get(name).cloned()
    }

    pub(crate) fn register(&self, name: &str, record: &Arc<JsModuleRecord>) {
        if let Some(root) = &self.root_state {
            root.registry
                .lock()
                .insert(name.to_string(), Arc::clone(record));
        }
    }

    pub(crate) fn stage(&self, name: &str, source: ModuleSource) {
        if let Some(root) = &self.root_state {
            root.staged.lock().insert(name.to_string(), source);
        }
    }

    pub(crate) fn take_staged(&self, name: &str) -> Option<ModuleSource> {
        self.root_state.as_ref()?.staged.lock().remove(name)
    }

    pub(crate) fn track_temp_global(&self, name: &str) {
        if let Some(root) = &self.root_state {
            root.temp_globals.lock().push(name.to_string());
        }
    }

    // ---- engine calls ---------------------------------------------------

    /// Parse `source` into this record.
    ///
    /// The engine resolves imports through the host callbacks before this
    /// returns, so on success the record is usually already `Ready`.
    pub(crate) fn parse(&self, source: &str) -> Result<()> {
        let context = self.context()?;
        let raw = self.live()?;
        let source_context = NEXT_SOURCE_CONTEXT.fetch_add(1, Ordering::Relaxed);

        tracing::trace!("Parsing module '{}' ({} bytes)", self.name, source.len());

        match context
            .engine()
            .parse_module_source(raw, source_context, source)
        {
            Ok(()) => {
                let mut state = self.state.lock();
                if *state == ModuleState::Created {
                    *state = ModuleState::Parsed;
                }
                Ok(())
            }
            Err(err) => {
                self.set_state(ModuleState::Errored);
                context.check(Err(err))
            }
        }
    }

    pub(crate) fn set_host_info(&self, info: ModuleHostInfo) -> Result<()> {
        let raw = self.live()?;
        self.core.engine().set_module_host_info(raw, info)?;
        Ok(())
    }

    /// Root-only teardown that needs the engine: detach callbacks and
    /// remove temporary globals. Best effort.
    fn release_root_resources(&self, root: &RootState) {
        let engine = self.core.engine();
        let raw = self.core.raw();

        for info in [
            ModuleHostInfo::FetchImportedModule(None),
            ModuleHostInfo::NotifyModuleReady(None),
        ] {
            if let Err(err) = engine.set_module_host_info(raw, info) {
                tracing::trace!("Detaching callbacks from root {} failed: {}", raw, err);
            }
        }

        let names = std::mem::take(&mut *root.temp_globals.lock());

        if names.is_empty() {
            return;
        }

        let deleted = engine.global_object().and_then(|global| {
            for name in &names {
                let id = engine.property_id_from_name(name)?;
                engine.delete_property(global, id)?;
            }
            Ok(())
        });

        if let Err(err) = deleted {
            tracing::warn!("Removing {} temporary globals failed: {}", names.len(), err);
        }
    }
}

impl Flyweight for JsModuleRecord {
    fn core(&self) -> &FlyweightCore {
        &self.core
    }

    /// Dispose the record and every record it keeps alive.
    fn dispose(&self) -> bool {
        if self.core.is_disposed() {
            return false;
        }

        if let Some(root) = &self.root_state {
            if !in_collection() {
                self.release_root_resources(root);
            }
        }

        let imports = std::mem::take(&mut *self.imports.lock());
        let registry = match &self.root_state {
            Some(root) => {
                root.staged.lock().clear();
                std::mem::take(&mut *root.registry.lock())
            }
            None => HashMap::new(),
        };

        if !self.core.dispose() {
            return false;
        }

        tracing::trace!(
            "Disposed module '{}' ({} imports, {} registered)",
            self.name,
            imports.len(),
            registry.len()
        );

        // Cycles end at records that are already disposed
        for record in imports.into_values().chain(registry.into_values()) {
            record.dispose();
        }

        true
    }
}

impl std::fmt::Debug for JsModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsModuleRecord")
            .field("name", &self.name)
            .field("handle", &self.core.raw())
            .field("state", &self.state())
            .field("root", &self.is_root())
            .field("disposed", &self.core.is_disposed())
            .finish()
    }
}
