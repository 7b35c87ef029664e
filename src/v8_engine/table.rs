//! Raw handle bookkeeping for the V8 binding.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::RuntimeConfig;
use crate::engine::{
    BeforeCollectCallback, EngineError, EngineResult, EngineStatus, ExceptionInfo,
    FetchImportedModuleCallback, NotifyModuleReadyCallback, PromiseContinuationCallback,
    RawHandle, ValueType,
};

pub(super) enum Strength {
    Strong(v8::Global<v8::Value>),
    Weak(v8::Weak<v8::Value>),
}

pub(super) struct ValueEntry {
    /// `None` for values shared by every context of the isolate.
    pub context: Option<u64>,
    pub kind: ValueType,
    pub identity: Identity,
    pub handle: Strength,
    pub refs: u32,
    pub callback: Option<BeforeCollectCallback>,
}

impl ValueEntry {
    /// Hold the value weakly once only the before-collect callback refers to it.
    pub fn demote(&mut self, isolate: &mut v8::Isolate) {
        if self.refs > 0 || self.callback.is_none() {
            return;
        }

        if let Strength::Strong(global) = &self.handle {
            self.handle = Strength::Weak(v8::Weak::new(isolate, global));
        }
    }

    /// Hold the value strongly again; fails when it was already reclaimed.
    pub fn promote(&mut self, isolate: &mut v8::Isolate) -> EngineResult<()> {
        if let Strength::Weak(weak) = &self.handle {
            let global = weak.to_global(isolate).ok_or(invalid())?;
            self.handle = Strength::Strong(global);
        }

        Ok(())
    }

    fn is_reclaimed(&self) -> bool {
        matches!(&self.handle, Strength::Weak(weak) if weak.is_empty())
    }
}

pub(super) struct ModuleEntry {
    pub context: u64,
    pub name: String,
    pub referencing: Option<u64>,
    pub fetch: Option<FetchImportedModuleCallback>,
    pub ready: Option<NotifyModuleReadyCallback>,
    pub host_defined: Option<RawHandle>,
    pub exception: Option<RawHandle>,
    pub url: Option<String>,
    pub module: Option<v8::Global<v8::Module>>,
    /// Resolved imports in source order, by raw specifier.
    pub imports: Vec<(String, u64)>,
    pub refs: u32,
}

pub(super) enum Entry {
    Runtime {
        config: RuntimeConfig,
        continuation: Option<PromiseContinuationCallback>,
    },
    Context {
        runtime: u64,
        context: v8::Global<v8::Context>,
        refs: u32,
    },
    PropertyId {
        key: v8::Global<v8::Value>,
        name: Option<String>,
    },
    Module(Box<ModuleEntry>),
    Value(ValueEntry),
}

/// Lookup key deduplicating handles for the same engine value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) enum Identity {
    Undefined,
    Null,
    Boolean(bool),
    Number(u64),
    String(String),
    /// Objects and symbols, bucketed by identity hash.
    Hashed(i32),
}

/// Link from a compiled module's import to the module it resolved to.
pub(super) struct ModuleLink {
    pub referrer: v8::Global<v8::Module>,
    pub specifier: String,
    pub target: v8::Global<v8::Module>,
}

pub(super) fn invalid() -> EngineError {
    EngineError::new(EngineStatus::InvalidArgument)
}

#[derive(Default)]
pub(super) struct HandleTable {
    next: u64,
    entries: HashMap<u64, Entry>,
    index: HashMap<(Option<u64>, Identity), Vec<u64>>,
    names: HashMap<String, u64>,
    symbols: HashMap<u64, u64>,
    pub current: Option<u64>,
    pub pending: Option<ExceptionInfo>,
}

impl HandleTable {
    pub fn insert(&mut self, entry: Entry) -> u64 {
        self.next += 1;
        let id = self.next;

        if let Entry::Value(value) = &entry {
            self.index
                .entry((value.context, value.identity.clone()))
                .or_default()
                .push(id);
        }

        self.entries.insert(id, entry);
        id
    }

    pub fn remove(&mut self, id: u64) {
        if self.remove_value(id).is_none() {
            self.entries.remove(&id);
        }
    }

    pub fn get(&self, id: u64) -> EngineResult<&Entry> {
        self.entries.get(&id).ok_or(invalid())
    }

    pub fn get_mut(&mut self, id: u64) -> EngineResult<&mut Entry> {
        self.entries.get_mut(&id).ok_or(invalid())
    }

    /// Handles already issued for `identity`.
    pub fn candidates(&self, context: Option<u64>, identity: &Identity) -> Vec<u64> {
        self.index
            .get(&(context, identity.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn value(&self, id: u64) -> EngineResult<&ValueEntry> {
        match self.get(id)? {
            Entry::Value(value) => Ok(value),
            _ => Err(invalid()),
        }
    }

    pub fn remove_value(&mut self, id: u64) -> Option<ValueEntry> {
        let Some(Entry::Value(value)) = self.entries.remove(&id) else {
            return None;
        };

        let key = (value.context, value.identity.clone());

        if let Some(ids) = self.index.get_mut(&key) {
            ids.retain(|candidate| *candidate != id);

            if ids.is_empty() {
                self.index.remove(&key);
            }
        }

        self.symbols.retain(|symbol, _| *symbol != id);
        Some(value)
    }

    pub fn runtime_config(&self, id: u64) -> EngineResult<&RuntimeConfig> {
        match self.get(id)? {
            Entry::Runtime { config, .. } => Ok(config),
            _ => Err(invalid()),
        }
    }

    pub fn context(&self, id: u64) -> EngineResult<&v8::Global<v8::Context>> {
        match self.get(id)? {
            Entry::Context { context, .. } => Ok(context),
            _ => Err(EngineError::new(EngineStatus::InvalidContext)),
        }
    }

    pub fn current(&self) -> EngineResult<u64> {
        self.current
            .ok_or(EngineError::new(EngineStatus::NoCurrentContext))
    }

    pub fn module(&self, id: u64) -> EngineResult<&ModuleEntry> {
        match self.get(id)? {
            Entry::Module(module) => Ok(module),
            _ => Err(invalid()),
        }
    }

    pub fn module_mut(&mut self, id: u64) -> EngineResult<&mut ModuleEntry> {
        match self.get_mut(id)? {
            Entry::Module(module) => Ok(module),
            _ => Err(invalid()),
        }
    }

    /// First record of `id`'s referencing chain.
    pub fn root_of(&self, mut id: u64) -> EngineResult<&ModuleEntry> {
        loop {
            let module = self.module(id)?;

            match module.referencing {
                Some(parent) => id = parent,
                None => return Ok(module),
            }
        }
    }

    pub fn property_by_name(&self, name: &str) -> Option<u64> {
        self.names.get(name).copied()
    }

    pub fn property_by_symbol(&self, symbol: u64) -> Option<u64> {
        self.symbols.get(&symbol).copied()
    }

    pub fn insert_property(
        &mut self,
        key: v8::Global<v8::Value>,
        name: Option<String>,
        symbol: Option<u64>,
    ) -> u64 {
        let id = self.insert(Entry::PropertyId {
            key,
            name: name.clone(),
        });

        if let Some(name) = name {
            self.names.insert(name, id);
        }

        if let Some(symbol) = symbol {
            self.symbols.insert(symbol, id);
        }

        id
    }

    pub fn property_key(&self, id: u64) -> EngineResult<&v8::Global<v8::Value>> {
        match self.get(id)? {
            Entry::PropertyId { key, .. } => Ok(key),
            _ => Err(invalid()),
        }
    }

    /// Drop a context together with every value and record created in it.
    pub fn dispose_context(&mut self, context: u64) {
        let owned: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| match entry {
                Entry::Value(value) => value.context == Some(context),
                Entry::Module(module) => module.context == context,
                _ => false,
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &owned {
            self.remove(*id);
        }

        self.entries.remove(&context);

        if self.current == Some(context) {
            self.current = None;
        }

        log::debug!(
            "Disposed V8 context #{} ({} handles released)",
            context,
            owned.len()
        );
    }

    pub fn contexts_of(&self, runtime: u64) -> Vec<u64> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::Context { runtime: owner, .. } if *owner == runtime => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn runtime_of(&self, context: u64) -> Option<u64> {
        match self.entries.get(&context) {
            Some(Entry::Context { runtime, .. }) => Some(*runtime),
            _ => None,
        }
    }

    /// Remove every weakly held value the collector reclaimed, returning
    /// the callbacks to notify in handle order.
    pub fn take_reclaimed(&mut self) -> Vec<(u64, BeforeCollectCallback)> {
        let mut reclaimed: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Value(value) if value.is_reclaimed()))
            .map(|(id, _)| *id)
            .collect();
        reclaimed.sort_unstable();

        reclaimed
            .into_iter()
            .filter_map(|id| {
                let value = self.remove_value(id)?;
                value.callback.map(|callback| (id, callback))
            })
            .collect()
    }

    /// Every import link reachable from `root`.
    pub fn module_links(&self, root: u64) -> Vec<ModuleLink> {
        let mut links = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }

            let Ok(module) = self.module(id) else {
                continue;
            };
            let Some(referrer) = &module.module else {
                continue;
            };

            for (specifier, child) in &module.imports {
                if let Ok(ModuleEntry {
                    module: Some(target),
                    ..
                }) = self.module(*child)
                {
                    links.push(ModuleLink {
                        referrer: referrer.clone(),
                        specifier: specifier.clone(),
                        target: target.clone(),
                    });
                }

                queue.push_back(*child);
            }
        }

        links
    }

    /// Release every handle ahead of the isolate.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.names.clear();
        self.symbols.clear();
        self.current = None;
        self.pending = None;
    }
}
