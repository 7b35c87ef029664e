//! ES module resolution.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  evaluate_module(source)                                    │
//! │  ├── root record (synthetic, never shown to the loader)     │
//! │  ├── entry module staged under a random unique name         │
//! │  ├── shim: import entry, publish default on a fixed global  │
//! │  └── evaluate root, drain promise jobs, read the global     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ engine parses the shim
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Fetch callback (referencing record, specifier)             │
//! │  ├── self-import         → referencing record               │
//! │  ├── already imported    → cached record                    │
//! │  ├── known to the root   → shared record (diamonds, cycles) │
//! │  └── ModuleLoader        → new child, parsed immediately    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ subtree resolved
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Ready callback (record, exception)                         │
//! │  └── Ready, or Errored with the exception left pending      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod evaluate;
mod graph;
mod loader;
mod record;
mod specifier;

pub use loader::{FsModuleLoader, InMemoryModuleLoader};
pub use record::{JsModuleRecord, ModuleState};
pub use specifier::normalize_specifier;

pub(crate) use evaluate::evaluate_module;

use std::fmt;
use std::sync::Arc;

use crate::error::LoaderError;

/// Produces the default export of a native module.
pub type NativeModuleFactory =
    Arc<dyn Fn() -> Result<serde_json::Value, LoaderError> + Send + Sync>;

/// What a loader returns for a module name.
#[derive(Clone)]
pub enum ModuleSource {
    /// Module source text.
    Script(String),
    /// Host value exposed as the module's default export.
    Native(NativeModuleFactory),
}

impl ModuleSource {
    pub fn script(source: impl Into<String>) -> Self {
        Self::Script(source.into())
    }

    pub fn native<F>(factory: F) -> Self
    where
        F: Fn() -> Result<serde_json::Value, LoaderError> + Send + Sync + 'static,
    {
        Self::Native(Arc::new(factory))
    }
}

impl fmt::Debug for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(source) => f
                .debug_tuple("Script")
                .field(&format_args!("{} bytes", source.len()))
                .finish(),
            Self::Native(_) => f.debug_tuple("Native").finish(),
        }
    }
}

/// Resolves normalized module names.
///
/// Called from inside engine callbacks, synchronously and on the thread
/// holding the context's scope.
pub trait ModuleLoader: Send + Sync {
    /// `Ok(None)` leaves the import unresolved.
    fn get_module(&self, name: &str) -> Result<Option<ModuleSource>, LoaderError>;
}

impl<F> ModuleLoader for F
where
    F: Fn(&str) -> Result<Option<ModuleSource>, LoaderError> + Send + Sync,
{
    fn get_module(&self, name: &str) -> Result<Option<ModuleSource>, LoaderError> {
        self(name)
    }
}
