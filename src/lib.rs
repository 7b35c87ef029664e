//! Host-side embedding layer for a garbage-collected script engine.
//!
//! The engine owns its heap; the host talks to it through handles and the
//! [`EngineApi`] call interface. This crate keeps the two sides consistent:
//!
//! - [`gc`]: one canonical wrapper per engine handle, evicted when the
//!   engine reclaims the handle
//! - [`ExecutionScope`]: exclusive, RAII-scoped access to a context
//! - [`module`]: ES module resolution through host fetch and ready
//!   callbacks, and [`JsContext::evaluate_module`]
//!
//! Enable the `v8` feature for an engine binding over the `v8` crate.

pub mod config;
pub mod context;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod gc;
pub mod host;
pub mod module;
pub mod property;
pub mod runtime;
pub mod scope;
pub mod task_queue;
pub mod value;

#[cfg(feature = "v8")]
pub mod v8_engine;

// Core API
pub use config::RuntimeConfig;
pub use context::JsContext;
pub use conversion::{JsonConverter, ValueConverter};
pub use engine::{
    EngineApi, EngineError, EngineResult, EngineStatus, RawHandle, SharedEngine, ValueType,
};
pub use error::{Error, LoaderError, Result, ScriptException};
pub use host::{EngineHost, HostStats};
pub use module::{
    FsModuleLoader, InMemoryModuleLoader, JsModuleRecord, ModuleLoader, ModuleSource,
    ModuleState,
};
pub use property::JsPropertyId;
pub use runtime::{JsRuntime, RuntimeStats};
pub use scope::ExecutionScope;
pub use task_queue::PromiseTaskQueue;
pub use value::JsValue;

#[cfg(feature = "v8")]
pub use v8_engine::V8Engine;
