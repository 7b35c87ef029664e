//! Error types.

use std::fmt;
use std::sync::Arc;

use crate::engine::{EngineError, EngineStatus, ValueType};
use crate::value::JsValue;

/// Error returned by a [`ModuleLoader`](crate::module::ModuleLoader).
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A wrapper was used after disposal or after the engine reclaimed it.
    #[error("{type_name} used after it was disposed")]
    ObjectDisposed { type_name: &'static str },

    #[error("no execution scope is active for this context on this thread")]
    NoActiveScope,

    #[error("an execution scope is already active for this context")]
    ScopeAlreadyActive,

    #[error("invalid or null engine handle")]
    InvalidHandle,

    #[error("expected {expected} value, found {found}")]
    UnexpectedValueType {
        expected: &'static str,
        found: ValueType,
    },

    #[error("value belongs to a different context")]
    ContextMismatch,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Script(#[from] ScriptException),

    #[error("cannot resolve module '{0}'")]
    ModuleNotFound(String),

    #[error("loading module '{name}' failed: {source}")]
    ModuleLoader {
        name: String,
        #[source]
        source: LoaderError,
    },

    #[error("module '{0}' did not become ready")]
    ModuleNotReady(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("system random source unavailable")]
    RandomUnavailable,
}

impl Error {
    pub(crate) fn disposed<T: ?Sized>() -> Self {
        let full = std::any::type_name::<T>();
        let type_name = full.rsplit("::").next().unwrap_or(full);
        Error::ObjectDisposed { type_name }
    }

    /// Status code when this error came from an engine call.
    pub fn engine_status(&self) -> Option<EngineStatus> {
        match self {
            Error::Engine(e) => Some(e.status),
            _ => None,
        }
    }

    pub fn is_script_exception(&self) -> bool {
        matches!(self, Error::Script(_))
    }
}

impl From<EngineStatus> for Error {
    fn from(status: EngineStatus) -> Self {
        Error::Engine(EngineError::new(status))
    }
}

/// Exception raised by script code, with source metadata when the engine
/// could derive it.
#[derive(Clone)]
pub struct ScriptException {
    pub message: String,
    /// The thrown engine value.
    pub value: Option<Arc<JsValue>>,
    /// Zero-based line of the faulting expression.
    pub line: Option<u32>,
    /// Zero-based column of the faulting expression.
    pub column: Option<u32>,
    /// Length of the faulting source text.
    pub length: usize,
    /// Text of the faulting source line.
    pub source_line: Option<String>,
    pub url: Option<String>,
}

impl ScriptException {
    /// Exception with a message and no metadata.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            value: None,
            line: None,
            column: None,
            length: 0,
            source_line: None,
            url: None,
        }
    }
}

impl fmt::Debug for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptException")
            .field("message", &self.message)
            .field("has_value", &self.value.is_some())
            .field("line", &self.line)
            .field("column", &self.column)
            .field("length", &self.length)
            .field("source_line", &self.source_line)
            .field("url", &self.url)
            .finish()
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script exception: {}", self.message)?;

        if let (Some(line), Some(column)) = (self.line, self.column) {
            match &self.url {
                Some(url) => write!(f, " at {}:{}:{}", url, line + 1, column + 1)?,
                None => write!(f, " at {}:{}", line + 1, column + 1)?,
            }
        }

        Ok(())
    }
}

impl std::error::Error for ScriptException {}
