//! Status codes reported by the engine call interface.
//!
//! Codes are grouped in ranges the same way the engine groups them:
//!
//! | Range     | Category | Meaning                                        |
//! |-----------|----------|------------------------------------------------|
//! | `0x1xxxx` | Usage    | The host called the engine incorrectly         |
//! | `0x2xxxx` | Engine   | The engine could not complete the request      |
//! | `0x3xxxx` | Script   | Script code raised or could not be compiled    |
//! | `0x4xxxx` | Fatal    | The runtime is unusable                        |

use std::fmt;

/// Coarse classification of an [`EngineStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Usage,
    Engine,
    Script,
    Fatal,
}

/// Non-success status returned by an engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EngineStatus {
    InvalidArgument = 0x10001,
    NullArgument = 0x10002,
    NoCurrentContext = 0x10003,
    InExceptionState = 0x10004,
    NotImplemented = 0x10005,
    WrongThread = 0x10006,
    RuntimeInUse = 0x10007,
    InDisabledState = 0x10010,
    ArgumentNotObject = 0x10013,
    /// The call was made from inside a before-collect callback.
    InObjectBeforeCollectCallback = 0x10015,
    PropertyNotSymbol = 0x10016,
    PropertyNotString = 0x10017,
    InvalidContext = 0x10019,
    InvalidModuleHostInfoKind = 0x1001A,
    /// The module record has already been parsed.
    ModuleParsed = 0x1001B,
    /// The handle kind is never collected; no before-collect callback is needed.
    NoWeakRefRequired = 0x1001C,
    ModuleNotEvaluated = 0x1001E,

    OutOfMemory = 0x20001,

    ScriptException = 0x30001,
    ScriptCompile = 0x30002,
    ScriptTerminated = 0x30003,
    ScriptEvalDisabled = 0x30004,

    Fatal = 0x40001,
    WrongRuntime = 0x40002,
}

impl EngineStatus {
    /// Numeric status code.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn category(self) -> StatusCategory {
        match self.code() >> 16 {
            1 => StatusCategory::Usage,
            2 => StatusCategory::Engine,
            3 => StatusCategory::Script,
            _ => StatusCategory::Fatal,
        }
    }

    /// True for statuses that leave a pending exception on the engine.
    pub fn has_pending_exception(self) -> bool {
        matches!(self, Self::ScriptException | Self::ScriptCompile)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:05X})", self, self.code())
    }
}

/// Error carrying the status of a failed engine call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("engine call failed: {status}")]
pub struct EngineError {
    pub status: EngineStatus,
}

impl EngineError {
    pub fn new(status: EngineStatus) -> Self {
        Self { status }
    }
}

impl From<EngineStatus> for EngineError {
    fn from(status: EngineStatus) -> Self {
        Self::new(status)
    }
}
