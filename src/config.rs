//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Settings applied to every runtime an [`EngineHost`](crate::EngineHost) creates.
///
/// Can be built in code with the setter methods or loaded from JSON:
///
/// ```
/// use openworkers_embed::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json(r#"{ "heap_max_mb": 64 }"#).unwrap();
/// assert_eq!(config.heap_max_mb, 64);
/// assert!(!config.await_pending_promises);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Initial heap size hint, in megabytes.
    pub heap_initial_mb: usize,
    /// Hard heap limit, in megabytes.
    pub heap_max_mb: usize,
    /// After evaluating a module, settle its default export if it is a
    /// promise and report rejections as script errors.
    pub await_pending_promises: bool,
    /// Upper bound on promise jobs run by one post-evaluation drain.
    pub max_drained_tasks: usize,
    /// Forbid `eval` and `new Function` in script code.
    pub disable_eval: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heap_initial_mb: 10,
            heap_max_mb: 128,
            await_pending_promises: false,
            max_drained_tasks: 10_000,
            disable_eval: false,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn heap_limits(mut self, initial_mb: usize, max_mb: usize) -> Self {
        self.heap_initial_mb = initial_mb;
        self.heap_max_mb = max_mb.max(initial_mb);
        self
    }

    pub fn await_pending_promises(mut self, enabled: bool) -> Self {
        self.await_pending_promises = enabled;
        self
    }

    pub fn max_drained_tasks(mut self, limit: usize) -> Self {
        self.max_drained_tasks = limit;
        self
    }

    pub fn disable_eval(mut self, disabled: bool) -> Self {
        self.disable_eval = disabled;
        self
    }
}
