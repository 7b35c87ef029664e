//! Top-level module evaluation.

use std::sync::Arc;

use super::graph::{install_callbacks, unique_name};
use super::{JsModuleRecord, ModuleSource, ModuleState};
use crate::context::JsContext;
use crate::error::{Error, Result};
use crate::gc::Flyweight;
use crate::value::JsValue;

/// Global the root shim publishes the entry's default export on. The
/// latest result stays reachable through it until the next evaluation.
const RESULT_GLOBAL: &str = "__embedModuleResult";

/// Global receiving a rejection when pending promises are awaited.
const ERROR_GLOBAL: &str = "__embedModuleError";

/// Evaluate `source` as an ES module and return its default export.
///
/// The caller holds the context's scope.
pub(crate) fn evaluate_module(context: &Arc<JsContext>, source: &str) -> Result<Arc<JsValue>> {
    context.require_scope()?;

    let root = JsModuleRecord::create_root(context, &unique_name("__embedRoot")?)?;
    let result = run(context, &root, source);

    if let Ok(global) = context.global() {
        if let Err(err) = global.delete(ERROR_GLOBAL) {
            tracing::trace!("Removing {} failed: {}", ERROR_GLOBAL, err);
        }
    }

    root.dispose();
    result
}

fn run(context: &Arc<JsContext>, root: &JsModuleRecord, source: &str) -> Result<Arc<JsValue>> {
    let entry = unique_name("__embedEntry")?;
    let await_promises = context.config().await_pending_promises;

    install_callbacks(root, context)?;
    root.stage(&entry, ModuleSource::script(source));
    root.parse(&shim(&entry, await_promises))?;

    if root.state() != ModuleState::Ready {
        return Err(Error::ModuleNotReady(entry));
    }

    tracing::debug!("Evaluating module graph '{}'", root.name());

    let raw = root.live()?;
    context.check(context.engine().module_evaluation(raw))?;
    context.drain_jobs()?;

    let global = context.global()?;

    if await_promises {
        let rejection = global.get(ERROR_GLOBAL)?;

        if !rejection.is_undefined() {
            return Err(Error::Script(context.exception_from_value(rejection)));
        }
    }

    global.get(RESULT_GLOBAL)
}

/// Root module body importing the entry and republishing its default export.
fn shim(entry: &str, await_promises: bool) -> String {
    if !await_promises {
        return format!(
            "import value from '{entry}';\nglobalThis.{RESULT_GLOBAL} = value;\n"
        );
    }

    format!(
        "import value from '{entry}';\n\
         globalThis.{RESULT_GLOBAL} = undefined;\n\
         globalThis.{ERROR_GLOBAL} = undefined;\n\
         Promise.resolve(value).then((v) => {{ globalThis.{RESULT_GLOBAL} = v; }}, (e) => {{ globalThis.{ERROR_GLOBAL} = e; }});\n"
    )
}
