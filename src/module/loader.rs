//! Ready-made module loaders.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::{ModuleLoader, ModuleSource};
use crate::error::LoaderError;

/// Loader backed by a name → source map.
///
/// ```
/// use openworkers_embed::module::{InMemoryModuleLoader, ModuleLoader};
/// use serde_json::json;
///
/// let loader = InMemoryModuleLoader::new()
///     .with_script("util", "export default 1;")
///     .with_native("config", || Ok(json!({ "debug": true })));
///
/// assert!(loader.get_module("util").unwrap().is_some());
/// assert!(loader.get_module("missing").unwrap().is_none());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryModuleLoader {
    modules: RwLock<HashMap<String, ModuleSource>>,
}

impl InMemoryModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, ModuleSource::script(source));
        self
    }

    pub fn with_native<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<serde_json::Value, LoaderError> + Send + Sync + 'static,
    {
        self.insert(name, ModuleSource::native(factory));
        self
    }

    /// Register or replace a module.
    pub fn insert(&self, name: impl Into<String>, source: ModuleSource) {
        self.modules.write().insert(name.into(), source);
    }

    pub fn remove(&self, name: &str) -> Option<ModuleSource> {
        self.modules.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl ModuleLoader for InMemoryModuleLoader {
    fn get_module(&self, name: &str) -> Result<Option<ModuleSource>, LoaderError> {
        Ok(self.modules.read().get(name).cloned())
    }
}

/// Loader reading script modules from a directory.
///
/// `name` is looked up as `<root>/<name>`, then with each fallback
/// extension appended. Names that would leave the root are unresolved.
#[derive(Debug, Clone)]
pub struct FsModuleLoader {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsModuleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["js".into(), "mjs".into()],
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, name: &str) -> Option<Vec<PathBuf>> {
        let relative = Path::new(name);

        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        if !contained || name.is_empty() {
            return None;
        }

        let base = self.root.join(relative);
        let mut candidates = vec![base.clone()];

        for ext in &self.extensions {
            candidates.push(PathBuf::from(format!("{}.{}", base.display(), ext)));
        }

        Some(candidates)
    }
}

impl ModuleLoader for FsModuleLoader {
    fn get_module(&self, name: &str) -> Result<Option<ModuleSource>, LoaderError> {
        let Some(candidates) = self.candidates(name) else {
            tracing::debug!("Module name '{}' escapes loader root", name);
            return Ok(None);
        };

        for path in candidates {
            if !path.is_file() {
                continue;
            }

            return match std::fs::read_to_string(&path) {
                Ok(source) => {
                    tracing::trace!("Loaded module '{}' from {}", name, path.display());
                    Ok(Some(ModuleSource::Script(source)))
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(Box::new(err)),
            };
        }

        Ok(None)
    }
}
