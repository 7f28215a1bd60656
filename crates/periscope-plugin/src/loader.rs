//! Plugin loading: resolves a definition's code reference to a module.
//!
//! Resolution goes through an injected [`CodeResolver`]. A failing plugin is
//! recorded and skipped; it never aborts loading of the others. Each plugin id
//! is resolved at most once: later requests return the cached module, or
//! nothing if the first attempt failed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definition::PluginDefinition;
use crate::error::PluginError;
use crate::module::PluginModule;

/// Turns a code reference into an executable module.
pub trait CodeResolver: Send + Sync {
    fn resolve(&self, entry: &str) -> Result<PluginModule, PluginError>;
}

impl<F> CodeResolver for F
where
    F: Fn(&str) -> Result<PluginModule, PluginError> + Send + Sync,
{
    fn resolve(&self, entry: &str) -> Result<PluginModule, PluginError> {
        self(entry)
    }
}

type ModuleFactory = Arc<dyn Fn() -> PluginModule + Send + Sync>;

/// Resolver for plugins compiled into the binary, keyed by entry path.
#[derive(Clone, Default)]
pub struct StaticResolver {
    factories: HashMap<String, ModuleFactory>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, entry: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> PluginModule + Send + Sync + 'static,
    {
        self.factories.insert(entry.into(), Arc::new(factory));
        self
    }

    pub fn with<F>(mut self, entry: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> PluginModule + Send + Sync + 'static,
    {
        self.register(entry, factory);
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<&str> = self.entries().collect();
        entries.sort_unstable();
        f.debug_struct("StaticResolver")
            .field("entries", &entries)
            .finish()
    }
}

impl CodeResolver for StaticResolver {
    fn resolve(&self, entry: &str) -> Result<PluginModule, PluginError> {
        let factory = self.factories.get(entry).ok_or_else(|| PluginError::Resolve {
            entry: entry.to_string(),
            detail: "no module registered for this entry".into(),
        })?;
        Ok(factory())
    }
}

/// A plugin whose code resolved successfully.
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub definition: PluginDefinition,
    pub module: PluginModule,
}

impl LoadedPlugin {
    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

/// A plugin whose code could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPluginRecord {
    pub id: String,
    pub reason: String,
}

/// Loads plugins through a resolver and remembers the outcome per id.
pub struct PluginLoader {
    resolver: Arc<dyn CodeResolver>,
    loaded: HashMap<String, Arc<LoadedPlugin>>,
    failed: Vec<FailedPluginRecord>,
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("loaded", &self.loaded.keys().collect::<Vec<_>>())
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl PluginLoader {
    pub fn new(resolver: Arc<dyn CodeResolver>) -> Self {
        Self {
            resolver,
            loaded: HashMap::new(),
            failed: Vec::new(),
        }
    }

    /// Load a plugin, or return `None` if its code cannot be resolved.
    pub fn load(&mut self, definition: &PluginDefinition) -> Option<Arc<LoadedPlugin>> {
        if let Some(plugin) = self.loaded.get(&definition.id) {
            return Some(Arc::clone(plugin));
        }
        if self.has_failed(&definition.id) {
            return None;
        }

        match self.resolve(definition) {
            Ok(module) => {
                tracing::info!(
                    plugin = %definition.id,
                    kind = %definition.kind,
                    version = %definition.version,
                    "plugin loaded"
                );
                let plugin = Arc::new(LoadedPlugin {
                    definition: definition.clone(),
                    module,
                });
                self.loaded
                    .insert(definition.id.clone(), Arc::clone(&plugin));
                Some(plugin)
            }
            Err(e) => {
                tracing::error!(
                    plugin = %definition.id,
                    entry = %definition.entry,
                    "failed to load plugin: {e}"
                );
                self.failed.push(FailedPluginRecord {
                    id: definition.id.clone(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn resolve(&self, definition: &PluginDefinition) -> Result<PluginModule, PluginError> {
        let entry = definition.entry.as_str();
        let module = catch_unwind(AssertUnwindSafe(|| self.resolver.resolve(entry))).map_err(
            |_| PluginError::Resolve {
                entry: entry.to_string(),
                detail: "resolver panicked".into(),
            },
        )??;

        if module.id() != definition.id {
            return Err(PluginError::Resolve {
                entry: entry.to_string(),
                detail: format!(
                    "module id '{}' does not match plugin id '{}'",
                    module.id(),
                    definition.id
                ),
            });
        }
        Ok(module)
    }

    pub fn get(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        self.loaded.get(id).cloned()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded.contains_key(id)
    }

    pub fn has_failed(&self, id: &str) -> bool {
        self.failed.iter().any(|f| f.id == id)
    }

    pub fn failed(&self) -> &[FailedPluginRecord] {
        &self.failed
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Forget every load outcome.
    pub fn reset(&mut self) {
        self.loaded.clear();
        self.failed.clear();
    }
}
