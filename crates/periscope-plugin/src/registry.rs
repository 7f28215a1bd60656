//! Plugin registry: the id → definition map.
//!
//! Registration is first-wins: re-dispatching a "register plugins" batch
//! never replaces or duplicates an entry. The registry never touches storage
//! or the network; discovery happens elsewhere and hands definitions in.

use std::collections::BTreeMap;

use crate::definition::{PluginDefinition, PluginKind};
use crate::error::PluginError;

/// Mapping from plugin id to its definition.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    definitions: BTreeMap<String, PluginDefinition>,
    /// Ids in registration order.
    order: Vec<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge definitions into the registry.
    ///
    /// Returns the ids that were newly added; ids already present are
    /// skipped, including duplicates within the same batch.
    pub fn register<I>(&mut self, definitions: I) -> Vec<String>
    where
        I: IntoIterator<Item = PluginDefinition>,
    {
        let mut added = Vec::new();
        for def in definitions {
            if self.definitions.contains_key(&def.id) {
                tracing::debug!(plugin = %def.id, "plugin already registered, keeping first");
                continue;
            }
            tracing::debug!(plugin = %def.id, kind = %def.kind, "plugin registered");
            self.order.push(def.id.clone());
            added.push(def.id.clone());
            self.definitions.insert(def.id.clone(), def);
        }
        added
    }

    pub fn get(&self, id: &str) -> Result<&PluginDefinition, PluginError> {
        self.definitions
            .get(id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// All definitions in registration order.
    pub fn definitions(&self) -> impl Iterator<Item = &PluginDefinition> {
        self.order.iter().filter_map(|id| self.definitions.get(id))
    }

    /// Definitions of one kind, in registration order.
    pub fn by_kind(&self, kind: PluginKind) -> impl Iterator<Item = &PluginDefinition> {
        self.definitions().filter(move |d| d.kind == kind)
    }

    pub fn device_plugins(&self) -> Vec<&PluginDefinition> {
        self.by_kind(PluginKind::Device).collect()
    }

    pub fn client_plugins(&self) -> Vec<&PluginDefinition> {
        self.by_kind(PluginKind::Client).collect()
    }

    /// Drop every definition.
    pub fn clear(&mut self) {
        self.definitions.clear();
        self.order.clear();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> PluginDefinition {
        PluginDefinition::new(id, PluginKind::Client, format!("builtin/{id}"))
    }

    fn device(id: &str) -> PluginDefinition {
        PluginDefinition::new(id, PluginKind::Device, format!("builtin/{id}"))
    }

    #[test]
    fn test_register_same_plugin_twice() {
        let mut registry = PluginRegistry::new();
        let def = client("TestPlugin");
        let added = registry.register([def.clone(), def.clone()]);

        assert_eq!(added, vec!["TestPlugin".to_string()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("TestPlugin").unwrap(), &def);
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = PluginRegistry::new();
        registry.register([client("net").with_title("First")]);
        let added = registry.register([client("net").with_title("Second")]);

        assert!(added.is_empty());
        assert_eq!(registry.get("net").unwrap().title, "First");
    }

    #[test]
    fn test_register_is_idempotent_for_any_duplicates() {
        let ids = ["a", "b", "a", "c", "b", "a"];
        let mut registry = PluginRegistry::new();
        registry.register(ids.iter().map(|id| client(id)));
        registry.register(ids.iter().map(|id| client(id)));

        assert_eq!(registry.len(), 3);
        let order: Vec<&str> = registry.definitions().map(|d| d.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(PluginError::NotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_device_and_client_plugins_kept_apart() {
        let mut registry = PluginRegistry::new();
        registry.register([client("net"), device("logs"), client("layout")]);

        let devices: Vec<&str> = registry.device_plugins().iter().map(|d| d.id.as_str()).collect();
        let clients: Vec<&str> = registry.client_plugins().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(devices, vec!["logs"]);
        assert_eq!(clients, vec!["net", "layout"]);
    }

    #[test]
    fn test_clear() {
        let mut registry = PluginRegistry::new();
        registry.register([client("net")]);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("net"));
    }
}
