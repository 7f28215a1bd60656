//! Plugin manifest parsing, validation and folder discovery.
//!
//! Parses `plugin.toml` files that declare plugin metadata, the code entry
//! the resolver should load, and the capabilities the plugin needs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::definition::{BugReporting, PluginDefinition, PluginKind};
use crate::error::PluginError;

/// File name looked up in each plugin directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Plugin manifest parsed from `plugin.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub plugin: PluginMeta,
}

/// The `[plugin]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMeta {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub gatekeeper: Option<String>,
    pub entry: String,
    pub kind: PluginKind,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub bugs: Option<BugReporting>,
}

// ─── Validation helpers ─────────────────────────────────────────────

/// Validate a plugin id against `^[A-Za-z][A-Za-z0-9_-]{0,63}$`.
fn validate_plugin_id(id: &str) -> Result<(), PluginError> {
    let mut chars = id.chars();
    let first = chars.next().ok_or_else(|| {
        PluginError::InvalidManifest("plugin id must not be empty".into())
    })?;

    if id.len() > 64 {
        return Err(PluginError::InvalidManifest(format!(
            "plugin id must be at most 64 characters, got {}",
            id.len()
        )));
    }

    if !first.is_ascii_alphabetic() {
        return Err(PluginError::InvalidManifest(format!(
            "plugin id must start with a letter, got '{first}'"
        )));
    }

    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '-' && ch != '_' {
            return Err(PluginError::InvalidManifest(format!(
                "plugin id contains invalid character '{ch}'"
            )));
        }
    }

    Ok(())
}

fn validate_semver(value: &str, field_name: &str) -> Result<(), PluginError> {
    semver::Version::parse(value).map_err(|_| {
        PluginError::InvalidManifest(format!("{field_name} is not valid semver: '{value}'"))
    })?;
    Ok(())
}

/// Validate that a path is safe (no `..` components, not absolute).
fn validate_path_safety(path: &str, field_name: &str) -> Result<(), PluginError> {
    if path.trim().is_empty() {
        return Err(PluginError::InvalidManifest(format!(
            "{field_name} must not be empty"
        )));
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(PluginError::InvalidManifest(format!(
            "{field_name} must be a relative path, got absolute: '{path}'"
        )));
    }
    for component in p.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err(PluginError::InvalidManifest(format!(
                "{field_name} must not contain '..': '{path}'"
            )));
        }
    }
    Ok(())
}

impl PluginManifest {
    /// Parse a plugin manifest from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, PluginError> {
        let manifest: PluginManifest = toml::from_str(toml_str)?;
        Ok(manifest)
    }

    /// Validate all fields of a parsed manifest.
    pub fn validate(&self) -> Result<(), PluginError> {
        let meta = &self.plugin;
        validate_plugin_id(&meta.id)?;
        validate_semver(&meta.version, "plugin.version")?;
        validate_path_safety(&meta.entry, "plugin.entry")?;

        if let Some(ref tag) = meta.gatekeeper {
            if tag.trim().is_empty() {
                return Err(PluginError::InvalidManifest(
                    "plugin.gatekeeper must not be empty when present".into(),
                ));
            }
        }

        if meta.requires.iter().any(|c| c.trim().is_empty()) {
            return Err(PluginError::InvalidManifest(
                "plugin.requires entries must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Parse and validate a plugin manifest from a TOML string.
    pub fn parse_and_validate(toml_str: &str) -> Result<Self, PluginError> {
        let manifest = Self::parse(toml_str)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Convert into the definition the registry stores.
    pub fn into_definition(self, dir: Option<PathBuf>) -> PluginDefinition {
        let meta = self.plugin;
        PluginDefinition {
            name: meta.name.unwrap_or_else(|| meta.id.clone()),
            title: meta.title.unwrap_or_else(|| meta.id.clone()),
            id: meta.id,
            version: meta.version,
            icon: meta.icon,
            category: meta.category,
            gatekeeper: meta.gatekeeper,
            entry: meta.entry,
            kind: meta.kind,
            requires: meta.requires,
            bugs: meta.bugs,
            dir,
        }
    }
}

// ─── Discovery ──────────────────────────────────────────────────────

/// Folders that may contain plugin directories, in lookup order.
///
/// Folders that do not exist are dropped.
pub fn plugin_folders(config: &RuntimeConfig) -> Vec<PathBuf> {
    config
        .plugin_paths
        .iter()
        .filter(|p| p.is_dir())
        .cloned()
        .collect()
}

/// Scan the immediate subdirectories of each folder for `plugin.toml`.
///
/// Unreadable or invalid manifests are skipped with a warning so one broken
/// plugin directory never hides the others.
pub fn discover_plugins(folders: &[PathBuf]) -> Vec<PluginDefinition> {
    let mut discovered = Vec::new();

    for folder in folders {
        let entries = match std::fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(folder = %folder.display(), "cannot read plugin folder: {e}");
                continue;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let manifest_path = dir.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            match load_manifest(&manifest_path) {
                Ok(manifest) => {
                    tracing::debug!(
                        plugin = %manifest.plugin.id,
                        dir = %dir.display(),
                        "discovered plugin"
                    );
                    discovered.push(manifest.into_definition(Some(dir)));
                }
                Err(e) => {
                    tracing::warn!(
                        manifest = %manifest_path.display(),
                        "skipping invalid plugin manifest: {e}"
                    );
                }
            }
        }
    }

    discovered
}

/// Read, parse and validate one manifest file.
pub fn load_manifest(path: &Path) -> Result<PluginManifest, PluginError> {
    let content = std::fs::read_to_string(path)?;
    PluginManifest::parse_and_validate(&content)
}

// ─── Tests ──────────────────────────────────────────────────────────
