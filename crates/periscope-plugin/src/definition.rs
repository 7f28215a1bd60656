//! Plugin definitions: the immutable metadata the registry hands out.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a plugin binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Bound to a physical or virtual device, independent of any app.
    Device,
    /// Bound to a connected application instance.
    Client,
}

impl PluginKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where users should report problems with a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugReporting {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Metadata describing one plugin and where its code lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDefinition {
    /// Unique plugin identifier.
    pub id: String,
    /// Package name; defaults to the id.
    pub name: String,
    pub version: String,
    /// Human readable title shown by the host.
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Staged-rollout tag; plugins without one are always eligible.
    #[serde(default)]
    pub gatekeeper: Option<String>,
    /// Code reference handed to the resolver.
    pub entry: String,
    pub kind: PluginKind,
    /// Capabilities a connection must advertise for this plugin to run.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub bugs: Option<BugReporting>,
    /// Directory the manifest was discovered in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl PluginDefinition {
    pub fn new(id: impl Into<String>, kind: PluginKind, entry: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            title: id.clone(),
            id,
            version: "0.0.0".to_string(),
            icon: None,
            category: None,
            gatekeeper: None,
            entry: entry.into(),
            kind,
            requires: Vec::new(),
            bugs: None,
            dir: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_gatekeeper(mut self, tag: impl Into<String>) -> Self {
        self.gatekeeper = Some(tag.into());
        self
    }

    pub fn with_requires<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_device_plugin(&self) -> bool {
        self.kind == PluginKind::Device
    }

    pub fn is_client_plugin(&self) -> bool {
        self.kind == PluginKind::Client
    }
}
