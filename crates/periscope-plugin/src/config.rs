//! Runtime configuration.
//!
//! Read-only inputs to eligibility filtering and the coordinator. Values come
//! from a `periscope.toml` file, environment variables, or both (env wins).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Default Metro bundler address.
pub const DEFAULT_METRO_URL: &str = "http://localhost:8081";

/// How often the Metro transport is probed while disconnected.
pub const DEFAULT_METRO_QUERY_INTERVAL_MS: u64 = 5_000;

/// Upper bound for a single Metro probe request.
pub const DEFAULT_METRO_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Settings for the Metro device transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetroConfig {
    pub enabled: bool,
    pub url: String,
    pub query_interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for MetroConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_METRO_URL.to_string(),
            query_interval_ms: DEFAULT_METRO_QUERY_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_METRO_CONNECT_TIMEOUT_MS,
        }
    }
}

impl MetroConfig {
    pub fn query_interval(&self) -> Duration {
        Duration::from_millis(self.query_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

/// Process-wide plugin runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Plugin ids that must never run.
    pub disabled_plugins: BTreeSet<String>,
    /// Gatekeeper tags that evaluate to true for this session.
    pub enabled_gatekeepers: BTreeSet<String>,
    /// Extra folders scanned for plugin manifests.
    pub plugin_paths: Vec<PathBuf>,
    /// Skip the plugins compiled into the binary.
    pub no_embedded_plugins: bool,
    /// Keep a disconnected device's persisted state under an archival id.
    pub archive_on_disconnect: bool,
    pub metro: MetroConfig,
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

impl RuntimeConfig {
    /// Build config from environment variables only.
    pub fn from_env() -> Result<Self, PluginError> {
        let mut config = Self::default();
        config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a `periscope.toml` config file.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, PluginError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, then layer environment overrides on top.
    pub fn load(path: &std::path::Path) -> Result<Self, PluginError> {
        let mut config = if path.is_file() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `PERISCOPE_*` and `METRO_*` environment overrides.
    ///
    /// List variables extend the configured sets rather than replacing them.
    pub fn merge_env(&mut self) {
        self.merge_vars(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source.
    pub fn merge_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PERISCOPE_DISABLED_PLUGINS") {
            self.disabled_plugins.extend(split_list(&v));
        }
        if let Some(v) = lookup("PERISCOPE_GATEKEEPERS") {
            self.enabled_gatekeepers.extend(split_list(&v));
        }
        if let Some(v) = lookup("PERISCOPE_PLUGIN_PATHS") {
            self.plugin_paths.extend(split_list(&v).map(PathBuf::from));
        }
        if let Some(v) = lookup("PERISCOPE_NO_EMBEDDED_PLUGINS") {
            self.no_embedded_plugins = parse_flag(&v);
        }
        if let Some(v) = lookup("PERISCOPE_ARCHIVE_ON_DISCONNECT") {
            self.archive_on_disconnect = parse_flag(&v);
        }
        if let Some(v) = lookup("METRO_ENABLED") {
            self.metro.enabled = parse_flag(&v);
        }
        if let Some(v) = lookup("METRO_URL") {
            if !v.trim().is_empty() {
                self.metro.url = v.trim().to_string();
            }
        }
        if let Some(ms) = lookup("METRO_QUERY_INTERVAL_MS").and_then(|v| v.trim().parse().ok()) {
            self.metro.query_interval_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        let url = url::Url::parse(&self.metro.url)
            .map_err(|e| PluginError::Config(format!("metro.url '{}': {e}", self.metro.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PluginError::Config(format!(
                "metro.url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }

    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        self.disabled_plugins.contains(plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.disabled_plugins.is_empty());
        assert!(!config.archive_on_disconnect);
        assert_eq!(config.metro.url, "http://localhost:8081");
        assert_eq!(config.metro.query_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = RuntimeConfig::from_toml_str(
            r#"
disabled_plugins = ["Layout"]
enabled_gatekeepers = ["network_rollout"]
plugin_paths = ["/opt/periscope/plugins"]
archive_on_disconnect = true

[metro]
url = "http://127.0.0.1:9090"
query_interval_ms = 250
"#,
        )
        .unwrap();
        assert!(config.is_disabled("Layout"));
        assert!(!config.is_disabled("Network"));
        assert!(config.enabled_gatekeepers.contains("network_rollout"));
        assert_eq!(config.plugin_paths, vec![PathBuf::from("/opt/periscope/plugins")]);
        assert!(config.archive_on_disconnect);
        assert_eq!(config.metro.url, "http://127.0.0.1:9090");
        assert_eq!(config.metro.query_interval(), Duration::from_millis(250));
        // untouched fields keep defaults
        assert!(config.metro.enabled);
        assert_eq!(config.metro.connect_timeout_ms, DEFAULT_METRO_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn test_invalid_metro_url_rejected() {
        let err = RuntimeConfig::from_toml_str("[metro]\nurl = \"not a url\"\n").unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));

        let err = RuntimeConfig::from_toml_str("[metro]\nurl = \"ftp://host\"\n").unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn test_split_list_trims_and_skips_empty() {
        let items: Vec<String> = split_list(" a, b ,,c ").collect();
        assert_eq!(items, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_vars() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PERISCOPE_DISABLED_PLUGINS", "Layout, Inspector"),
            ("PERISCOPE_ARCHIVE_ON_DISCONNECT", "true"),
            ("METRO_QUERY_INTERVAL_MS", "1000"),
            ("METRO_ENABLED", "0"),
        ]);

        let mut config = RuntimeConfig::default();
        config.disabled_plugins.insert("Crash".into());
        config.merge_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert!(config.is_disabled("Crash"));
        assert!(config.is_disabled("Layout"));
        assert!(config.is_disabled("Inspector"));
        assert!(config.archive_on_disconnect);
        assert!(!config.metro.enabled);
        assert_eq!(config.metro.query_interval_ms, 1000);
        assert_eq!(config.metro.url, MetroConfig::default().url);
    }

    #[test]
    fn test_merge_vars_ignores_blank_url_and_bad_interval() {
        let mut config = RuntimeConfig::default();
        config.merge_vars(|name| match name {
            "METRO_URL" => Some("  ".into()),
            "METRO_QUERY_INTERVAL_MS" => Some("soon".into()),
            _ => None,
        });
        assert_eq!(config, RuntimeConfig::default());
    }
}
