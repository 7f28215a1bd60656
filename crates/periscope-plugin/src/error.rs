//! Plugin runtime error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("failed to resolve plugin code '{entry}': {detail}")]
    Resolve { entry: String, detail: String },

    #[error("reducer fault in plugin {plugin} on '{method}': {detail}")]
    Reducer {
        plugin: String,
        method: String,
        detail: String,
    },

    #[error("persisted state of plugin {0} has an unexpected type")]
    StateType(String),

    #[error("state serialization error: {0}")]
    StateCodec(String),

    #[error("invalid handshake: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid connection transition: {0}")]
    InvalidTransition(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("semver error: {0}")]
    Semver(#[from] semver::Error),
}
