//! The network inspector plugin: reducer, notifications and metrics.

use periscope_plugin::{
    HookError, Metrics, Notification, PluginDefinition, PluginKind, PluginModule, Reduction,
    Severity, StaticResolver,
};
use serde_json::Value;

use crate::types::{NetworkState, Request, Response};

pub const PLUGIN_ID: &str = "Network";
pub const ENTRY: &str = "builtin/network";

pub const NEW_REQUEST: &str = "newRequest";
pub const NEW_RESPONSE: &str = "newResponse";

/// Metric counting responses with status >= 400.
pub const NUMBER_NETWORK_FAILURES: &str = "NUMBER_NETWORK_FAILURES";

const URL_MISSING: &str = "(URL missing)";

/// Fold a `newRequest` or `newResponse` message into the state.
pub fn reduce_network(
    state: &NetworkState,
    method: &str,
    params: &Value,
) -> Result<Reduction<NetworkState>, HookError> {
    match method {
        NEW_REQUEST => {
            let request: Request = serde_json::from_value(params.clone())?;
            Ok(Reduction::Replaced(state.with_request(request)))
        }
        NEW_RESPONSE => {
            let response: Response = serde_json::from_value(params.clone())?;
            Ok(Reduction::Replaced(state.with_response(response)))
        }
        _ => {
            tracing::trace!(method, "network plugin ignoring unknown method");
            Ok(Reduction::Unchanged)
        }
    }
}

/// One error notification per failed response, keyed by response id.
pub fn failure_notifications(state: &NetworkState) -> Vec<Notification> {
    state
        .failed_responses()
        .map(|response| {
            let url = state.url_of(&response.id).unwrap_or(URL_MISSING);
            Notification::new(
                &response.id,
                format!("HTTP {}: Network request failed", response.status),
                format!("Request to {url} failed. {}", response.reason),
                Severity::Error,
            )
            .with_timestamp(response.timestamp)
            .with_category(format!("HTTP{}", response.status))
            .with_action(response.id.clone())
        })
        .collect()
}

pub fn network_metrics(state: &NetworkState) -> Metrics {
    let failures = state.failed_responses().count();
    Metrics::from([(NUMBER_NETWORK_FAILURES.to_string(), failures as f64)])
}

/// The executable side of the plugin.
pub fn module() -> PluginModule {
    PluginModule::builder(PLUGIN_ID, NetworkState::default())
        .reducer(reduce_network)
        .notifications(failure_notifications)
        .metrics(network_metrics)
        .build()
}

pub fn definition() -> PluginDefinition {
    PluginDefinition::new(PLUGIN_ID, PluginKind::Client, ENTRY)
        .with_title("Network")
        .with_icon("internet")
        .with_version(env!("CARGO_PKG_VERSION"))
}

/// Make the plugin resolvable under [`ENTRY`].
pub fn register(resolver: &mut StaticResolver) {
    resolver.register(ENTRY, module);
}
