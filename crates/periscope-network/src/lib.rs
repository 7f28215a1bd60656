//! periscope-network: the built-in network inspector plugin.
//!
//! Keeps every request and response a client reports, raises an error
//! notification for each failed response and counts failures as a metric.

pub mod plugin;
pub mod types;

pub use plugin::{
    definition, failure_notifications, module, network_metrics, reduce_network, register, ENTRY,
    NEW_REQUEST, NEW_RESPONSE, NUMBER_NETWORK_FAILURES, PLUGIN_ID,
};
pub use types::{Header, NetworkState, Request, RequestId, Response};
