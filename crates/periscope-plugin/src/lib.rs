//! Periscope plugin runtime
//!
//! Discovers, gatekeeps and loads inspector plugins, routes device and client
//! messages to them, and reduces those messages into per-connection persisted
//! state that can be exported, archived and turned into notifications without
//! any UI attached.

pub mod config;
pub mod coordinator;
pub mod definition;
pub mod discovery;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod handle;
pub mod loader;
pub mod manifest;
pub mod module;
pub mod notifications;
pub mod reducer;
pub mod registry;
pub mod state;

pub use config::{MetroConfig, RuntimeConfig};
pub use coordinator::{
    ConnectionInfo, ConnectionPhase, ConnectionRequest, Diagnostics, DisconnectPolicy,
    DispatchCoordinator, ExportedConnection, MessageOutcome, ReducerFaultRecord,
    UnsupportedPluginRecord, ARCHIVE_SEPARATOR,
};
pub use definition::{BugReporting, PluginDefinition, PluginKind};
pub use discovery::{
    run_discovery_step, spawn_discovery, Clock, DeviceTransport, DiscoveryAction, DiscoveryState,
    ManualClock, MetroTransport, RetrySchedule, SystemClock,
};
pub use eligibility::{
    EligibilityFilter, EligibilityReport, GatekeepedPluginRecord, Gatekeeper, StaticGatekeeper,
};
pub use error::PluginError;
pub use events::{EventBus, HostEvent};
pub use handle::CoordinatorHandle;
pub use loader::{CodeResolver, FailedPluginRecord, LoadedPlugin, PluginLoader, StaticResolver};
pub use manifest::{discover_plugins, plugin_folders, PluginManifest};
pub use module::{HookError, Metrics, PluginModule, PluginModuleBuilder};
pub use notifications::{
    notification_key, project, Notification, NotificationCenter, PluginNotification, Severity,
};
pub use reducer::{reduce, IncomingMessage, Reduction};
pub use registry::PluginRegistry;
pub use state::{PersistedState, PluginState};
