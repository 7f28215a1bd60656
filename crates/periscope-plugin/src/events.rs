//! Host events: what the runtime tells the host shell.
//!
//! Events go out on a broadcast channel. The host may or may not be
//! listening; publishing with no subscriber is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default capacity of the host event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events published to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostEvent {
    /// Eligible plugins, split by kind.
    RegisterPlugins {
        device: Vec<String>,
        client: Vec<String>,
    },
    RegisterDevice {
        id: String,
        title: String,
        os: String,
        archived: bool,
    },
    UnregisterDevices {
        ids: Vec<String>,
    },
    NewClient {
        id: String,
        title: String,
        /// Plugins activated for this client.
        plugins: Vec<String>,
        #[serde(default)]
        archived: bool,
    },
    ClientRemoved {
        id: String,
    },
    /// A non-fatal, user-visible problem.
    ServerError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        urgent: bool,
    },
    PersistedStateChanged {
        connection: String,
        plugin: String,
    },
    NotificationsChanged,
}

impl HostEvent {
    pub fn server_error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::ServerError {
            message: message.into(),
            details,
            urgent: false,
        }
    }

    /// Event name as the host knows it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterPlugins { .. } => "REGISTER_PLUGINS",
            Self::RegisterDevice { .. } => "REGISTER_DEVICE",
            Self::UnregisterDevices { .. } => "UNREGISTER_DEVICES",
            Self::NewClient { .. } => "NEW_CLIENT",
            Self::ClientRemoved { .. } => "CLIENT_REMOVED",
            Self::ServerError { .. } => "SERVER_ERROR",
            Self::PersistedStateChanged { .. } => "PERSISTED_STATE_CHANGED",
            Self::NotificationsChanged => "NOTIFICATIONS_CHANGED",
        }
    }
}

/// Broadcast publisher for [`HostEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HostEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns how many subscribers received it.
    pub fn emit(&self, event: HostEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(event = name, "host event dropped, no subscriber");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
