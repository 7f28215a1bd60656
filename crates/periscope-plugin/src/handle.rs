//! Shared async handle to a [`DispatchCoordinator`].
//!
//! Transports and the host drive the coordinator from separate tasks. Every
//! call takes the same lock, so messages for one (plugin, connection) pair
//! are reduced strictly one after another.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::coordinator::{
    ConnectionRequest, Diagnostics, DispatchCoordinator, ExportedConnection, MessageOutcome,
};
use crate::definition::PluginDefinition;
use crate::error::PluginError;
use crate::events::{EventBus, HostEvent};
use crate::reducer::IncomingMessage;
use crate::state::PersistedState;

#[derive(Clone)]
pub struct CoordinatorHandle {
    inner: Arc<Mutex<DispatchCoordinator>>,
    events: EventBus,
}

impl std::fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("subscribers", &self.events.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl CoordinatorHandle {
    pub fn new(coordinator: DispatchCoordinator) -> Self {
        let events = coordinator.events().clone();
        Self {
            inner: Arc::new(Mutex::new(coordinator)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Publish an event on the coordinator's bus without taking the lock.
    pub fn emit(&self, event: HostEvent) -> usize {
        self.events.emit(event)
    }

    /// Run a closure with exclusive access to the coordinator.
    pub async fn with<R>(&self, f: impl FnOnce(&mut DispatchCoordinator) -> R) -> R {
        let mut coordinator = self.inner.lock().await;
        f(&mut coordinator)
    }

    pub async fn start(&self, definitions: Vec<PluginDefinition>) -> Vec<String> {
        self.inner.lock().await.start(definitions)
    }

    pub async fn connect(&self, request: ConnectionRequest) -> Result<Vec<String>, PluginError> {
        self.inner.lock().await.connect(request)
    }

    pub async fn handle_message(
        &self,
        connection: &str,
        plugin: &str,
        message: IncomingMessage,
    ) -> MessageOutcome {
        self.inner
            .lock()
            .await
            .handle_message(connection, plugin, &message)
    }

    pub async fn disconnect(&self, id: &str) -> Option<String> {
        self.inner.lock().await.disconnect(id)
    }

    pub async fn export_connection(&self, id: &str) -> Result<ExportedConnection, PluginError> {
        self.inner.lock().await.export_connection(id)
    }

    pub async fn import_connection(
        &self,
        exported: ExportedConnection,
    ) -> Result<String, PluginError> {
        self.inner.lock().await.import_connection(exported)
    }

    pub async fn persisted_state(&self, connection: &str, plugin: &str) -> Option<PersistedState> {
        self.inner.lock().await.persisted_state(connection, plugin)
    }

    pub async fn clear_notifications(&self) {
        self.inner.lock().await.clear_notifications();
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.inner.lock().await.diagnostics()
    }

    pub async fn reset(&self) {
        self.inner.lock().await.reset();
    }
}
