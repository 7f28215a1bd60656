//! Dispatch coordinator: owns every piece of runtime state and drives the
//! per-connection lifecycle.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> ELIGIBLE_COMPUTED -> PLUGINS_LOADED -> ACTIVE -> DISCONNECTED
//! ```
//!
//! A coordinator is an explicit value with an init ([`DispatchCoordinator::start`])
//! and reset lifecycle; nothing here is process-global. Plugin faults are
//! isolated: a plugin that fails to load is skipped, a reducer that fails
//! keeps its previous state. Malformed handshakes are reported to the host as
//! `SERVER_ERROR` events.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::definition::{PluginDefinition, PluginKind};
use crate::eligibility::{EligibilityFilter, EligibilityReport, GatekeepedPluginRecord, Gatekeeper};
use crate::error::PluginError;
use crate::events::{EventBus, HostEvent};
use crate::loader::{CodeResolver, FailedPluginRecord, LoadedPlugin, PluginLoader};
use crate::module::Metrics;
use crate::notifications::{project, NotificationCenter};
use crate::reducer::{reduce, IncomingMessage};
use crate::registry::PluginRegistry;
use crate::state::PersistedState;

/// Separator between a connection id and its archival suffix.
pub const ARCHIVE_SEPARATOR: &str = "#archived#";

const MAX_RECORDED_FAULTS: usize = 100;

// ─── Connections ─────────────────────────────────────────────────────

/// Handshake data a transport presents when a device or client connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub id: String,
    /// Device connections get device plugins, client connections client ones.
    pub kind: PluginKind,
    pub title: String,
    #[serde(default)]
    pub os: String,
    /// Capabilities the remote side advertises.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Plugins a client advertises; `None` accepts every eligible one.
    #[serde(default)]
    pub plugins: Option<Vec<String>>,
}

impl ConnectionRequest {
    pub fn device(id: impl Into<String>, title: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PluginKind::Device,
            title: title.into(),
            os: os.into(),
            capabilities: Vec::new(),
            plugins: None,
        }
    }

    pub fn client(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PluginKind::Client,
            title: title.into(),
            os: String::new(),
            capabilities: Vec::new(),
            plugins: None,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_plugins<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugins = Some(plugins.into_iter().map(Into::into).collect());
        self
    }

    /// Reject handshakes the coordinator cannot route.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.id.trim().is_empty() {
            return Err(PluginError::Handshake("connection id is empty".into()));
        }
        if self.id.contains(ARCHIVE_SEPARATOR) {
            return Err(PluginError::Handshake(format!(
                "connection id '{}' is reserved for archived connections",
                self.id
            )));
        }
        if self.title.trim().is_empty() {
            return Err(PluginError::Handshake(format!(
                "connection '{}' has no title",
                self.id
            )));
        }
        if self.capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(PluginError::Handshake(format!(
                "connection '{}' advertises an empty capability",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    EligibleComputed,
    PluginsLoaded,
    Active,
}

impl ConnectionPhase {
    /// Legal transitions. An active connection may re-enter `Connecting` to
    /// refresh its plugin set; every live phase may drop to `Disconnected`.
    pub fn can_advance_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, EligibleComputed)
                | (EligibleComputed, PluginsLoaded)
                | (PluginsLoaded, Active)
                | (Active, Connecting)
                | (Connecting | EligibleComputed | PluginsLoaded | Active, Disconnected)
        )
    }
}

/// What the coordinator remembers about a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub kind: PluginKind,
    pub title: String,
    pub os: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Connection {
    info: ConnectionInfo,
    phase: ConnectionPhase,
    archived: bool,
    plugins: BTreeMap<String, Arc<LoadedPlugin>>,
}

type StateKey = (String, String);

fn state_key(connection: &str, plugin: &str) -> StateKey {
    (connection.to_string(), plugin.to_string())
}

fn invariant_violation(detail: &str) {
    tracing::error!("coordinator invariant violated: {detail}");
    debug_assert!(false, "coordinator invariant violated: {detail}");
}

fn advance(
    connection: &str,
    phase: &mut ConnectionPhase,
    next: ConnectionPhase,
) -> Result<(), PluginError> {
    if phase.can_advance_to(next) {
        tracing::trace!(connection, from = ?phase, to = ?next, "connection phase");
        *phase = next;
        return Ok(());
    }
    let detail = format!("connection {connection}: {phase:?} -> {next:?}");
    invariant_violation(&detail);
    Err(PluginError::InvalidTransition(detail))
}

// ─── Outcomes and diagnostics ────────────────────────────────────────

/// Result of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The reducer produced a new state.
    Changed,
    Unchanged,
    /// No live plugin instance for this connection; nothing was reduced.
    Dropped,
    /// The reducer failed; the previous state was kept.
    Faulted,
}

/// What happens to a connection's persisted state on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Keep the states under a synthetic archival id.
    Archive,
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedPluginRecord {
    pub connection: String,
    pub plugin: String,
    /// Required capabilities the connection did not advertise.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerFaultRecord {
    pub connection: String,
    pub plugin: String,
    pub method: String,
    pub detail: String,
}

/// Snapshot of everything the coordinator excluded, failed or dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub gatekeeped: Vec<GatekeepedPluginRecord>,
    pub disabled: Vec<String>,
    pub failed: Vec<FailedPluginRecord>,
    pub unsupported: Vec<UnsupportedPluginRecord>,
    /// Most recent reducer faults, oldest first.
    pub reducer_faults: Vec<ReducerFaultRecord>,
    pub dropped_messages: u64,
}

/// Serialised form of one connection's plugin states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedConnection {
    pub connection: ConnectionInfo,
    pub exported_at: DateTime<Utc>,
    /// Plugin id to the plugin's own serialisation of its state.
    pub plugin_states: BTreeMap<String, String>,
}

impl ExportedConnection {
    pub fn to_json(&self) -> Result<String, PluginError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        Ok(serde_json::from_str(json)?)
    }
}

// ─── Coordinator ─────────────────────────────────────────────────────

pub struct DispatchCoordinator {
    config: RuntimeConfig,
    gatekeeper: Arc<dyn Gatekeeper>,
    registry: PluginRegistry,
    loader: PluginLoader,
    /// Ids that passed the eligibility filter, in registration order.
    eligible: Vec<String>,
    report: EligibilityReport,
    connections: BTreeMap<String, Connection>,
    states: BTreeMap<StateKey, PersistedState>,
    notifications: NotificationCenter,
    unsupported: Vec<UnsupportedPluginRecord>,
    reducer_faults: VecDeque<ReducerFaultRecord>,
    dropped_messages: u64,
    events: EventBus,
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("registered", &self.registry.len())
            .field("eligible", &self.eligible)
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .field("dropped_messages", &self.dropped_messages)
            .finish_non_exhaustive()
    }
}

impl DispatchCoordinator {
    pub fn new(
        config: RuntimeConfig,
        gatekeeper: Arc<dyn Gatekeeper>,
        resolver: Arc<dyn CodeResolver>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            gatekeeper,
            registry: PluginRegistry::new(),
            loader: PluginLoader::new(resolver),
            eligible: Vec::new(),
            report: EligibilityReport::default(),
            connections: BTreeMap::new(),
            states: BTreeMap::new(),
            notifications: NotificationCenter::new(),
            unsupported: Vec::new(),
            reducer_faults: VecDeque::new(),
            dropped_messages: 0,
            events,
        }
    }

    /// Register definitions, filter the new ones, load the survivors and
    /// announce the eligible plugin set with `REGISTER_PLUGINS`.
    ///
    /// Safe to call again with an overlapping batch: known ids are skipped,
    /// so each plugin is filtered and gatekept exactly once.
    pub fn start<I>(&mut self, definitions: I) -> Vec<String>
    where
        I: IntoIterator<Item = PluginDefinition>,
    {
        let added = self.registry.register(definitions);

        let candidates = added.iter().filter_map(|id| self.registry.get(id).ok());
        let filter =
            EligibilityFilter::new(&self.config.disabled_plugins, self.gatekeeper.as_ref());
        let eligible: Vec<PluginDefinition> = filter
            .apply(candidates, &mut self.report)
            .into_iter()
            .cloned()
            .collect();

        for def in &eligible {
            self.eligible.push(def.id.clone());
            self.loader.load(def);
        }

        tracing::info!(
            registered = added.len(),
            eligible = eligible.len(),
            failed = self.loader.failed().len(),
            "plugins registered"
        );

        self.events.emit(HostEvent::RegisterPlugins {
            device: self.active_plugins_of_kind(PluginKind::Device),
            client: self.active_plugins_of_kind(PluginKind::Client),
        });
        added
    }

    /// Drop every piece of runtime state, as if freshly constructed.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.loader.reset();
        self.eligible.clear();
        self.report = EligibilityReport::default();
        self.connections.clear();
        self.states.clear();
        self.notifications = NotificationCenter::new();
        self.unsupported.clear();
        self.reducer_faults.clear();
        self.dropped_messages = 0;
        tracing::debug!("coordinator reset");
    }

    fn active_plugins_of_kind(&self, kind: PluginKind) -> Vec<String> {
        self.eligible
            .iter()
            .filter(|id| {
                self.loader
                    .get(id)
                    .map_or(false, |p| p.definition.kind == kind)
            })
            .cloned()
            .collect()
    }

    /// Eligible candidates for a connection, after the kind, advertised
    /// plugin and required-capability gates.
    fn candidates_for(&mut self, request: &ConnectionRequest) -> Vec<PluginDefinition> {
        self.unsupported.retain(|r| r.connection != request.id);
        let mut candidates = Vec::new();
        for id in &self.eligible {
            let Ok(def) = self.registry.get(id) else {
                continue;
            };
            if def.kind != request.kind {
                continue;
            }
            if let (PluginKind::Client, Some(advertised)) = (request.kind, &request.plugins) {
                if !advertised.contains(id) {
                    continue;
                }
            }

            let missing: Vec<String> = def
                .requires
                .iter()
                .filter(|c| !request.capabilities.contains(c))
                .cloned()
                .collect();
            if !missing.is_empty() {
                tracing::info!(
                    plugin = %id,
                    connection = %request.id,
                    missing = ?missing,
                    "plugin not supported by connection"
                );
                let record = UnsupportedPluginRecord {
                    connection: request.id.clone(),
                    plugin: id.clone(),
                    missing,
                };
                self.unsupported.push(record);
                continue;
            }
            candidates.push(def.clone());
        }
        candidates
    }

    /// Bring a connection to `ACTIVE` and return the plugins running on it.
    ///
    /// Connecting an id that is already active refreshes its plugin set.
    /// Plugins that still pass the gates keep their persisted states, the
    /// others are dropped. A refresh may not change the connection kind.
    pub fn connect(&mut self, request: ConnectionRequest) -> Result<Vec<String>, PluginError> {
        if let Err(e) = request.validate() {
            tracing::warn!(connection = %request.id, "rejected connection: {e}");
            self.events.emit(HostEvent::server_error(
                "Failed to establish a connection",
                Some(e.to_string()),
            ));
            return Err(e);
        }

        let existing = self.connections.get(&request.id);
        if let Some(conn) = existing.filter(|c| c.info.kind != request.kind) {
            let e = PluginError::Handshake(format!(
                "connection '{}' is already registered as a {}",
                request.id, conn.info.kind
            ));
            tracing::warn!(connection = %request.id, "rejected connection: {e}");
            self.events.emit(HostEvent::server_error(
                "Failed to establish a connection",
                Some(e.to_string()),
            ));
            return Err(e);
        }
        let is_refresh = existing.is_some();
        let mut phase = existing.map_or(ConnectionPhase::Disconnected, |c| c.phase);
        let previous = existing.map(|c| c.plugins.clone()).unwrap_or_default();
        let connected_at = existing.map_or_else(Utc::now, |c| c.info.connected_at);

        advance(&request.id, &mut phase, ConnectionPhase::Connecting)?;
        let candidates = self.candidates_for(&request);

        advance(&request.id, &mut phase, ConnectionPhase::EligibleComputed)?;
        let mut plugins = BTreeMap::new();
        for def in &candidates {
            let loaded = match previous.get(&def.id) {
                Some(plugin) => Some(Arc::clone(plugin)),
                None => self.loader.load(def),
            };
            if let Some(plugin) = loaded {
                plugins.insert(def.id.clone(), plugin);
            }
        }

        let removed: Vec<&String> = previous
            .keys()
            .filter(|id| !plugins.contains_key(*id))
            .collect();
        if !removed.is_empty() {
            let before = self.notifications.active().to_vec();
            for plugin_id in removed {
                tracing::info!(
                    connection = %request.id,
                    plugin = %plugin_id,
                    "plugin no longer eligible, dropping its state"
                );
                self.states.remove(&state_key(&request.id, plugin_id));
                self.notifications
                    .set_active_notifications(&request.id, plugin_id, Vec::new());
            }
            if self.notifications.active() != before.as_slice() {
                self.events.emit(HostEvent::NotificationsChanged);
            }
        }

        advance(&request.id, &mut phase, ConnectionPhase::PluginsLoaded)?;
        for (plugin_id, plugin) in &plugins {
            let key = state_key(&request.id, plugin_id);
            if self.states.contains_key(&key) {
                continue;
            }
            let state = plugin.module.default_state();
            self.notifications.set_active_notifications(
                &request.id,
                plugin_id,
                project(&plugin.module, &state),
            );
            self.states.insert(key, state);
        }

        advance(&request.id, &mut phase, ConnectionPhase::Active)?;
        let plugin_ids: Vec<String> = plugins.keys().cloned().collect();
        let info = ConnectionInfo {
            id: request.id.clone(),
            kind: request.kind,
            title: request.title.clone(),
            os: request.os.clone(),
            connected_at,
        };
        self.connections.insert(
            request.id.clone(),
            Connection {
                info,
                phase,
                archived: false,
                plugins,
            },
        );

        tracing::info!(
            connection = %request.id,
            kind = %request.kind,
            plugins = plugin_ids.len(),
            refresh = is_refresh,
            "connection active"
        );

        if !is_refresh {
            let event = match request.kind {
                PluginKind::Device => HostEvent::RegisterDevice {
                    id: request.id,
                    title: request.title,
                    os: request.os,
                    archived: false,
                },
                PluginKind::Client => HostEvent::NewClient {
                    id: request.id,
                    title: request.title,
                    plugins: plugin_ids.clone(),
                    archived: false,
                },
            };
            self.events.emit(event);
        }
        Ok(plugin_ids)
    }

    /// Route one message to the plugin instance of a connection.
    pub fn handle_message(
        &mut self,
        connection: &str,
        plugin: &str,
        message: &IncomingMessage,
    ) -> MessageOutcome {
        let key = state_key(connection, plugin);
        let loaded = match self.connections.get(connection) {
            Some(conn) if !conn.archived => conn.plugins.get(plugin).map(Arc::clone),
            _ => None,
        };
        let (Some(loaded), Some(state)) = (loaded, self.states.get(&key).cloned()) else {
            self.dropped_messages += 1;
            tracing::warn!(
                connection,
                plugin,
                method = %message.method,
                "dropping message for plugin not loaded on this connection"
            );
            return MessageOutcome::Dropped;
        };

        let next = match reduce(&loaded.module, &state, &message.method, &message.params) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(
                    connection,
                    plugin,
                    method = %message.method,
                    "reducer fault, keeping previous state: {e}"
                );
                self.record_fault(ReducerFaultRecord {
                    connection: connection.to_string(),
                    plugin: plugin.to_string(),
                    method: message.method.clone(),
                    detail: e.to_string(),
                });
                return MessageOutcome::Faulted;
            }
        };
        if next.ptr_eq(&state) {
            return MessageOutcome::Unchanged;
        }

        let projected = project(&loaded.module, &next);
        self.states.insert(key, next);
        self.events.emit(HostEvent::PersistedStateChanged {
            connection: connection.to_string(),
            plugin: plugin.to_string(),
        });

        let before = self.notifications.active().to_vec();
        self.notifications
            .set_active_notifications(connection, plugin, projected);
        if self.notifications.active() != before.as_slice() {
            self.events.emit(HostEvent::NotificationsChanged);
        }
        MessageOutcome::Changed
    }

    fn record_fault(&mut self, fault: ReducerFaultRecord) {
        if self.reducer_faults.len() == MAX_RECORDED_FAULTS {
            self.reducer_faults.pop_front();
        }
        self.reducer_faults.push_back(fault);
    }

    /// Disconnect using the configured policy. Returns the archival id when
    /// the states were archived.
    pub fn disconnect(&mut self, id: &str) -> Option<String> {
        let policy = if self.config.archive_on_disconnect {
            DisconnectPolicy::Archive
        } else {
            DisconnectPolicy::Discard
        };
        self.disconnect_with(id, policy)
    }

    /// Close a connection. `Archive` applies to devices; a client's states
    /// are always discarded.
    pub fn disconnect_with(&mut self, id: &str, policy: DisconnectPolicy) -> Option<String> {
        let Some(mut conn) = self.connections.remove(id) else {
            tracing::debug!(connection = id, "disconnect for unknown connection ignored");
            return None;
        };
        if advance(id, &mut conn.phase, ConnectionPhase::Disconnected).is_err() {
            return None;
        }

        let states: Vec<(String, PersistedState)> = conn
            .plugins
            .keys()
            .filter_map(|plugin| {
                self.states
                    .remove(&state_key(id, plugin))
                    .map(|state| (plugin.clone(), state))
            })
            .collect();
        for plugin in conn.plugins.keys() {
            self.notifications
                .set_active_notifications(id, plugin, Vec::new());
        }

        self.unsupported.retain(|r| r.connection != id);

        match conn.info.kind {
            PluginKind::Device => self.events.emit(HostEvent::UnregisterDevices {
                ids: vec![id.to_string()],
            }),
            PluginKind::Client => self.events.emit(HostEvent::ClientRemoved { id: id.to_string() }),
        };

        // only devices are kept around after they go away
        let archive = policy == DisconnectPolicy::Archive && conn.info.kind == PluginKind::Device;
        if conn.archived || !archive {
            tracing::info!(connection = id, "connection closed, state discarded");
            return None;
        }

        let archived_id = format!("{id}{ARCHIVE_SEPARATOR}{}", Uuid::new_v4());
        for (plugin, state) in states {
            self.states.insert(state_key(&archived_id, &plugin), state);
        }
        tracing::info!(
            connection = id,
            archived = %archived_id,
            "connection closed, state archived"
        );
        self.insert_archived(archived_id.clone(), conn.info, conn.plugins);
        Some(archived_id)
    }

    fn insert_archived(
        &mut self,
        archived_id: String,
        info: ConnectionInfo,
        plugins: BTreeMap<String, Arc<LoadedPlugin>>,
    ) {
        let event = match info.kind {
            PluginKind::Device => HostEvent::RegisterDevice {
                id: archived_id.clone(),
                title: info.title.clone(),
                os: info.os.clone(),
                archived: true,
            },
            PluginKind::Client => HostEvent::NewClient {
                id: archived_id.clone(),
                title: info.title.clone(),
                plugins: plugins.keys().cloned().collect(),
                archived: true,
            },
        };
        self.events.emit(event);
        let info = ConnectionInfo {
            id: archived_id.clone(),
            ..info
        };
        self.connections.insert(
            archived_id,
            Connection {
                info,
                phase: ConnectionPhase::Active,
                archived: true,
                plugins,
            },
        );
    }

    // ─── Export / import ─────────────────────────────────────────────

    /// Serialise every plugin state of a connection with the plugin's codec.
    pub fn export_connection(&self, id: &str) -> Result<ExportedConnection, PluginError> {
        let conn = self
            .connections
            .get(id)
            .ok_or_else(|| PluginError::NotFound(format!("connection {id}")))?;

        let mut plugin_states = BTreeMap::new();
        for (plugin_id, plugin) in &conn.plugins {
            if let Some(state) = self.states.get(&state_key(id, plugin_id)) {
                plugin_states.insert(plugin_id.clone(), plugin.module.serialize_state(state)?);
            }
        }
        Ok(ExportedConnection {
            connection: conn.info.clone(),
            exported_at: Utc::now(),
            plugin_states,
        })
    }

    /// Rebuild an exported connection as an archived one.
    ///
    /// States of plugins that are not loaded here are skipped. A state that
    /// fails to deserialise aborts the import without side effects.
    pub fn import_connection(
        &mut self,
        exported: ExportedConnection,
    ) -> Result<String, PluginError> {
        let mut plugins = BTreeMap::new();
        let mut states = Vec::new();
        for (plugin_id, serialized) in &exported.plugin_states {
            let Some(plugin) = self.loader.get(plugin_id) else {
                tracing::warn!(plugin = %plugin_id, "skipping imported state of unknown plugin");
                continue;
            };
            states.push((plugin_id.clone(), plugin.module.deserialize_state(serialized)?));
            plugins.insert(plugin_id.clone(), plugin);
        }

        let base = exported
            .connection
            .id
            .split(ARCHIVE_SEPARATOR)
            .next()
            .unwrap_or_default();
        let archived_id = format!("{base}{ARCHIVE_SEPARATOR}{}", Uuid::new_v4());
        for (plugin, state) in states {
            self.states.insert(state_key(&archived_id, &plugin), state);
        }
        tracing::info!(
            connection = %archived_id,
            plugins = plugins.len(),
            "connection imported"
        );
        self.insert_archived(archived_id.clone(), exported.connection, plugins);
        Ok(archived_id)
    }

    // ─── Notifications ───────────────────────────────────────────────

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationCenter {
        &mut self.notifications
    }

    /// Mark every active notification as cleared.
    pub fn clear_notifications(&mut self) {
        self.notifications.clear_all();
        self.events.emit(HostEvent::NotificationsChanged);
    }

    /// Re-project notifications for every live plugin instance.
    pub fn refresh_notifications(&mut self) {
        for (id, conn) in &self.connections {
            if conn.archived {
                continue;
            }
            for (plugin_id, plugin) in &conn.plugins {
                if let Some(state) = self.states.get(&state_key(id, plugin_id)) {
                    self.notifications.set_active_notifications(
                        id,
                        plugin_id,
                        project(&plugin.module, state),
                    );
                }
            }
        }
        self.events.emit(HostEvent::NotificationsChanged);
    }

    // ─── Accessors ───────────────────────────────────────────────────

    pub fn persisted_state(&self, connection: &str, plugin: &str) -> Option<PersistedState> {
        self.states.get(&state_key(connection, plugin)).cloned()
    }

    /// Metrics of every plugin on a connection that projects any.
    pub fn metrics(&self, connection: &str) -> BTreeMap<String, Metrics> {
        let Some(conn) = self.connections.get(connection) else {
            return BTreeMap::new();
        };
        conn.plugins
            .iter()
            .filter(|(_, plugin)| plugin.module.has_metrics())
            .filter_map(|(plugin_id, plugin)| {
                self.states
                    .get(&state_key(connection, plugin_id))
                    .map(|state| (plugin_id.clone(), plugin.module.project_metrics(state)))
            })
            .collect()
    }

    pub fn connection(&self, id: &str) -> Option<&ConnectionInfo> {
        self.connections.get(id).map(|c| &c.info)
    }

    pub fn connection_phase(&self, id: &str) -> ConnectionPhase {
        self.connections
            .get(id)
            .map_or(ConnectionPhase::Disconnected, |c| c.phase)
    }

    pub fn is_archived(&self, id: &str) -> bool {
        self.connections.get(id).map_or(false, |c| c.archived)
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn active_plugins(&self, connection: &str) -> Vec<String> {
        self.connections
            .get(connection)
            .map(|c| c.plugins.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn eligible_plugins(&self) -> &[String] {
        &self.eligible
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            gatekeeped: self.report.gatekeeped.clone(),
            disabled: self.report.disabled.clone(),
            failed: self.loader.failed().to_vec(),
            unsupported: self.unsupported.clone(),
            reducer_faults: self.reducer_faults.iter().cloned().collect(),
            dropped_messages: self.dropped_messages,
        }
    }
}
