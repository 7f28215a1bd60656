//! Plugin modules: the executable side of a plugin.
//!
//! A module carries a default persisted state plus optional hooks. Missing
//! hooks are a normal shape, not an error: no reducer means messages leave the
//! state untouched, no projector means no notifications or metrics.
//!
//! Modules are built from typed closures through [`PluginModuleBuilder`] and
//! stored type-erased so the runtime can hold plugins with unrelated state
//! types side by side.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::PluginError;
use crate::notifications::Notification;
use crate::reducer::Reduction;
use crate::state::{PersistedState, PluginState};

/// Error type plugin hooks may return.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Named numeric metrics projected from a persisted state.
pub type Metrics = BTreeMap<String, f64>;

type ReduceHook = Arc<
    dyn Fn(&PersistedState, &str, &Value) -> Result<Option<PersistedState>, PluginError>
        + Send
        + Sync,
>;
type NotificationsHook = Arc<dyn Fn(&PersistedState) -> Vec<Notification> + Send + Sync>;
type MetricsHook = Arc<dyn Fn(&PersistedState) -> Metrics + Send + Sync>;
type SerializeHook = Arc<dyn Fn(&PersistedState) -> Result<String, PluginError> + Send + Sync>;
type DeserializeHook = Arc<dyn Fn(&str) -> Result<PersistedState, PluginError> + Send + Sync>;
type EqHook = Arc<dyn Fn(&PersistedState, &PersistedState) -> bool + Send + Sync>;

type TypedReducer<S> =
    Arc<dyn Fn(&S, &str, &Value) -> Result<Reduction<S>, HookError> + Send + Sync>;
type TypedNotifications<S> = Arc<dyn Fn(&S) -> Vec<Notification> + Send + Sync>;
type TypedMetrics<S> = Arc<dyn Fn(&S) -> Metrics + Send + Sync>;
type TypedSerialize<S> = Arc<dyn Fn(&S) -> Result<String, HookError> + Send + Sync>;
type TypedDeserialize<S> = Arc<dyn Fn(&str) -> Result<S, HookError> + Send + Sync>;

/// A resolved plugin: default state plus optional hooks.
#[derive(Clone)]
pub struct PluginModule {
    id: String,
    default_state: PersistedState,
    reducer: Option<ReduceHook>,
    notifications: Option<NotificationsHook>,
    metrics: Option<MetricsHook>,
    serialize: SerializeHook,
    deserialize: DeserializeHook,
    state_eq: EqHook,
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule")
            .field("id", &self.id)
            .field("state", &self.default_state.type_name())
            .field("reducer", &self.reducer.is_some())
            .field("notifications", &self.notifications.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl PluginModule {
    /// Start building a module whose persisted state is `S`.
    pub fn builder<S>(id: impl Into<String>, default_state: S) -> PluginModuleBuilder<S>
    where
        S: PluginState + PartialEq + Serialize + DeserializeOwned,
    {
        PluginModuleBuilder {
            id: id.into(),
            default_state,
            reducer: None,
            notifications: None,
            metrics: None,
            serialize: None,
            deserialize: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The state every new (plugin, connection) pair starts from.
    pub fn default_state(&self) -> PersistedState {
        self.default_state.clone()
    }

    pub fn has_reducer(&self) -> bool {
        self.reducer.is_some()
    }

    pub fn has_notifications(&self) -> bool {
        self.notifications.is_some()
    }

    pub fn has_metrics(&self) -> bool {
        self.metrics.is_some()
    }

    /// Run the reducer hook. `Ok(None)` means the state is unchanged.
    pub(crate) fn apply_reducer(
        &self,
        state: &PersistedState,
        method: &str,
        params: &Value,
    ) -> Result<Option<PersistedState>, PluginError> {
        match &self.reducer {
            Some(hook) => hook(state, method, params),
            None => Ok(None),
        }
    }

    pub fn project_notifications(&self, state: &PersistedState) -> Vec<Notification> {
        self.notifications
            .as_ref()
            .map(|hook| hook(state))
            .unwrap_or_default()
    }

    pub fn project_metrics(&self, state: &PersistedState) -> Metrics {
        self.metrics
            .as_ref()
            .map(|hook| hook(state))
            .unwrap_or_default()
    }

    pub fn serialize_state(&self, state: &PersistedState) -> Result<String, PluginError> {
        (self.serialize)(state)
    }

    pub fn deserialize_state(&self, serialized: &str) -> Result<PersistedState, PluginError> {
        (self.deserialize)(serialized)
    }

    /// Plugin-defined equality between two states.
    pub fn states_equal(&self, a: &PersistedState, b: &PersistedState) -> bool {
        a.ptr_eq(b) || (self.state_eq)(a, b)
    }
}

/// Typed builder for [`PluginModule`].
pub struct PluginModuleBuilder<S> {
    id: String,
    default_state: S,
    reducer: Option<TypedReducer<S>>,
    notifications: Option<TypedNotifications<S>>,
    metrics: Option<TypedMetrics<S>>,
    serialize: Option<TypedSerialize<S>>,
    deserialize: Option<TypedDeserialize<S>>,
}

impl<S> PluginModuleBuilder<S>
where
    S: PluginState + PartialEq + Serialize + DeserializeOwned,
{
    /// Fold `(state, method, params)` into the next state.
    pub fn reducer<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&S, &str, &Value) -> Result<Reduction<S>, HookError> + Send + Sync + 'static,
    {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    pub fn notifications<F>(mut self, projector: F) -> Self
    where
        F: Fn(&S) -> Vec<Notification> + Send + Sync + 'static,
    {
        self.notifications = Some(Arc::new(projector));
        self
    }

    pub fn metrics<F>(mut self, projector: F) -> Self
    where
        F: Fn(&S) -> Metrics + Send + Sync + 'static,
    {
        self.metrics = Some(Arc::new(projector));
        self
    }

    /// Replace the default JSON codec.
    pub fn codec<SF, DF>(mut self, serialize: SF, deserialize: DF) -> Self
    where
        SF: Fn(&S) -> Result<String, HookError> + Send + Sync + 'static,
        DF: Fn(&str) -> Result<S, HookError> + Send + Sync + 'static,
    {
        self.serialize = Some(Arc::new(serialize));
        self.deserialize = Some(Arc::new(deserialize));
        self
    }

    pub fn build(self) -> PluginModule {
        let id = self.id;

        let reducer = self.reducer.map(|hook| {
            let plugin = id.clone();
            let erased: ReduceHook = Arc::new(
                move |state: &PersistedState,
                      method: &str,
                      params: &Value|
                      -> Result<Option<PersistedState>, PluginError> {
                    let typed = state
                        .downcast_ref::<S>()
                        .ok_or_else(|| PluginError::StateType(plugin.clone()))?;
                    match hook(typed, method, params) {
                        Ok(Reduction::Unchanged) => Ok(None),
                        Ok(Reduction::Replaced(next)) => Ok(Some(PersistedState::new(next))),
                        Err(e) => Err(PluginError::Reducer {
                            plugin: plugin.clone(),
                            method: method.to_string(),
                            detail: e.to_string(),
                        }),
                    }
                },
            );
            erased
        });

        let notifications = self.notifications.map(|hook| {
            let plugin = id.clone();
            let erased: NotificationsHook =
                Arc::new(move |state: &PersistedState| -> Vec<Notification> {
                    match state.downcast_ref::<S>() {
                        Some(typed) => hook(typed),
                        None => {
                            tracing::warn!(
                                plugin = %plugin,
                                "notification projection skipped: state type mismatch"
                            );
                            Vec::new()
                        }
                    }
                });
            erased
        });

        let metrics = self.metrics.map(|hook| {
            let plugin = id.clone();
            let erased: MetricsHook = Arc::new(move |state: &PersistedState| -> Metrics {
                match state.downcast_ref::<S>() {
                    Some(typed) => hook(typed),
                    None => {
                        tracing::warn!(
                            plugin = %plugin,
                            "metrics projection skipped: state type mismatch"
                        );
                        Metrics::new()
                    }
                }
            });
            erased
        });

        let serialize: SerializeHook = {
            let plugin = id.clone();
            let custom = self.serialize;
            Arc::new(move |state: &PersistedState| -> Result<String, PluginError> {
                let typed = state
                    .downcast_ref::<S>()
                    .ok_or_else(|| PluginError::StateType(plugin.clone()))?;
                match &custom {
                    Some(hook) => hook(typed).map_err(|e| PluginError::StateCodec(e.to_string())),
                    None => Ok(serde_json::to_string(typed)?),
                }
            })
        };

        let deserialize: DeserializeHook = {
            let custom = self.deserialize;
            Arc::new(move |serialized: &str| -> Result<PersistedState, PluginError> {
                let typed: S = match &custom {
                    Some(hook) => {
                        hook(serialized).map_err(|e| PluginError::StateCodec(e.to_string()))?
                    }
                    None => serde_json::from_str(serialized)?,
                };
                Ok(PersistedState::new(typed))
            })
        };

        let state_eq: EqHook = Arc::new(|a: &PersistedState, b: &PersistedState| -> bool {
            match (a.downcast_ref::<S>(), b.downcast_ref::<S>()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        });

        PluginModule {
            default_state: PersistedState::new(self.default_state),
            id,
            reducer,
            notifications,
            metrics,
            serialize,
            deserialize,
            state_eq,
        }
    }
}
