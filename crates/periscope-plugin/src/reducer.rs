//! Persisted-state reduction.
//!
//! Folds one incoming message into a plugin's persisted state. The input state
//! is never mutated; an unchanged result is the very same handle, so callers
//! detect change with [`PersistedState::ptr_eq`]. A plugin reducer that
//! returns an error or panics is contained here and reported as
//! [`PluginError::Reducer`].

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PluginError;
use crate::module::PluginModule;
use crate::state::PersistedState;

/// What a typed reducer hook decided for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction<S> {
    /// Keep the current state (unknown methods land here).
    Unchanged,
    /// Replace the state with a new value.
    Replaced(S),
}

/// A message from a connected client or device, addressed to one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl IncomingMessage {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reducer panicked".to_string()
    }
}

/// Reduce `(state, method, params)` with the module's reducer.
///
/// Without a reducer the input handle is returned as is.
pub fn reduce(
    module: &PluginModule,
    state: &PersistedState,
    method: &str,
    params: &Value,
) -> Result<PersistedState, PluginError> {
    if !module.has_reducer() {
        return Ok(state.clone());
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        module.apply_reducer(state, method, params)
    }))
    .map_err(|payload| PluginError::Reducer {
        plugin: module.id().to_string(),
        method: method.to_string(),
        detail: panic_detail(payload.as_ref()),
    })?;

    Ok(outcome?.unwrap_or_else(|| state.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct Log {
        lines: Vec<String>,
    }

    fn log_module() -> PluginModule {
        PluginModule::builder("log", Log::default())
            .reducer(|state: &Log, method, params| match method {
                "line" => {
                    let mut next = state.clone();
                    next.lines.push(params["text"].as_str().unwrap_or_default().to_string());
                    Ok(Reduction::Replaced(next))
                }
                "fail" => Err("bad line".into()),
                "panic" => panic!("reducer exploded"),
                _ => Ok(Reduction::Unchanged),
            })
            .build()
    }

    #[test]
    fn test_no_reducer_returns_identical_state() {
        let module = PluginModule::builder("bare", Log::default()).build();
        let state = module.default_state();
        for (method, params) in [
            ("line", json!({"text": "a"})),
            ("anything", json!(null)),
            ("", json!([1, 2, 3])),
        ] {
            let next = reduce(&module, &state, method, &params).unwrap();
            assert!(next.ptr_eq(&state), "method {method:?} changed the state");
        }
    }

    #[test]
    fn test_reduce_replaces_without_mutating_input() {
        let module = log_module();
        let state = module.default_state();
        let next = reduce(&module, &state, "line", &json!({"text": "hello"})).unwrap();

        assert!(!next.ptr_eq(&state));
        assert_eq!(next.downcast_ref::<Log>().unwrap().lines, vec!["hello"]);
        assert!(state.downcast_ref::<Log>().unwrap().lines.is_empty());
    }

    #[test]
    fn test_unknown_method_is_unchanged() {
        let module = log_module();
        let state = module.default_state();
        let next = reduce(&module, &state, "unknownMethod", &json!({})).unwrap();
        assert!(next.ptr_eq(&state));
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let module = log_module();
        let state = module.default_state();
        let a = reduce(&module, &state, "line", &json!({"text": "x"})).unwrap();
        let b = reduce(&module, &state, "line", &json!({"text": "x"})).unwrap();
        assert!(module.states_equal(&a, &b));
    }

    #[test]
    fn test_reducer_error_is_reported() {
        let module = log_module();
        let state = module.default_state();
        let err = reduce(&module, &state, "fail", &json!({})).unwrap_err();
        match err {
            PluginError::Reducer {
                plugin,
                method,
                detail,
            } => {
                assert_eq!(plugin, "log");
                assert_eq!(method, "fail");
                assert_eq!(detail, "bad line");
            }
            other => panic!("expected Reducer error, got {other:?}"),
        }
    }

    #[test]
    fn test_reducer_panic_is_contained() {
        let module = log_module();
        let state = module.default_state();
        let err = reduce(&module, &state, "panic", &json!({})).unwrap_err();
        let contained = matches!(
            &err,
            PluginError::Reducer { detail, .. } if detail.contains("reducer exploded")
        );
        assert!(contained, "got {err:?}");
    }

    #[test]
    fn test_incoming_message_params_default_to_null() {
        let msg: IncomingMessage = serde_json::from_str(r#"{"method":"ping"}"#).unwrap();
        assert_eq!(msg, IncomingMessage::new("ping", Value::Null));
    }
}
