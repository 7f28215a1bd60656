//! Persisted state: the opaque, plugin-defined value owned by a
//! (plugin, connection) pair.
//!
//! The runtime never looks inside a state. It only clones the handle, hands
//! it back to the owning plugin, and compares handles by pointer to detect
//! change.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Bound every plugin state type satisfies.
pub trait PluginState: Any + Clone + fmt::Debug + Send + Sync {}

impl<T> PluginState for T where T: Any + Clone + fmt::Debug + Send + Sync {}

/// Immutable, cheaply clonable handle to a plugin's persisted state.
#[derive(Clone)]
pub struct PersistedState {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl PersistedState {
    pub fn new<S: PluginState>(state: S) -> Self {
        Self {
            value: Arc::new(state),
            type_name: std::any::type_name::<S>(),
        }
    }

    /// Borrow the state as its concrete type.
    pub fn downcast_ref<S: PluginState>(&self) -> Option<&S> {
        self.value.downcast_ref::<S>()
    }

    /// Whether both handles point at the same value.
    ///
    /// Reducers return the input handle when nothing changed, so this is the
    /// change-detection test.
    pub fn ptr_eq(&self, other: &PersistedState) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for PersistedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedState")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter(u32);

    #[test]
    fn test_downcast_to_concrete_type() {
        let state = PersistedState::new(Counter(3));
        assert_eq!(state.downcast_ref::<Counter>(), Some(&Counter(3)));
        assert!(state.downcast_ref::<String>().is_none());
        assert!(state.type_name().ends_with("Counter"));
    }

    #[test]
    fn test_clone_shares_value() {
        let state = PersistedState::new(Counter(1));
        let copy = state.clone();
        assert!(state.ptr_eq(&copy));

        let other = PersistedState::new(Counter(1));
        assert!(!state.ptr_eq(&other));
    }

    #[test]
    fn test_debug_shows_type() {
        let state = PersistedState::new(Counter(1));
        let debug = format!("{state:?}");
        assert!(debug.contains("PersistedState"));
        assert!(debug.contains("Counter"));
    }
}
