//! Notifications derived from persisted state, and the center that tracks
//! which of them are active, invalidated, blacklisted or cleared.
//!
//! Notifications are never stored as source data. Plugins recompute them from
//! their persisted state on demand; the center only remembers dismissals
//! (keyed `pluginId#notificationId`) so a cleared notification stays hidden
//! across recomputation until a notification with a different id appears or
//! the cleared set is reset.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::module::PluginModule;
use crate::state::PersistedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A user-facing notice derived from a plugin's persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Milliseconds since the epoch, as reported by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Opaque payload handed back to the plugin when the user acts on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Notification {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            severity,
            category: None,
            timestamp: None,
            action: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Key used in the cleared set.
pub fn notification_key(plugin_id: &str, notification_id: &str) -> String {
    format!("{plugin_id}#{notification_id}")
}

/// Recompute a plugin's notifications from its persisted state.
///
/// Pure and safe to call redundantly. Plugins without a notifications hook
/// project nothing.
pub fn project(module: &PluginModule, state: &PersistedState) -> Vec<Notification> {
    module.project_notifications(state)
}

/// A notification attributed to the client and plugin that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginNotification {
    pub client: String,
    pub plugin_id: String,
    pub notification: Notification,
}

impl PluginNotification {
    pub fn key(&self) -> String {
        notification_key(&self.plugin_id, &self.notification.id)
    }
}

/// Tracks notification visibility across recomputations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationCenter {
    active: Vec<PluginNotification>,
    invalidated: Vec<PluginNotification>,
    blacklisted_plugins: Vec<String>,
    blacklisted_categories: Vec<String>,
    cleared: BTreeSet<String>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active notifications of one (client, plugin) pair.
    ///
    /// Cleared keys are filtered out. Previously active entries of the same
    /// pair that are no longer present move to the invalidated list.
    pub fn set_active_notifications(
        &mut self,
        client: &str,
        plugin_id: &str,
        notifications: Vec<Notification>,
    ) {
        let incoming: HashSet<&str> = notifications.iter().map(|n| n.id.as_str()).collect();

        let mut kept = Vec::with_capacity(self.active.len());
        for entry in self.active.drain(..) {
            if entry.client != client || entry.plugin_id != plugin_id {
                kept.push(entry);
            } else if !incoming.contains(entry.notification.id.as_str()) {
                self.invalidated.push(entry);
            }
        }

        self.invalidated.retain(|entry| {
            !(entry.client == client
                && entry.plugin_id == plugin_id
                && incoming.contains(entry.notification.id.as_str()))
        });

        for notification in notifications {
            if self
                .cleared
                .contains(&notification_key(plugin_id, &notification.id))
            {
                continue;
            }
            kept.push(PluginNotification {
                client: client.to_string(),
                plugin_id: plugin_id.to_string(),
                notification,
            });
        }

        self.active = kept;
    }

    /// Mark every active notification as cleared.
    ///
    /// The source data is left alone: a later notification with a new id
    /// still surfaces.
    pub fn clear_all(&mut self) {
        for entry in self.active.drain(..) {
            self.cleared.insert(entry.key());
        }
        self.invalidated.clear();
    }

    /// Forget every dismissal.
    pub fn reset_cleared(&mut self) {
        self.cleared.clear();
    }

    pub fn update_plugin_blacklist(&mut self, plugins: Vec<String>) {
        self.blacklisted_plugins = plugins;
    }

    pub fn update_category_blacklist(&mut self, categories: Vec<String>) {
        self.blacklisted_categories = categories;
    }

    pub fn active(&self) -> &[PluginNotification] {
        &self.active
    }

    pub fn invalidated(&self) -> &[PluginNotification] {
        &self.invalidated
    }

    pub fn cleared(&self) -> &BTreeSet<String> {
        &self.cleared
    }

    pub fn is_cleared(&self, plugin_id: &str, notification_id: &str) -> bool {
        self.cleared
            .contains(&notification_key(plugin_id, notification_id))
    }

    /// Active notifications minus blacklisted plugins and categories.
    pub fn visible(&self) -> Vec<&PluginNotification> {
        self.active
            .iter()
            .filter(|entry| !self.blacklisted_plugins.contains(&entry.plugin_id))
            .filter(|entry| {
                entry
                    .notification
                    .category
                    .as_ref()
                    .map_or(true, |c| !self.blacklisted_categories.contains(c))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Notification {
        Notification::new("id", "title", "message", Severity::Warning)
    }

    #[test]
    fn test_reduce_update_category_blacklist() {
        let mut center = NotificationCenter::new();
        center.update_category_blacklist(vec!["blacklistedCategory".into()]);

        let mut expected = NotificationCenter::new();
        expected.blacklisted_categories = vec!["blacklistedCategory".into()];
        assert_eq!(center, expected);
    }

    #[test]
    fn test_reduce_update_plugin_blacklist() {
        let mut center = NotificationCenter::new();
        center.update_plugin_blacklist(vec!["blacklistedPlugin".into()]);
        assert_eq!(center.blacklisted_plugins, vec!["blacklistedPlugin".to_string()]);
        assert!(center.active().is_empty());
    }

    #[test]
    fn test_set_active_notifications() {
        let mut center = NotificationCenter::new();
        center.set_active_notifications("client", "pluginId", vec![notification()]);

        assert_eq!(
            center.active(),
            &[PluginNotification {
                client: "client".into(),
                plugin_id: "pluginId".into(),
                notification: notification(),
            }]
        );
        assert!(center.invalidated().is_empty());
    }

    #[test]
    fn test_clear_all_notifications() {
        let mut center = NotificationCenter::new();
        center.set_active_notifications("client", "pluginId", vec![notification()]);
        center.clear_all();

        assert!(center.active().is_empty());
        assert!(center.invalidated().is_empty());
        let expected: BTreeSet<String> = ["pluginId#id".to_string()].into();
        assert_eq!(center.cleared(), &expected);
    }

    #[test]
    fn test_cleared_notification_does_not_reappear() {
        let mut center = NotificationCenter::new();
        center.set_active_notifications("client", "net", vec![notification()]);
        center.clear_all();
        center.set_active_notifications("client", "net", vec![notification()]);

        assert!(center.active().is_empty());
        assert!(center.visible().is_empty());
        assert!(center.is_cleared("net", "id"));
    }

    #[test]
    fn test_new_id_surfaces_after_clear_all() {
        let mut center = NotificationCenter::new();
        center.set_active_notifications("client", "net", vec![notification()]);
        center.clear_all();

        let fresh = Notification::new("id2", "title", "message", Severity::Error);
        center.set_active_notifications("client", "net", vec![notification(), fresh.clone()]);

        assert_eq!(center.active().len(), 1);
        assert_eq!(center.active()[0].notification, fresh);
    }

    #[test]
    fn test_reset_cleared_restores_visibility() {
        let mut center = NotificationCenter::new();
        center.set_active_notifications("client", "net", vec![notification()]);
        center.clear_all();
        center.reset_cleared();
        center.set_active_notifications("client", "net", vec![notification()]);
        assert_eq!(center.active().len(), 1);
    }

    #[test]
    fn test_vanished_notification_is_invalidated() {
        let mut center = NotificationCenter::new();
        center.set_active_notifications("client", "net", vec![notification()]);
        center.set_active_notifications("client", "net", vec![]);

        assert!(center.active().is_empty());
        assert_eq!(center.invalidated().len(), 1);
        assert_eq!(center.invalidated()[0].notification.id, "id");

        // coming back removes it from the invalidated list
        center.set_active_notifications("client", "net", vec![notification()]);
        assert_eq!(center.active().len(), 1);
        assert!(center.invalidated().is_empty());
    }

    #[test]
    fn test_other_pairs_untouched() {
        let mut center = NotificationCenter::new();
        center.set_active_notifications("a", "net", vec![notification()]);
        center.set_active_notifications("b", "net", vec![notification()]);
        center.set_active_notifications("a", "logs", vec![notification()]);
        center.set_active_notifications("a", "net", vec![]);

        let pairs: Vec<(&str, &str)> = center
            .active()
            .iter()
            .map(|n| (n.client.as_str(), n.plugin_id.as_str()))
            .collect();
        assert_eq!(pairs, vec![("b", "net"), ("a", "logs")]);
    }

    #[test]
    fn test_visible_respects_blacklists() {
        let mut center = NotificationCenter::new();
        center.set_active_notifications(
            "client",
            "net",
            vec![
                Notification::new("1", "t", "m", Severity::Error).with_category("HTTP500"),
                Notification::new("2", "t", "m", Severity::Error).with_category("HTTP404"),
            ],
        );
        center.set_active_notifications("client", "logs", vec![notification()]);

        center.update_category_blacklist(vec!["HTTP404".into()]);
        center.update_plugin_blacklist(vec!["logs".into()]);

        let visible: Vec<&str> = center
            .visible()
            .iter()
            .map(|n| n.notification.id.as_str())
            .collect();
        assert_eq!(visible, vec!["1"]);
        // blacklisting hides but does not clear
        assert_eq!(center.active().len(), 3);
    }

    #[test]
    fn test_notification_serialization_skips_empty_fields() {
        let json = serde_json::to_value(notification()).unwrap();
        assert_eq!(json["severity"], "warning");
        assert!(json.get("category").is_none());
        assert!(json.get("timestamp").is_none());
    }
}
