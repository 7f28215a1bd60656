//! Eligibility filtering: narrows candidate plugins by disablement and
//! staged-rollout gates.
//!
//! Checks run in a fixed order (disabled first, gatekeeper second) so a
//! rejected plugin is reported once, under the first reason that excluded it.
//! Nothing here fails: rejections are recorded in an [`EligibilityReport`].

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::definition::PluginDefinition;

/// Evaluates staged-rollout tags.
pub trait Gatekeeper: Send + Sync {
    fn is_enabled(&self, tag: &str) -> bool;
}

impl<F> Gatekeeper for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_enabled(&self, tag: &str) -> bool {
        self(tag)
    }
}

/// Gatekeeper backed by a fixed set of passing tags.
#[derive(Debug, Clone, Default)]
pub struct StaticGatekeeper {
    passing: HashSet<String>,
}

impl StaticGatekeeper {
    pub fn new<I, S>(passing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            passing: passing.into_iter().map(Into::into).collect(),
        }
    }
}

impl Gatekeeper for StaticGatekeeper {
    fn is_enabled(&self, tag: &str) -> bool {
        self.passing.contains(tag)
    }
}

/// A plugin rejected by a staged-rollout check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatekeepedPluginRecord {
    pub name: String,
    pub reason: String,
}

/// Rejections collected while filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EligibilityReport {
    pub gatekeeped: Vec<GatekeepedPluginRecord>,
    pub disabled: Vec<String>,
}

impl EligibilityReport {
    pub fn is_empty(&self) -> bool {
        self.gatekeeped.is_empty() && self.disabled.is_empty()
    }
}

/// Keep the plugin unless its id is in the disabled set.
pub fn check_disabled(
    disabled: &BTreeSet<String>,
    def: &PluginDefinition,
    report: &mut EligibilityReport,
) -> bool {
    if disabled.contains(&def.id) {
        tracing::info!(plugin = %def.id, "plugin disabled by configuration");
        report.disabled.push(def.id.clone());
        return false;
    }
    true
}

/// Keep the plugin unless it carries a gatekeeper tag that evaluates false.
pub fn check_gatekeeper(
    gatekeeper: &dyn Gatekeeper,
    def: &PluginDefinition,
    report: &mut EligibilityReport,
) -> bool {
    let Some(tag) = def.gatekeeper.as_deref() else {
        return true;
    };
    if gatekeeper.is_enabled(tag) {
        return true;
    }
    tracing::info!(plugin = %def.id, gatekeeper = %tag, "plugin held back by gatekeeper");
    report.gatekeeped.push(GatekeepedPluginRecord {
        name: def.id.clone(),
        reason: format!("gatekeeper '{tag}' is not enabled"),
    });
    false
}

/// Disablement and staged-rollout filter chain.
pub struct EligibilityFilter<'a> {
    disabled: &'a BTreeSet<String>,
    gatekeeper: &'a dyn Gatekeeper,
}

impl<'a> EligibilityFilter<'a> {
    pub fn new(disabled: &'a BTreeSet<String>, gatekeeper: &'a dyn Gatekeeper) -> Self {
        Self {
            disabled,
            gatekeeper,
        }
    }

    /// Return the surviving subset, in input order.
    pub fn apply<'d, I>(
        &self,
        candidates: I,
        report: &mut EligibilityReport,
    ) -> Vec<&'d PluginDefinition>
    where
        I: IntoIterator<Item = &'d PluginDefinition>,
    {
        let mut eligible = Vec::new();
        for def in candidates {
            if !check_disabled(self.disabled, def, report) {
                continue;
            }
            if !check_gatekeeper(self.gatekeeper, def, report) {
                continue;
            }
            eligible.push(def);
        }
        eligible
    }
}
