//! Activation helpers for progressive monitoring.

use std::collections::BTreeSet;

use super::{MonitorDecision, MonitorRegistry};

/// Result of applying a monitor decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationChange {
    /// The new active set, in registry order.
    pub new_active: Vec<String>,
    /// Monitors that just became active.
    pub newly_enabled: Vec<String>,
    /// Monitors that just became inactive.
    pub newly_disabled: Vec<String>,
    /// The decision's justification.
    pub reason: String,
}

/// Apply an enable/disable decision to the active set.
///
/// `new_active = (active ∪ enable) \ disable`, restricted to registered
/// monitors; unknown names are silently dropped. Newly-enabled monitors are
/// reset. The returned active set follows registry order.
pub fn apply_monitor_decision(
    registry: &mut MonitorRegistry,
    active_names: &[String],
    decision: &MonitorDecision,
) -> ActivationChange {
    let previous: BTreeSet<&String> = active_names.iter().collect();

    let enable: BTreeSet<&String> = decision
        .enable
        .iter()
        .filter(|name| registry.contains(name))
        .collect();
    let disable: BTreeSet<&String> = decision
        .disable
        .iter()
        .filter(|name| registry.contains(name))
        .collect();

    let new_active: Vec<String> = registry
        .names()
        .into_iter()
        .filter(|name| (previous.contains(name) || enable.contains(name)) && !disable.contains(name))
        .collect();

    let mut newly_enabled = Vec::new();
    let mut newly_disabled = Vec::new();
    for name in &new_active {
        if !previous.contains(name) {
            newly_enabled.push(name.clone());
        }
    }
    for name in active_names {
        if !new_active.contains(name) {
            newly_disabled.push(name.clone());
        }
    }

    for name in &newly_enabled {
        if let Some(monitor) = registry.get_mut(name) {
            monitor.reset();
        }
    }

    ActivationChange {
        new_active,
        newly_enabled,
        newly_disabled,
        reason: decision.reason.clone(),
    }
}
