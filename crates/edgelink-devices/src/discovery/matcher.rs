//! Matching discovered devices against provision watchers.

use regex::Regex;
use tracing::warn;

use edgelink_core::models::{Device, OperatingState, ProtocolProperties, Protocols, ProvisionWatcher};

use crate::driver::DiscoveredDevice;

fn property_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Whether one protocol sub-map satisfies every identifier pattern.
fn allowed(patterns: &[(&str, Regex)], properties: &ProtocolProperties) -> bool {
    patterns.iter().all(|(key, regex)| {
        properties
            .get(*key)
            .map(property_string)
            .is_some_and(|value| !value.is_empty() && regex.is_match(&value))
    })
}

fn blocked(watcher: &ProvisionWatcher, protocols: &Protocols) -> bool {
    watcher.blocking_identifiers.iter().any(|(key, literals)| {
        protocols.values().any(|properties| {
            properties
                .get(key)
                .map(property_string)
                .is_some_and(|value| literals.iter().any(|l| *l == value))
        })
    })
}

/// Whether `watcher` accepts a device with `protocols`.
///
/// Locked watchers accept nothing; an empty identifier map accepts any device
/// that is not blocked. Invalid identifier patterns are logged and make the
/// watcher reject.
pub fn matches(watcher: &ProvisionWatcher, protocols: &Protocols) -> bool {
    if watcher.admin_state.is_locked() {
        return false;
    }
    let mut patterns = Vec::with_capacity(watcher.identifiers.len());
    for (key, pattern) in &watcher.identifiers {
        match Regex::new(pattern) {
            Ok(regex) => patterns.push((key.as_str(), regex)),
            Err(e) => {
                warn!(watcher = %watcher.name, identifier = %key, error = %e, "Invalid identifier pattern");
                return false;
            }
        }
    }
    let accepted = patterns.is_empty() || protocols.values().any(|p| allowed(&patterns, p));
    accepted && !blocked(watcher, protocols)
}

/// First watcher accepting `device`.
pub fn find_watcher<'a>(
    watchers: &'a [ProvisionWatcher],
    device: &DiscoveredDevice,
) -> Option<&'a ProvisionWatcher> {
    watchers.iter().find(|w| matches(w, &device.protocols))
}

/// Device created from `watcher`'s template and the discovered attributes.
pub fn build_device(
    watcher: &ProvisionWatcher,
    discovered: &DiscoveredDevice,
    service_name: &str,
) -> Device {
    let template = &watcher.discovered_device;
    let mut properties = template.properties.clone();
    properties.extend(discovered.properties.clone());
    let mut labels = discovered.labels.clone();
    for label in &watcher.labels {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    Device {
        name: discovered.name.clone(),
        description: discovered.description.clone(),
        admin_state: template.admin_state,
        operating_state: OperatingState::Up,
        service_name: service_name.to_string(),
        profile_name: template.profile_name.clone(),
        protocols: discovered.protocols.clone(),
        labels,
        auto_events: template.auto_events.clone(),
        properties,
        ..Default::default()
    }
}
