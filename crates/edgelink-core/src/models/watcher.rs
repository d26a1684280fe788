//! Provision watchers: allow/deny rules for auto-created devices.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::device::{AdminState, AutoEvent};

/// Template for devices created when a watcher matches.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDeviceTemplate {
    pub profile_name: String,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub auto_events: Vec<AutoEvent>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

/// A provision watcher.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionWatcher {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Protocol property name to regular expression; all must match.
    #[serde(default)]
    pub identifiers: HashMap<String, String>,
    /// Protocol property name to literal values that veto a match.
    #[serde(default)]
    pub blocking_identifiers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub discovered_device: DiscoveredDeviceTemplate,
}

impl ProvisionWatcher {
    pub fn new(name: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discovered_device: DiscoveredDeviceTemplate {
                profile_name: profile_name.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_identifier(mut self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.identifiers.insert(key.into(), pattern.into());
        self
    }

    pub fn with_blocking(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.blocking_identifiers.insert(key.into(), values);
        self
    }
}
