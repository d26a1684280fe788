//! Provision watcher cache.

use std::collections::HashMap;

use parking_lot::RwLock;

use edgelink_core::models::{AdminState, ProvisionWatcher};
use edgelink_core::{edge_err, Error, Result};

/// Cached provision watchers keyed by name.
#[derive(Default)]
pub struct WatcherCache {
    watchers: RwLock<HashMap<String, ProvisionWatcher>>,
}

impl WatcherCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_name(&self, name: &str) -> Option<ProvisionWatcher> {
        self.watchers.read().get(name).cloned()
    }

    /// All watchers, ordered by name so matching is deterministic.
    pub fn all(&self) -> Vec<ProvisionWatcher> {
        let mut watchers: Vec<ProvisionWatcher> = self.watchers.read().values().cloned().collect();
        watchers.sort_by(|a, b| a.name.cmp(&b.name));
        watchers
    }

    pub fn add(&self, watcher: ProvisionWatcher) -> Result<()> {
        let mut watchers = self.watchers.write();
        if watchers.contains_key(&watcher.name) {
            return Err(Error::duplicate(format!(
                "provision watcher {} already exists in cache",
                watcher.name
            )));
        }
        watchers.insert(watcher.name.clone(), watcher);
        Ok(())
    }

    pub fn update(&self, watcher: ProvisionWatcher) -> Result<()> {
        let mut watchers = self.watchers.write();
        if !watchers.contains_key(&watcher.name) {
            return Err(not_found(&watcher.name));
        }
        watchers.insert(watcher.name.clone(), watcher);
        Ok(())
    }

    pub fn remove_by_name(&self, name: &str) -> Result<ProvisionWatcher> {
        self.watchers
            .write()
            .remove(name)
            .ok_or_else(|| not_found(name))
    }

    pub fn update_admin_state(&self, name: &str, state: &str) -> Result<()> {
        let state: AdminState = state.parse()?;
        let mut watchers = self.watchers.write();
        let watcher = watchers.get_mut(name).ok_or_else(|| not_found(name))?;
        watcher.admin_state = state;
        Ok(())
    }
}

fn not_found(name: &str) -> Error {
    edge_err!(EntityDoesNotExist, "provision watcher {} not found in cache", name)
}
