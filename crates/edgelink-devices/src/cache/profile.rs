//! Profile cache with per-profile resource and command indexes.

use std::collections::HashMap;

use parking_lot::RwLock;
use regex::Regex;

use edgelink_core::models::{
    AdminState, DeviceCommand, DeviceProfile, DeviceResource, ResourceOperation,
};
use edgelink_core::{edge_err, Error, Result};

struct IndexedProfile {
    profile: DeviceProfile,
    resources: HashMap<String, usize>,
    commands: HashMap<String, usize>,
}

impl IndexedProfile {
    fn new(profile: DeviceProfile) -> Self {
        let resources = profile
            .device_resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        let commands = profile
            .device_commands
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            profile,
            resources,
            commands,
        }
    }

    fn resource(&self, name: &str) -> Option<&DeviceResource> {
        self.resources
            .get(name)
            .map(|&i| &self.profile.device_resources[i])
    }

    fn command(&self, name: &str) -> Option<&DeviceCommand> {
        self.commands
            .get(name)
            .map(|&i| &self.profile.device_commands[i])
    }
}

/// Cached profiles keyed by name.
#[derive(Default)]
pub struct ProfileCache {
    profiles: RwLock<HashMap<String, IndexedProfile>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_name(&self, name: &str) -> Option<DeviceProfile> {
        self.profiles.read().get(name).map(|p| p.profile.clone())
    }

    pub fn all(&self) -> Vec<DeviceProfile> {
        self.profiles
            .read()
            .values()
            .map(|p| p.profile.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.read().contains_key(name)
    }

    pub fn add(&self, profile: DeviceProfile) -> Result<()> {
        let mut profiles = self.profiles.write();
        if profiles.contains_key(&profile.name) {
            return Err(Error::duplicate(format!(
                "profile {} already exists in cache",
                profile.name
            )));
        }
        profiles.insert(profile.name.clone(), IndexedProfile::new(profile));
        Ok(())
    }

    pub fn update(&self, profile: DeviceProfile) -> Result<()> {
        let mut profiles = self.profiles.write();
        if !profiles.contains_key(&profile.name) {
            return Err(not_found(&profile.name));
        }
        profiles.insert(profile.name.clone(), IndexedProfile::new(profile));
        Ok(())
    }

    /// Adds the profile, or replaces it when already cached.
    pub fn upsert(&self, profile: DeviceProfile) {
        self.profiles
            .write()
            .insert(profile.name.clone(), IndexedProfile::new(profile));
    }

    /// Profiles carry no admin state of their own; this validates `state`
    /// and the profile's presence so every cache shares one contract.
    pub fn update_admin_state(&self, name: &str, state: &str) -> Result<()> {
        let _: AdminState = state.parse()?;
        if !self.contains(name) {
            return Err(not_found(name));
        }
        Ok(())
    }

    pub fn remove_by_name(&self, name: &str) -> Result<DeviceProfile> {
        self.profiles
            .write()
            .remove(name)
            .map(|p| p.profile)
            .ok_or_else(|| not_found(name))
    }

    pub fn device_resource(&self, profile: &str, name: &str) -> Option<DeviceResource> {
        self.profiles
            .read()
            .get(profile)
            .and_then(|p| p.resource(name))
            .cloned()
    }

    pub fn device_command(&self, profile: &str, name: &str) -> Option<DeviceCommand> {
        self.profiles
            .read()
            .get(profile)
            .and_then(|p| p.command(name))
            .cloned()
    }

    /// First resource operation, across all commands, targeting `resource`.
    pub fn resource_operation(&self, profile: &str, resource: &str) -> Option<ResourceOperation> {
        let profiles = self.profiles.read();
        let profile = profiles.get(profile)?;
        profile
            .profile
            .device_commands
            .iter()
            .flat_map(|c| c.resource_operations.iter())
            .find(|ro| ro.device_resource == resource)
            .cloned()
    }

    /// Resources whose whole name matches `pattern`.
    pub fn device_resources_by_regex(
        &self,
        profile: &str,
        pattern: &str,
    ) -> Result<Vec<DeviceResource>> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        let profiles = self.profiles.read();
        let profile = profiles.get(profile).ok_or_else(|| not_found(profile))?;
        Ok(profile
            .profile
            .device_resources
            .iter()
            .filter(|r| regex.is_match(&r.name))
            .cloned()
            .collect())
    }
}

fn not_found(name: &str) -> Error {
    edge_err!(EntityDoesNotExist, "profile {} not found in cache", name)
}
