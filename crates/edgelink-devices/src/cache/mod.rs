//! In-memory mirrors of the metadata entities.
//!
//! Each cache is linearizable on its own and hands out clones, so no lock is
//! ever held by a caller across I/O.

pub mod device;
pub mod profile;
pub mod watcher;

pub use device::DeviceCache;
pub use profile::ProfileCache;
pub use watcher::WatcherCache;

use edgelink_core::{Error, Result};

use crate::metrics::DeviceMetrics;

/// The three caches of a service instance.
pub struct Caches {
    pub devices: DeviceCache,
    pub profiles: ProfileCache,
    pub watchers: WatcherCache,
}

impl Caches {
    pub fn new(metrics: Option<DeviceMetrics>) -> Self {
        Self {
            devices: DeviceCache::new(metrics),
            profiles: ProfileCache::new(),
            watchers: WatcherCache::new(),
        }
    }

    /// Fails with `StatusConflict` when any cached device references `profile`.
    pub fn check_profile_not_used(&self, profile: &str) -> Result<()> {
        let users = self.devices.names_for_profile(profile);
        if users.is_empty() {
            Ok(())
        } else {
            Err(Error::conflict(format!(
                "profile {profile} is in use by devices {}",
                users.join(", ")
            )))
        }
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new(None)
    }
}
