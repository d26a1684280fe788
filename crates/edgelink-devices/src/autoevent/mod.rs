//! Periodic device reads.
//!
//! The manager owns one executor per (device, auto event) pair. Executors
//! never reference the manager; restarting a device cancels its executors
//! and spawns new ones from the current cache snapshot.

mod executor;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use edgelink_core::config::parse_duration;

use crate::dispatcher::CommandDispatcher;
use crate::publisher::PublishPool;

use executor::ExecutorHandle;

/// Starts, restarts and stops AutoEvent executors.
pub struct AutoEventManager {
    dispatcher: Arc<CommandDispatcher>,
    pool: PublishPool,
    executors: Mutex<HashMap<String, Vec<ExecutorHandle>>>,
    shutdown: CancellationToken,
}

impl AutoEventManager {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        pool: PublishPool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            pool,
            executors: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Starts executors for every cached device. Returns how many were started.
    pub fn start_auto_events(&self) -> usize {
        let names: Vec<String> = self
            .dispatcher
            .caches()
            .devices
            .all()
            .into_iter()
            .map(|d| d.name)
            .collect();
        let started: usize = names.iter().map(|n| self.restart_for_device(n)).sum();
        info!(executors = started, "AutoEvents started");
        started
    }

    /// Replaces the executors of `device_name`. Returns how many were started.
    ///
    /// Devices without a profile, locked devices and auto events with an
    /// invalid or zero interval get no executor.
    pub fn restart_for_device(&self, device_name: &str) -> usize {
        let mut executors = self.executors.lock();
        if let Some(old) = executors.remove(device_name) {
            old.iter().for_each(ExecutorHandle::stop);
        }

        let Some(device) = self.dispatcher.caches().devices.for_name(device_name) else {
            return 0;
        };
        if device.profile_name.is_empty() || device.is_locked() {
            return 0;
        }

        let mut handles = Vec::with_capacity(device.auto_events.len());
        for auto_event in &device.auto_events {
            let interval = match parse_duration(&auto_event.interval) {
                Ok(interval) if !interval.is_zero() => interval,
                Ok(_) => {
                    warn!(device = device_name, source = %auto_event.source_name, "AutoEvent interval is zero, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(device = device_name, source = %auto_event.source_name, error = %e, "Invalid AutoEvent interval, skipping");
                    continue;
                }
            };
            handles.push(executor::spawn(
                device.name.clone(),
                auto_event.clone(),
                interval,
                Arc::clone(&self.dispatcher),
                self.pool.clone(),
                self.shutdown.child_token(),
            ));
        }

        let started = handles.len();
        if started > 0 {
            executors.insert(device.name, handles);
        }
        started
    }

    /// Stops and forgets the executors of `device_name`.
    pub fn stop_for_device(&self, device_name: &str) {
        if let Some(handles) = self.executors.lock().remove(device_name) {
            for handle in &handles {
                info!(device = device_name, source = %handle.source, "Stopping AutoEvent");
                handle.stop();
            }
        }
    }

    pub fn stop_all(&self) {
        let mut executors = self.executors.lock();
        for handles in executors.values() {
            handles.iter().for_each(ExecutorHandle::stop);
        }
        executors.clear();
    }

    /// Number of running executors of `device_name`.
    pub fn executor_count(&self, device_name: &str) -> usize {
        self.executors
            .lock()
            .get(device_name)
            .map_or(0, Vec::len)
    }
}
