//! Probing of DOWN devices until they answer again.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use edgelink_core::models::OperatingState;

use crate::dispatcher::CommandDispatcher;

/// Sleeps `timeout`, then tries each readable resource of the device once.
///
/// A successful probe goes through the dispatcher's success path, which marks
/// the device UP. Returns once the device is UP, gone from the cache, or the
/// token is cancelled.
pub(crate) async fn run(
    dispatcher: &Arc<CommandDispatcher>,
    device_name: &str,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    info!(device = device_name, ?timeout, "Starting recovery poller");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(timeout) => {}
        }

        let caches = dispatcher.caches();
        let Some(device) = caches.devices.for_name(device_name) else {
            debug!(device = device_name, "Device removed, stopping recovery poller");
            return;
        };
        if device.operating_state == OperatingState::Up {
            return;
        }

        let resources: Vec<String> = caches
            .profiles
            .for_name(&device.profile_name)
            .map(|p| {
                p.device_resources
                    .into_iter()
                    .filter(|r| r.properties.read_write.readable())
                    .map(|r| r.name)
                    .collect()
            })
            .unwrap_or_default();

        for resource in &resources {
            match dispatcher.probe(device_name, resource).await {
                Ok(_) => {
                    info!(device = device_name, resource = %resource, "Recovery probe succeeded");
                    return;
                }
                Err(e) => {
                    debug!(device = device_name, resource = %resource, error = %e, "Recovery probe failed");
                }
            }
        }
    }
}
