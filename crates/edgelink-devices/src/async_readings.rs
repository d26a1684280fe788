//! Publication of values the driver pushes on its own.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use edgelink_core::models::Event;
use edgelink_core::{Error, Result};

use crate::cache::Caches;
use crate::codec::{self, EventOptions};
use crate::driver::AsyncValues;
use crate::publisher::PublishPool;

/// Builds the event for one batch of async values.
pub fn async_values_to_event(
    values: AsyncValues,
    caches: &Caches,
    data_transform: bool,
) -> Result<Event> {
    let device = caches
        .devices
        .for_name(&values.device_name)
        .ok_or_else(|| Error::not_found(format!("device {} not found", values.device_name)))?;
    if device.is_locked() {
        return Err(Error::locked(format!("device {} is locked", device.name)));
    }
    let source = if values.source_name.is_empty() {
        values
            .values
            .first()
            .map(|v| v.device_resource_name.clone())
            .unwrap_or_default()
    } else {
        values.source_name
    };
    codec::command_values_to_event(
        values.values,
        &device,
        &source,
        &caches.profiles,
        EventOptions::read(data_transform),
    )
}

/// Drains the async channel into the publish pool until cancelled.
pub async fn run_async_pump(
    mut rx: mpsc::Receiver<AsyncValues>,
    caches: Arc<Caches>,
    pool: PublishPool,
    data_transform: bool,
    shutdown: CancellationToken,
) {
    loop {
        let values = tokio::select! {
            _ = shutdown.cancelled() => break,
            values = rx.recv() => values,
        };
        let Some(values) = values else { break };
        if values.values.is_empty() {
            continue;
        }
        let device = values.device_name.clone();
        let event = match async_values_to_event(values, &caches, data_transform) {
            Ok(event) => event,
            Err(e) => {
                warn!(device = %device, error = %e, "Dropping async readings");
                continue;
            }
        };
        if let Err(e) = caches.devices.set_last_connected_by_name(&device) {
            debug!(device = %device, error = %e, "Failed to stamp last connected");
        }
        let correlation_id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = pool.submit(event, correlation_id).await {
            warn!(device = %device, error = %e, "Async readings pump stopped");
            break;
        }
    }
    debug!("Async readings pump stopped");
}
