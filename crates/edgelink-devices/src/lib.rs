//! EdgeLink device-service runtime.
//!
//! This crate turns a [`ProtocolDriver`] into a complete device service.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `http` | ✅ | HTTP metadata client and http(s) provisioning sources |
//!
//! ## Architecture
//!
//! - **Caches**: device, profile and provision-watcher mirrors of metadata
//! - **CommandDispatcher**: gated GET/SET path to the driver, failure tracking,
//!   UP/DOWN transitions and recovery polling
//! - **AutoEventManager**: periodic reads with on-change filtering
//! - **Publisher** / **PublishPool**: bounded event publication on the bus
//! - **Reconciler**: applies metadata system events
//! - **DiscoveryManager** / **ProfileScanManager**: driver-backed discovery
//! - **DeviceService**: wiring and startup sequence

pub mod async_readings;
pub mod autoevent;
pub mod cache;
pub mod codec;
pub mod command_handler;
pub mod discovery;
pub mod dispatcher;
pub mod driver;
pub mod failure;
pub mod metadata;
pub mod metrics;
pub mod provision;
pub mod publisher;
pub mod reconciler;
mod recovery;
pub mod service;
pub mod state;
pub mod transform;

pub use autoevent::AutoEventManager;
pub use cache::{Caches, DeviceCache, ProfileCache, WatcherCache};
pub use command_handler::{CommandHandler, CommandOptions};
pub use discovery::{DiscoveryManager, ProfileScanManager};
pub use dispatcher::{CommandDispatcher, DispatchConfig};
pub use driver::{
    AsyncValues, CommandRequest, DiscoveredDevice, DiscoveryControl, DriverCapabilities,
    DriverSdk, ProfileScanner, ProtocolDriver,
};
pub use failure::FailureTracker;
#[cfg(feature = "http")]
pub use metadata::HttpMetadataClient;
pub use metadata::{InMemoryMetadata, MetadataClient};
pub use metrics::DeviceMetrics;
pub use provision::Provisioner;
pub use publisher::{PublishPool, Publisher};
pub use reconciler::Reconciler;
pub use service::DeviceService;
pub use state::ServiceState;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
