//! The assembled device service.
//!
//! [`DeviceService::new`] wires every component from a configuration, a
//! driver, a message bus and a metadata client. [`DeviceService::start`]
//! runs the startup sequence; [`DeviceService::shutdown`] tears it down.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use edgelink_core::messaging::Topics;
use edgelink_core::models::DeviceServiceInfo;
use edgelink_core::{Error, ErrorKind, MessageBus, Result, ServiceConfig};

use crate::async_readings;
use crate::autoevent::AutoEventManager;
use crate::cache::Caches;
use crate::command_handler::CommandHandler;
use crate::discovery::{DiscoveryManager, ProfileScanManager};
use crate::dispatcher::{CommandDispatcher, DispatchConfig};
use crate::driver::{AsyncValues, DiscoveredDevice, DriverCapabilities, DriverSdk, ProtocolDriver};
use crate::failure::FailureTracker;
use crate::metadata::MetadataClient;
use crate::metrics::DeviceMetrics;
use crate::provision::Provisioner;
use crate::publisher::{PublishPool, Publisher};
use crate::reconciler::Reconciler;
use crate::state::ServiceState;

/// Capacity of the discovered-device channel.
const DISCOVERED_CHANNEL_CAPACITY: usize = 16;
/// Pause between metadata probes at startup.
const PROBE_BACKOFF: Duration = Duration::from_secs(1);

struct Channels {
    async_rx: mpsc::Receiver<AsyncValues>,
    discovered_rx: mpsc::Receiver<Vec<DiscoveredDevice>>,
}

/// A running (or ready to run) device-service instance.
pub struct DeviceService {
    config: ServiceConfig,
    topics: Topics,
    caches: Arc<Caches>,
    metrics: DeviceMetrics,
    tracker: Arc<FailureTracker>,
    state: Arc<ServiceState>,
    driver: Arc<dyn ProtocolDriver>,
    bus: Arc<dyn MessageBus>,
    metadata: Arc<dyn MetadataClient>,
    dispatcher: Arc<CommandDispatcher>,
    publisher: Arc<Publisher>,
    pool: PublishPool,
    autoevents: Arc<AutoEventManager>,
    discovery: Arc<DiscoveryManager>,
    profile_scans: Arc<ProfileScanManager>,
    sdk: DriverSdk,
    channels: Mutex<Option<Channels>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl DeviceService {
    /// Builds the service. Must be called within a tokio runtime.
    pub fn new(
        config: ServiceConfig,
        driver: Arc<dyn ProtocolDriver>,
        bus: Arc<dyn MessageBus>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Result<Self> {
        config.validate()?;
        let instance = config.service.name.clone();
        let topics = Topics::new(
            config.message_bus.base_topic_prefix.clone(),
            instance.clone(),
            config.base_service_name(),
        );
        let shutdown = CancellationToken::new();

        let metrics = DeviceMetrics::new()?;
        let caches = Arc::new(Caches::new(Some(metrics.clone())));
        let tracker = Arc::new(FailureTracker::new());
        let state = Arc::new(ServiceState::new(DeviceServiceInfo::new(
            instance.clone(),
            format!("http://{}:{}", config.service.host, config.service.port),
        )));

        let dispatcher = Arc::new(CommandDispatcher::new(
            DispatchConfig::from_config(&config),
            caches.clone(),
            driver.clone(),
            tracker.clone(),
            metadata.clone(),
            state.clone(),
            shutdown.clone(),
        ));
        let publisher = Arc::new(Publisher::new(
            bus.clone(),
            topics.clone(),
            config.max_event_size,
        ));
        let pool = PublishPool::start(
            publisher.clone(),
            config.device.async_buffer_size,
            shutdown.clone(),
        );
        let autoevents = Arc::new(AutoEventManager::new(
            dispatcher.clone(),
            pool.clone(),
            shutdown.clone(),
        ));
        let discovery = Arc::new(DiscoveryManager::new(
            driver.clone(),
            caches.clone(),
            metadata.clone(),
            state.clone(),
            config.device.discovery.enabled,
        ));
        let profile_scans = Arc::new(ProfileScanManager::new(
            driver.clone(),
            caches.clone(),
            metadata.clone(),
        ));

        let (async_tx, async_rx) = mpsc::channel(config.device.async_buffer_size);
        let (discovered_tx, discovered_rx) = mpsc::channel(DISCOVERED_CHANNEL_CAPACITY);
        let sdk = DriverSdk::new(
            instance,
            async_tx,
            discovered_tx,
            config.driver.clone(),
            caches.clone(),
            metrics.clone(),
        );

        Ok(Self {
            config,
            topics,
            caches,
            metrics,
            tracker,
            state,
            driver,
            bus,
            metadata,
            dispatcher,
            publisher,
            pool,
            autoevents,
            discovery,
            profile_scans,
            sdk,
            channels: Mutex::new(Some(Channels {
                async_rx,
                discovered_rx,
            })),
            tasks: Mutex::new(Vec::new()),
            shutdown,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.service.name
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn caches(&self) -> &Arc<Caches> {
        &self.caches
    }

    pub fn metrics(&self) -> &DeviceMetrics {
        &self.metrics
    }

    pub fn tracker(&self) -> &Arc<FailureTracker> {
        &self.tracker
    }

    pub fn state(&self) -> &Arc<ServiceState> {
        &self.state
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn autoevents(&self) -> &Arc<AutoEventManager> {
        &self.autoevents
    }

    pub fn discovery(&self) -> &Arc<DiscoveryManager> {
        &self.discovery
    }

    pub fn profile_scans(&self) -> &Arc<ProfileScanManager> {
        &self.profile_scans
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::probe(self.driver.as_ref())
    }

    /// Runs the startup sequence. Any error is fatal to the service.
    pub async fn start(&self) -> Result<()> {
        let channels = self
            .channels
            .lock()
            .take()
            .ok_or_else(|| Error::conflict("device service already started"))?;
        info!(service = %self.name(), version = crate::VERSION, "Starting device service");

        self.wait_for_metadata().await?;
        self.load_service_entity().await?;
        self.seed_caches().await?;

        Provisioner::new(
            self.name(),
            self.config.device.allowed_fails,
            self.caches.clone(),
            self.metadata.clone(),
            self.tracker.clone(),
        )
        .run(&self.config.device)
        .await
        .map_err(|e| e.context("provisioning failed"))?;

        self.driver
            .initialize(self.sdk.clone())
            .await
            .map_err(|e| e.context("driver initialization failed"))?;
        let capabilities = self.capabilities();
        debug!(?capabilities, "Driver capabilities");

        self.spawn_background(channels).await?;
        self.autoevents.start_auto_events();

        self.driver
            .start()
            .await
            .map_err(|e| e.context("driver start failed"))?;
        info!(
            service = %self.name(),
            devices = self.caches.devices.len(),
            "Device service started"
        );
        Ok(())
    }

    /// Cancels every background task, then stops the driver.
    pub async fn shutdown(&self, force: bool) -> Result<()> {
        info!(service = %self.name(), force, "Stopping device service");
        self.shutdown.cancel();
        self.autoevents.stop_all();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        if force {
            tasks.iter().for_each(JoinHandle::abort);
        } else {
            for result in futures::future::join_all(tasks).await {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        warn!(error = %e, "Background task ended abnormally");
                    }
                }
            }
        }
        let stopped = self.driver.stop(force).await;
        if let Err(e) = self.bus.disconnect().await {
            warn!(error = %e, "Failed to disconnect from message bus");
        }
        stopped
    }

    async fn wait_for_metadata(&self) -> Result<()> {
        let timeout = self.config.request_timeout()?;
        let attempts = self.config.service.startup_retries.max(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, self.metadata.ping()).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    warn!(attempt, attempts, error = %e, "Metadata service not ready");
                }
                Err(_) => warn!(attempt, attempts, ?timeout, "Metadata service probe timed out"),
            }
            if attempt < attempts {
                tokio::time::sleep(PROBE_BACKOFF).await;
            }
        }
        Err(Error::unavailable(format!(
            "metadata service unavailable after {attempts} attempts"
        )))
    }

    async fn load_service_entity(&self) -> Result<()> {
        match self.metadata.device_service(self.name()).await {
            Ok(info) => {
                info!(admin_state = %info.admin_state, "Loaded device service entity");
                self.state.replace(info);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::EntityDoesNotExist => {
                info!(service = %self.name(), "Registering device service");
                self.metadata
                    .add_device_service(self.state.info())
                    .await
                    .map_err(|e| e.context("failed to register device service"))
            }
            Err(e) => Err(e.context("failed to load device service entity")),
        }
    }

    async fn seed_caches(&self) -> Result<()> {
        let devices = self.metadata.devices_for_service(self.name()).await?;
        for device in devices {
            self.ensure_profile(&device.profile_name).await?;
            let name = device.name.clone();
            match self.caches.devices.add(device) {
                Ok(()) => self.tracker.set(&name, self.config.device.allowed_fails),
                Err(e) => debug!(device = %name, error = %e, "Skipping device"),
            }
        }
        let watchers = self
            .metadata
            .watchers_for_service(self.config.base_service_name())
            .await?;
        for watcher in watchers {
            self.ensure_profile(&watcher.discovered_device.profile_name)
                .await?;
            if let Err(e) = self.caches.watchers.add(watcher) {
                debug!(error = %e, "Skipping provision watcher");
            }
        }
        Ok(())
    }

    async fn ensure_profile(&self, name: &str) -> Result<()> {
        if name.is_empty() || self.caches.profiles.contains(name) {
            return Ok(());
        }
        let profile = self
            .metadata
            .profile(name)
            .await
            .map_err(|e| e.context(format!("failed to load profile {name}")))?;
        self.caches.profiles.upsert(profile);
        Ok(())
    }

    async fn spawn_background(&self, channels: Channels) -> Result<()> {
        let mut tasks = Vec::new();

        let reconciler = Arc::new(Reconciler::new(
            self.name(),
            self.config.base_service_name(),
            self.config.device.allowed_fails,
            self.caches.clone(),
            self.driver.clone(),
            self.tracker.clone(),
            self.metadata.clone(),
            self.state.clone(),
            self.autoevents.clone(),
        ));
        tasks.push(
            reconciler
                .start(
                    self.bus.as_ref(),
                    &self.topics.system_event_patterns(),
                    self.shutdown.child_token(),
                )
                .await?,
        );

        let handler = Arc::new(CommandHandler::new(
            self.dispatcher.clone(),
            self.publisher.clone(),
            self.driver.clone(),
            self.topics.clone(),
        ));
        tasks.push(
            handler
                .start(self.bus.as_ref(), self.shutdown.child_token())
                .await?,
        );

        if self.config.device.enable_async_readings {
            tasks.push(tokio::spawn(async_readings::run_async_pump(
                channels.async_rx,
                self.caches.clone(),
                self.pool.clone(),
                self.config.device.data_transform,
                self.shutdown.child_token(),
            )));
        } else {
            debug!("Async readings disabled");
            drop(channels.async_rx);
        }

        tasks.push(tokio::spawn(
            self.discovery
                .clone()
                .consume(channels.discovered_rx, self.shutdown.child_token()),
        ));
        if self.config.device.discovery.enabled {
            if let Some(interval) = self.config.discovery_interval()? {
                info!(?interval, "Periodic discovery enabled");
                tasks.push(tokio::spawn(
                    self.discovery
                        .clone()
                        .run_periodic(interval, self.shutdown.child_token()),
                ));
            }
        }

        self.tasks.lock().extend(tasks);
        Ok(())
    }
}
