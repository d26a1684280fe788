//! Bus-facing behaviour of a started service: AutoEvents, system events,
//! command requests, async readings and discovery.

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use common::{config, device, metadata, start, MockDriver, SERVICE};
use edgelink_core::messaging::Subscription;
use edgelink_core::models::{
    AddDeviceRequest, AddEventRequest, AdminState, AutoEvent, DeviceResource, EventResponse,
    ProfileScanRequest, ProvisionWatcher, ReadWrite, ResourceProperties, SystemEvent,
    SystemEventAction, SystemEventType,
};
use edgelink_core::{CommandValue, ErrorKind, MessageBus, MessageEnvelope, Value, ValueType};
use edgelink_devices::{AsyncValues, DiscoveredDevice};

fn drain(subscription: &mut Subscription) -> Vec<MessageEnvelope> {
    std::iter::from_fn(|| subscription.try_recv()).collect()
}

async fn next(subscription: &mut Subscription) -> MessageEnvelope {
    tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("message before timeout")
        .expect("subscription open")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

async fn publish_system_event<T: serde::Serialize>(
    h: &common::Harness,
    event_type: SystemEventType,
    action: SystemEventAction,
    details: &T,
) {
    let event = SystemEvent::new(event_type, action, "core-metadata", SERVICE, details).unwrap();
    let topic = h
        .service
        .topics()
        .system_event(event_type, &action.to_string(), SERVICE);
    h.bus
        .publish(&topic, MessageEnvelope::json(&event).unwrap())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_on_change_auto_event_publishes_once_for_steady_value() {
    let d1 = device("d1", "p1").with_auto_event(AutoEvent::new("temp", "100ms").on_change(0.0));
    let h = start(config(), MockDriver::new(), metadata().with_device(d1)).await;
    assert_eq!(h.service.autoevents().executor_count("d1"), 1);

    let mut events = h
        .bus
        .subscribe(&["edgex/events/device/#".to_string()])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1050)).await;

    let published = drain(&mut events);
    assert_eq!(published.len(), 1);
    assert!(h.driver.read_count() >= 9);
    let body: AddEventRequest = published[0].decode().unwrap();
    assert_eq!(body.event.device_name, "d1");
    assert_eq!(body.event.source_name, "temp");
    assert_eq!(
        published[0].received_topic,
        h.service.topics().event("p1", "d1", "temp")
    );
}

#[tokio::test(start_paused = true)]
async fn test_auto_event_without_on_change_publishes_every_tick() {
    let d1 = device("d1", "p1").with_auto_event(AutoEvent::new("humidity", "200ms"));
    let h = start(config(), MockDriver::new(), metadata().with_device(d1)).await;
    let mut events = h
        .bus
        .subscribe(&["edgex/events/device/#".to_string()])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert_eq!(drain(&mut events).len(), 5);

    h.service.autoevents().stop_for_device("d1");
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_device_add_system_event() {
    let mut cfg = config();
    cfg.device.allowed_fails = 3;
    let h = start(cfg, MockDriver::new(), metadata()).await;

    let added = device("new", "p1").with_auto_event(AutoEvent::new("temp", "1s"));
    let event = SystemEvent::new(
        SystemEventType::Device,
        SystemEventAction::Add,
        "core-metadata",
        SERVICE,
        &added,
    )
    .unwrap();
    let topic = h
        .service
        .topics()
        .system_event(SystemEventType::Device, "add", SERVICE);
    h.bus
        .publish(&topic, MessageEnvelope::json(&event).unwrap())
        .await
        .unwrap();

    let caches = h.service.caches().clone();
    wait_until(|| caches.devices.for_name("new").is_some()).await;
    wait_until(|| !h.driver.added.lock().is_empty()).await;
    assert_eq!(h.driver.added.lock().clone(), vec!["new".to_string()]);
    assert_eq!(h.service.tracker().value("new"), 3);
    assert_eq!(h.service.autoevents().executor_count("new"), 1);
}

#[tokio::test]
async fn test_device_update_and_delete_system_events() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_device(
            device("d1", "p1").with_auto_event(AutoEvent::new("temp", "1s")),
        ),
    )
    .await;
    let topics = h.service.topics().clone();
    let reconciler_input = |action: SystemEventAction, device: &edgelink_core::models::Device| {
        let event = SystemEvent::new(
            SystemEventType::Device,
            action,
            "core-metadata",
            SERVICE,
            device,
        )
        .unwrap();
        MessageEnvelope::json(&event).unwrap()
    };

    let locked = device("d1", "p1")
        .with_admin_state(AdminState::Locked)
        .with_auto_event(AutoEvent::new("temp", "1s"));
    h.bus
        .publish(
            &topics.system_event(SystemEventType::Device, "update", SERVICE),
            reconciler_input(SystemEventAction::Update, &locked),
        )
        .await
        .unwrap();
    let caches = h.service.caches().clone();
    wait_until(|| caches.devices.for_name("d1").is_some_and(|d| d.is_locked())).await;
    wait_until(|| h.service.autoevents().executor_count("d1") == 0).await;
    assert_eq!(h.driver.updated.lock().clone(), vec!["d1".to_string()]);

    h.bus
        .publish(
            &topics.system_event(SystemEventType::Device, "delete", SERVICE),
            reconciler_input(SystemEventAction::Delete, &locked),
        )
        .await
        .unwrap();
    wait_until(|| caches.devices.for_name("d1").is_none()).await;
    wait_until(|| !h.driver.removed.lock().is_empty()).await;
}

#[tokio::test]
async fn test_system_events_of_other_services_are_ignored() {
    let h = start(config(), MockDriver::new(), metadata()).await;
    let foreign = device("other", "p1").with_service("device-modbus");
    let event = SystemEvent::new(
        SystemEventType::Device,
        SystemEventAction::Add,
        "core-metadata",
        "device-modbus",
        &foreign,
    )
    .unwrap();
    h.bus
        .publish(
            &h.service
                .topics()
                .system_event(SystemEventType::Device, "add", "device-modbus"),
            MessageEnvelope::json(&event).unwrap(),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.service.caches().devices.for_name("other").is_none());
    assert!(h.driver.added.lock().is_empty());
}

#[tokio::test]
async fn test_service_lock_from_system_event() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_device(device("d1", "p1")),
    )
    .await;
    let mut info = h.service.state().info();
    info.admin_state = AdminState::Locked;
    let event = SystemEvent::new(
        SystemEventType::DeviceService,
        SystemEventAction::Update,
        "core-metadata",
        SERVICE,
        &info,
    )
    .unwrap();
    h.bus
        .publish(
            &h.service
                .topics()
                .system_event(SystemEventType::DeviceService, "update", SERVICE),
            MessageEnvelope::json(&event).unwrap(),
        )
        .await
        .unwrap();

    let state = h.service.state().clone();
    wait_until(|| state.is_locked()).await;
    let err = h
        .service
        .dispatcher()
        .get_command("d1", "temp", "", false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceLocked);
}

#[tokio::test]
async fn test_command_request_over_bus() {
    let driver = MockDriver::new();
    driver.always_read(Value::Float32(217.0));
    let h = start(
        config(),
        driver,
        metadata()
            .with_device(device("d1", "p1"))
            .with_device(device("d2", "p2")),
    )
    .await;
    let topics = h.service.topics().clone();

    let mut responses = h.bus.subscribe(&[topics.response("r1")]).await.unwrap();
    let mut events = h
        .bus
        .subscribe(&["edgex/events/device/#".to_string()])
        .await
        .unwrap();
    let request = MessageEnvelope::json(&json!({}))
        .unwrap()
        .with_request_id("r1")
        .with_correlation_id("c1")
        .with_query_param("ds-pushevent", "true");
    h.bus
        .publish(&topics.command_request("d1", "temp", "get"), request)
        .await
        .unwrap();

    let response = next(&mut responses).await;
    assert!(!response.is_error());
    assert_eq!(response.correlation_id, "c1");
    let body: EventResponse = response.decode().unwrap();
    assert_eq!(body.status_code, 200);
    assert_eq!(body.event.unwrap().readings[0].value, "23.7");
    let pushed: AddEventRequest = next(&mut events).await.decode().unwrap();
    assert_eq!(pushed.event.source_name, "temp");

    let mut responses = h.bus.subscribe(&[topics.response("r2")]).await.unwrap();
    let request = MessageEnvelope::json(&json!({"mode": "off"}))
        .unwrap()
        .with_request_id("r2");
    h.bus
        .publish(&topics.command_request("d2", "mode", "set"), request)
        .await
        .unwrap();
    assert!(!next(&mut responses).await.is_error());
    assert_eq!(
        h.driver.writes.lock()[0][0].value,
        Value::String("0".to_string())
    );

    let mut responses = h.bus.subscribe(&[topics.response("r3")]).await.unwrap();
    let request = MessageEnvelope::json(&json!({}))
        .unwrap()
        .with_request_id("r3");
    h.bus
        .publish(&topics.command_request("ghost", "temp", "get"), request)
        .await
        .unwrap();
    let response = next(&mut responses).await;
    assert!(response.is_error());
}

#[tokio::test]
async fn test_validate_device_over_bus() {
    let driver = MockDriver::new();
    driver.invalid_devices.lock().push("bad".to_string());
    let h = start(config(), driver, metadata()).await;
    let topics = h.service.topics().clone();

    for (name, request_id, rejected) in [("good", "v1", false), ("bad", "v2", true)] {
        let mut responses = h.bus.subscribe(&[topics.response(request_id)]).await.unwrap();
        let request = MessageEnvelope::json(&AddDeviceRequest::new(device(name, "p1")))
            .unwrap()
            .with_request_id(request_id);
        h.bus.publish(&topics.validate_device(), request).await.unwrap();
        assert_eq!(next(&mut responses).await.is_error(), rejected, "device {name}");
    }
}

#[tokio::test]
async fn test_async_readings_are_published() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_device(device("d1", "p1")),
    )
    .await;
    let mut events = h
        .bus
        .subscribe(&["edgex/events/device/#".to_string()])
        .await
        .unwrap();

    let sdk = h.driver.sdk().expect("driver initialized");
    sdk.push_values(AsyncValues {
        device_name: "d1".to_string(),
        source_name: String::new(),
        values: vec![CommandValue::new("humidity", Value::Int16(41))],
    })
    .await
    .unwrap();

    let body: AddEventRequest = next(&mut events).await.decode().unwrap();
    assert_eq!(body.event.source_name, "humidity");
    assert_eq!(body.event.readings[0].value, "41");
    assert!(h.service.caches().devices.last_connected("d1").unwrap() > 0);
}

#[tokio::test]
async fn test_discovery_adds_matching_devices_to_metadata() {
    let mut cfg = config();
    cfg.device.discovery.enabled = true;
    let watcher = ProvisionWatcher {
        service_name: SERVICE.to_string(),
        ..ProvisionWatcher::new("w1", "p1").with_identifier("address", "^10\\.0\\.")
    };
    let driver = MockDriver::new();
    *driver.discovery_results.lock() = vec![
        DiscoveredDevice::new("sensor-a")
            .with_protocol("tcp", HashMap::from([("address".to_string(), json!("10.0.0.5"))])),
        DiscoveredDevice::new("sensor-b")
            .with_protocol("tcp", HashMap::from([("address".to_string(), json!("192.168.1.9"))])),
    ];
    let h = start(cfg, driver, metadata().with_watcher(watcher)).await;

    let request_id = h.service.discovery().discover().unwrap();
    assert!(!request_id.is_empty());

    let metadata = h.metadata.clone();
    wait_until(|| !metadata.submitted_devices().is_empty()).await;
    wait_until(|| !h.service.discovery().is_busy()).await;
    let submitted = h.metadata.submitted_devices();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].name, "sensor-a");
    assert_eq!(submitted[0].profile_name, "p1");
    assert_eq!(submitted[0].service_name, SERVICE);

    let err = h
        .service
        .discovery()
        .stop_discovery(None, &HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
}

#[tokio::test]
async fn test_discovery_disabled_and_busy() {
    let h = start(config(), MockDriver::new(), metadata()).await;
    let err = h.service.discovery().discover().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);

    let mut cfg = config();
    cfg.device.discovery.enabled = true;
    let driver = MockDriver::new();
    let gate = driver.gate_discovery();
    let h = start(cfg, driver, metadata()).await;
    let discovery = h.service.discovery().clone();

    let first = discovery.discover().unwrap();
    assert!(discovery.is_busy());
    let err = discovery.discover().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StatusConflict);
    assert!(err.to_string().contains(&first));

    gate.notify_one();
    wait_until(|| !discovery.is_busy()).await;
    assert_eq!(h.driver.discover_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_discovery_unlocks_after_driver_panic() {
    let mut cfg = config();
    cfg.device.discovery.enabled = true;
    let driver = MockDriver::new();
    driver.panic_on_discover.store(true, Ordering::SeqCst);
    let h = start(cfg, driver, metadata()).await;
    let discovery = h.service.discovery().clone();

    discovery.discover().unwrap();
    wait_until(|| !discovery.is_busy()).await;

    h.driver.panic_on_discover.store(false, Ordering::SeqCst);
    discovery.discover().unwrap();
    wait_until(|| h.driver.discover_calls.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn test_profile_update_reaches_every_device_using_it() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata()
            .with_device(device("d1", "p1"))
            .with_device(device("d2", "p1"))
            .with_device(device("d3", "p2")),
    )
    .await;

    let updated = common::profile_p1().with_resource(DeviceResource::new(
        "pressure",
        ResourceProperties::new(ValueType::Float64, ReadWrite::Read),
    ));
    publish_system_event(&h, SystemEventType::Profile, SystemEventAction::Update, &updated).await;

    let caches = h.service.caches().clone();
    wait_until(|| caches.profiles.device_resource("p1", "pressure").is_some()).await;
    wait_until(|| h.driver.updated.lock().len() == 2).await;
    let mut names = h.driver.updated.lock().clone();
    names.sort();
    assert_eq!(names, vec!["d1".to_string(), "d2".to_string()]);
}

#[tokio::test]
async fn test_profile_delete_refused_while_in_use() {
    let watcher = ProvisionWatcher {
        service_name: SERVICE.to_string(),
        ..ProvisionWatcher::new("w1", "p2").with_identifier("address", ".*")
    };
    let h = start(
        config(),
        MockDriver::new(),
        metadata()
            .with_device(device("d1", "p1"))
            .with_watcher(watcher),
    )
    .await;
    let caches = h.service.caches().clone();
    assert!(caches.profiles.contains("p1"));
    assert!(caches.profiles.contains("p2"));

    let name_only = |name: &str| json!({ "name": name });
    publish_system_event(&h, SystemEventType::Profile, SystemEventAction::Delete, &name_only("p1"))
        .await;
    publish_system_event(&h, SystemEventType::Profile, SystemEventAction::Delete, &name_only("p2"))
        .await;

    wait_until(|| !caches.profiles.contains("p2")).await;
    assert!(caches.profiles.contains("p1"));
    assert!(caches.devices.for_name("d1").is_some());
}

#[tokio::test]
async fn test_watcher_system_events_update_cache() {
    let h = start(config(), MockDriver::new(), metadata()).await;
    let caches = h.service.caches().clone();
    let watcher = |pattern: &str| ProvisionWatcher {
        service_name: SERVICE.to_string(),
        ..ProvisionWatcher::new("w2", "p1").with_identifier("address", pattern)
    };

    publish_system_event(
        &h,
        SystemEventType::ProvisionWatcher,
        SystemEventAction::Add,
        &watcher("^a"),
    )
    .await;
    wait_until(|| caches.watchers.for_name("w2").is_some()).await;

    publish_system_event(
        &h,
        SystemEventType::ProvisionWatcher,
        SystemEventAction::Update,
        &watcher("^b"),
    )
    .await;
    wait_until(|| {
        caches
            .watchers
            .for_name("w2")
            .is_some_and(|w| w.identifiers["address"] == "^b")
    })
    .await;

    publish_system_event(
        &h,
        SystemEventType::ProvisionWatcher,
        SystemEventAction::Delete,
        &watcher("^b"),
    )
    .await;
    wait_until(|| caches.watchers.for_name("w2").is_none()).await;
}

#[tokio::test]
async fn test_device_moved_to_another_service_is_removed() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_device(
            device("d1", "p1").with_auto_event(AutoEvent::new("temp", "1s")),
        ),
    )
    .await;
    assert_eq!(h.service.autoevents().executor_count("d1"), 1);

    let moved = device("d1", "p1").with_service("device-modbus");
    publish_system_event(&h, SystemEventType::Device, SystemEventAction::Update, &moved).await;

    let caches = h.service.caches().clone();
    wait_until(|| caches.devices.for_name("d1").is_none()).await;
    wait_until(|| !h.driver.removed.lock().is_empty()).await;
    assert_eq!(h.driver.removed.lock().clone(), vec!["d1".to_string()]);
    assert!(h.driver.updated.lock().is_empty());
    assert_eq!(h.service.autoevents().executor_count("d1"), 0);
}

#[tokio::test]
async fn test_profile_scan_conflict_and_result() {
    let driver = MockDriver::with_extensions();
    *driver.scan_delay.lock() = Duration::from_millis(200);
    let h = start(
        config(),
        driver,
        metadata().with_device(device("d1", "p1")),
    )
    .await;
    let scans = h.service.profile_scans().clone();

    scans.profile_scan(ProfileScanRequest::new("d1")).unwrap();
    assert!(scans.is_scanning("d1"));
    let err = scans.profile_scan(ProfileScanRequest::new("d1")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StatusConflict);
    let err = scans
        .profile_scan(ProfileScanRequest::new("ghost"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);

    scans.stop_profile_scan("d1", &HashMap::new()).await.unwrap();
    wait_until(|| !scans.is_scanning("d1")).await;
    assert_eq!(h.driver.scanned.lock().clone(), vec!["d1".to_string()]);

    let err = scans
        .stop_profile_scan("d1", &HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);
}

#[tokio::test]
async fn test_shutdown_stops_auto_events() {
    let d1 = device("d1", "p1").with_auto_event(AutoEvent::new("temp", "50ms"));
    let h = start(config(), MockDriver::new(), metadata().with_device(d1)).await;
    h.service.shutdown(false).await.unwrap();
    assert_eq!(h.service.autoevents().executor_count("d1"), 0);

    let reads = h.driver.read_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.driver.read_count(), reads);
}
