//! Command dispatch through a started service: gates, resolution, transforms
//! and the UP/DOWN state machine.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use common::{config, device, metadata, profile_p1, start, MockDriver};
use edgelink_core::models::{
    AdminState, DeviceCommand, DeviceResource, OperatingState, ReadWrite, ResourceOperation,
    ResourceProperties,
};
use edgelink_core::{CommandValue, ErrorKind, Value, ValueType};
use edgelink_devices::driver::URL_RAW_QUERY;

#[tokio::test]
async fn test_get_resource_applies_transform() {
    let driver = MockDriver::new();
    driver.always_read(Value::Float32(217.0));
    let mut cfg = config();
    cfg.device.allowed_fails = 3;
    let h = start(cfg, driver, metadata().with_device(device("d1", "p1"))).await;

    let before = chrono::Utc::now().timestamp_millis();
    let event = h
        .service
        .dispatcher()
        .get_command("d1", "temp", "", false)
        .await
        .unwrap();

    assert_eq!(event.device_name, "d1");
    assert_eq!(event.profile_name, "p1");
    assert_eq!(event.source_name, "temp");
    assert_eq!(event.readings.len(), 1);
    assert_eq!(event.readings[0].value, "23.7");
    assert_eq!(event.readings[0].units, "C");
    assert_eq!(h.service.tracker().value("d1"), 3);
    assert!(h.service.caches().devices.last_connected("d1").unwrap() >= before);

    let gauges = h.service.metrics().gather_text().unwrap();
    assert!(gauges.contains("device_last_connected{device=\"d1\"}"));
}

#[tokio::test]
async fn test_set_command_maps_values() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_device(device("d2", "p2")),
    )
    .await;

    let params = HashMap::from([("mode".to_string(), json!("on"))]);
    let event = h
        .service
        .dispatcher()
        .set_command("d2", "mode", "", &params)
        .await
        .unwrap()
        .expect("RW command returns an event");

    let writes = h.driver.writes.lock().clone();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][0].device_resource_name, "mode");
    assert_eq!(writes[0][0].value, Value::String("1".to_string()));
    assert_eq!(event.readings[0].value, "1");
}

#[tokio::test(start_paused = true)]
async fn test_driver_failures_mark_device_down_until_recovered() {
    let driver = MockDriver::new();
    driver.always_read(Value::Float32(100.0));
    driver.set_fail_reads(true);
    let mut cfg = config();
    cfg.device.allowed_fails = 2;
    cfg.device.device_down_timeout = 1;
    let h = start(cfg, driver, metadata().with_device(device("d3", "p1"))).await;
    let dispatcher = h.service.dispatcher();

    for _ in 0..2 {
        let err = dispatcher.get_command("d3", "temp", "", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
    }
    assert_eq!(
        h.service.caches().devices.for_name("d3").unwrap().operating_state,
        OperatingState::Down
    );
    assert_eq!(
        h.metadata.operating_state_updates(),
        vec![("d3".to_string(), OperatingState::Down)]
    );
    assert!(dispatcher.is_recovering("d3"));

    let reads = h.driver.read_count();
    let err = dispatcher.get_command("d3", "temp", "", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceLocked);
    assert_eq!(h.driver.read_count(), reads);

    h.driver.set_fail_reads(false);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !dispatcher.is_recovering("d3") {
            break;
        }
    }
    assert_eq!(
        h.service.caches().devices.for_name("d3").unwrap().operating_state,
        OperatingState::Up
    );
    assert_eq!(
        h.metadata.operating_state_updates().last(),
        Some(&("d3".to_string(), OperatingState::Up))
    );

    dispatcher.get_command("d3", "temp", "", false).await.unwrap();
    assert_eq!(h.service.tracker().value("d3"), 2);
}

#[tokio::test]
async fn test_locked_gates_make_no_driver_call() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata()
            .with_device(device("locked", "p1").with_admin_state(AdminState::Locked))
            .with_device(device("down", "p1").with_operating_state(OperatingState::Down))
            .with_device(device("bare", "")),
    )
    .await;
    let dispatcher = h.service.dispatcher();

    for name in ["locked", "down", "bare"] {
        let err = dispatcher.get_command(name, "temp", "", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceLocked, "device {name}");
    }
    let err = dispatcher.get_command("ghost", "temp", "", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);
    let err = dispatcher.get_command("", "temp", "", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractInvalid);

    h.service.state().set_admin_state(AdminState::Locked);
    let err = dispatcher.get_command("ghost", "temp", "", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceLocked);

    assert_eq!(h.driver.read_count(), 0);
}

#[tokio::test]
async fn test_regex_reads_skip_write_only_resources() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_device(device("d1", "p1")),
    )
    .await;
    let dispatcher = h.service.dispatcher();

    let event = dispatcher.get_command("d1", ".*", "", true).await.unwrap();
    let mut names: Vec<_> = event.readings.iter().map(|r| r.resource_name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["humidity", "temp"]);

    let err = dispatcher.get_command("d1", "reset", "", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAllowed);
    let err = dispatcher.get_command("d1", "nothing.*", "", true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);
    let err = dispatcher.get_command("d1", "temp", "", false).await;
    assert!(err.is_ok());
}

#[tokio::test]
async fn test_raw_query_reaches_driver() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_device(device("d1", "p1")),
    )
    .await;

    h.service
        .dispatcher()
        .get_command("d1", "humidity", "channel=2", false)
        .await
        .unwrap();
    let requests = h.driver.read_requests.lock().clone();
    assert_eq!(requests[0][0].attributes[URL_RAW_QUERY], "channel=2");
}

#[tokio::test]
async fn test_set_rejects_read_only_and_missing_values() {
    let mut profile = profile_p1();
    profile.device_commands.push(
        DeviceCommand::new("all", ReadWrite::ReadWrite)
            .with_operation(ResourceOperation::new("temp"))
            .with_operation(ResourceOperation::new("reset")),
    );
    let h = start(
        config(),
        MockDriver::new(),
        common::metadata()
            .with_profile(profile)
            .with_device(device("d1", "p1")),
    )
    .await;
    let dispatcher = h.service.dispatcher();

    let params = HashMap::from([("humidity".to_string(), json!(10))]);
    let err = dispatcher.set_command("d1", "humidity", "", &params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAllowed);

    let params = HashMap::from([("reset".to_string(), json!(true))]);
    let err = dispatcher.set_command("d1", "all", "", &params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert!(h.driver.writes.lock().is_empty());
}

#[tokio::test]
async fn test_set_inverts_transform_and_write_only_returns_nothing() {
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_device(device("d1", "p1")),
    )
    .await;
    let dispatcher = h.service.dispatcher();

    let params = HashMap::from([("temp".to_string(), json!(23.7))]);
    dispatcher.set_command("d1", "temp", "", &params).await.unwrap();
    let written = h.driver.writes.lock()[0][0].clone();
    match written.value {
        Value::Float32(v) => assert!((v - 217.0).abs() < 0.01, "wrote {v}"),
        other => panic!("unexpected value {other:?}"),
    }

    let params = HashMap::from([("reset".to_string(), json!("true"))]);
    let event = dispatcher.set_command("d1", "reset", "", &params).await.unwrap();
    assert!(event.is_none());
}

#[tokio::test]
async fn test_max_cmd_ops_limit() {
    let resource = |name: &str| {
        DeviceResource::new(name, ResourceProperties::new(ValueType::Int8, ReadWrite::ReadWrite))
    };
    let mut profile = edgelink_core::models::DeviceProfile::new("p3")
        .with_resource(resource("a"))
        .with_resource(resource("b"))
        .with_resource(resource("c"));
    profile.device_commands.push(
        DeviceCommand::new("abc", ReadWrite::ReadWrite)
            .with_operation(ResourceOperation::new("a"))
            .with_operation(ResourceOperation::new("b"))
            .with_operation(ResourceOperation::new("c")),
    );
    let mut cfg = config();
    cfg.device.max_cmd_ops = 2;
    let h = start(
        cfg,
        MockDriver::new(),
        metadata().with_profile(profile).with_device(device("d1", "p3")),
    )
    .await;

    let params = HashMap::from([
        ("a".to_string(), json!(1)),
        ("b".to_string(), json!(2)),
        ("c".to_string(), json!(3)),
    ]);
    let err = h
        .service
        .dispatcher()
        .set_command("d1", "abc", "", &params)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
}

#[tokio::test]
async fn test_set_falls_back_to_default_values() {
    let mut props = ResourceProperties::new(ValueType::Int16, ReadWrite::ReadWrite);
    props.default_value = "7".to_string();
    let mut profile = edgelink_core::models::DeviceProfile::new("p4")
        .with_resource(DeviceResource::new("level", props))
        .with_resource(DeviceResource::new(
            "speed",
            ResourceProperties::new(ValueType::Int16, ReadWrite::ReadWrite),
        ));
    let mut op = ResourceOperation::new("speed");
    op.default_value = "3".to_string();
    profile.device_commands.push(
        DeviceCommand::new("both", ReadWrite::Write)
            .with_operation(ResourceOperation::new("level"))
            .with_operation(op),
    );
    let h = start(
        config(),
        MockDriver::new(),
        metadata().with_profile(profile).with_device(device("d1", "p4")),
    )
    .await;

    let event = h
        .service
        .dispatcher()
        .set_command("d1", "both", "", &HashMap::new())
        .await
        .unwrap();
    assert!(event.is_none());
    let written: Vec<CommandValue> = h.driver.writes.lock()[0].clone();
    assert_eq!(written[0].value, Value::Int16(7));
    assert_eq!(written[1].value, Value::Int16(3));
}
