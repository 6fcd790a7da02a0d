//! End-to-end scenarios: device trees connected by a collector, driven with
//! the sim utilities, and read out by a run.

use futures::future::join_all;
use parking_lot::Mutex;
use sim_daq::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn sensor_mover() -> DaqResult<Device> {
    Device::builder("dev")
        .read("sensor", soft_signal_r("", ValueType::Float))
        .read("mover", soft_signal_rw("", ValueType::Float))
        .build()
}

fn field(dev: &Device, path: &str) -> Signal {
    dev.signal(path).unwrap_or_else(|| panic!("no field {path}"))
}

#[tokio::test]
async fn test_sensor_and_mover_scenario() {
    let dev = DeviceCollector::collect(ConnectConfig::sim(), |collector| {
        Ok(collector.register(sensor_mover()?))
    })
    .await
    .unwrap();
    let sensor = field(&dev, "sensor");
    let mover = field(&dev, "mover");

    set_sim_value(&sensor, 7.0).unwrap();
    assert_value(&sensor, 7.0);

    mover.write(3.0).unwrap();
    assert_value(&mover, 3.0);

    assert_reading(&dev, [("dev-sensor", 7.0), ("dev-mover", 3.0)]);

    let engine = RunEngine::new();
    let recorder = DocumentRecorder::attach(&engine);
    let summary = engine
        .run(Box::new(Count::new(2).with_detector(sensor.clone())))
        .await
        .unwrap();
    assert_eq!(summary.exit_status, ExitStatus::Success);
    assert_emitted(
        &recorder.documents(),
        &[
            (DocumentKind::Start, 1),
            (DocumentKind::Descriptor, 1),
            (DocumentKind::Event, 2),
            (DocumentKind::Stop, 1),
        ],
    );

    match recorder.documents().get(2) {
        Some(Document::Event(event)) => {
            assert_eq!(event.seq_num, 1);
            assert_eq!(event.data["dev-sensor"], SignalValue::Float(7.0));
        }
        other => panic!("expected first event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_callback_sees_every_write_in_order() {
    let dev = sensor_mover().unwrap();
    dev.connect_all(BackendKind::Sim).await.unwrap();
    let mover = field(&dev, "mover");

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    set_sim_callback(&mover, move |old, new| {
        sink.lock().push((old.clone(), new.clone()));
    })
    .unwrap();

    for value in [1.0, 2.0, 3.0] {
        mover.write(value).unwrap();
    }
    assert_eq!(
        *log.lock(),
        vec![
            (SignalValue::Float(0.0), SignalValue::Float(1.0)),
            (SignalValue::Float(1.0), SignalValue::Float(2.0)),
            (SignalValue::Float(2.0), SignalValue::Float(3.0)),
        ]
    );
}

#[tokio::test]
async fn test_forced_connect_failure_is_aggregated() {
    let mut collector = DeviceCollector::default();
    let dev = collector.register(sensor_mover().unwrap());
    let other = collector.register(SimDetector::new("det").unwrap().into_device());
    set_sim_connect_failure(&field(&dev, "sensor"), Some("no route to host")).unwrap();

    let err = collector.finish().await.unwrap_err();
    assert!(matches!(err, DaqError::Connection(_)));
    assert_eq!(err.failed_paths(), vec!["dev-sensor"]);
    assert!(err.to_string().contains("no route to host"));

    for device in [&dev, &other] {
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);
        assert!(device.walk().all(|(_, signal)| !signal.is_connected()));
    }
}

#[tokio::test]
async fn test_every_failure_is_named() {
    let devices: Vec<Device> = (0..3).map(|i| SimDetector::new(&format!("det{i}")).unwrap().into_device()).collect();
    set_sim_connect_failure(&field(&devices[0], "value"), Some("down")).unwrap();
    set_sim_connect_failure(&field(&devices[2], "exposure"), Some("down")).unwrap();

    let mut collector = DeviceCollector::default();
    for device in &devices {
        collector.register(device.clone());
    }
    let err = collector.finish().await.unwrap_err();
    assert_eq!(err.failed_paths(), vec!["det0-value", "det2-exposure"]);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let dev = sensor_mover().unwrap();
    assert_ok!(dev.connect_all(BackendKind::Sim).await);
    field(&dev, "mover").write(5.0).unwrap();

    let again = join_all([dev.connect_all(BackendKind::Sim), dev.connect_all(BackendKind::Sim)]).await;
    assert!(again.iter().all(Result::is_ok));
    assert_value(&field(&dev, "mover"), 5.0);
}

#[tokio::test]
async fn test_read_only_and_type_errors() {
    let dev = sensor_mover().unwrap();
    dev.connect_all(BackendKind::Sim).await.unwrap();
    let sensor = field(&dev, "sensor");

    let err = assert_err!(sensor.write(1.0));
    assert_eq!(
        err,
        DaqError::ReadOnly {
            signal: "dev-sensor".into()
        }
    );
    assert!(matches!(
        set_sim_value(&sensor, "high"),
        Err(DaqError::TypeMismatch { .. })
    ));
    // Unwritten signals read their type default.
    assert_value(&sensor, 0.0);
}

#[tokio::test]
async fn test_wait_for_coupled_value() {
    let motor = SimMotor::new("m").unwrap();
    motor.device().connect_all(BackendKind::Sim).await.unwrap();

    let mover = motor.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        mover.move_to(12.0).await
    });

    wait_for_value(
        motor.readback(),
        |v| *v == SignalValue::Float(12.0),
        Duration::from_secs(1),
    )
    .await
    .unwrap();
}

#[test]
fn test_collector_without_async_test_macro() {
    let dev = tokio_test::block_on(DeviceCollector::collect(ConnectConfig::sim(), |collector| {
        Ok(collector.register(sensor_mover()?))
    }))
    .unwrap();
    assert_eq!(dev.connection_state(), ConnectionState::Connected);
}
