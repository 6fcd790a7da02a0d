use daq_core::experiment::document::Document;
use daq_core::{soft_signal_r, soft_signal_rw, BackendKind, Device, DocumentKind, ExitStatus, ValueType};
use daq_experiment::plans::{Count, LineScan};
use daq_experiment::recorder::DocumentRecorder;
use daq_experiment::run_engine::{EngineState, RunEngine};
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::test]
async fn test_run_uid_consistency() {
    let engine = Arc::new(RunEngine::new());
    let mut rx = engine.subscribe();

    let plan = Box::new(Count::new(1));
    let queued_uid = engine.queue(plan).await;

    // Start engine in background
    let engine_clone = engine.clone();
    tokio::spawn(async move {
        engine_clone.start().await.unwrap();
    });

    // Capture StartDoc
    let doc = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timeout waiting for doc")
        .expect("Receive error");

    if let Document::Start(start_doc) = doc {
        assert_eq!(
            start_doc.uid, queued_uid,
            "StartDoc UID should match queued UID"
        );
    } else {
        panic!("First document was not StartDoc");
    }
}

#[tokio::test]
async fn test_line_scan_moves_axis_and_reads_detector() {
    let stage = Device::builder("stage")
        .read("x", soft_signal_rw("", ValueType::Float))
        .build()
        .unwrap();
    let det = Device::builder("det")
        .read("value", soft_signal_r("", ValueType::Float))
        .config("exposure", soft_signal_rw("", ValueType::Float))
        .build()
        .unwrap();
    stage.connect_all(BackendKind::Sim).await.unwrap();
    det.connect_all(BackendKind::Sim).await.unwrap();

    let engine = RunEngine::new();
    let recorder = DocumentRecorder::attach(&engine);
    let axis = stage.signal("x").unwrap();
    let plan = LineScan::new(axis.clone(), 0.0, 2.0, 3).with_detector(det.clone());

    let summary = engine.run(Box::new(plan)).await.unwrap();
    assert_eq!(summary.exit_status, ExitStatus::Success);
    assert_eq!(axis.get_value().unwrap().as_f64(), Some(2.0));

    let docs = recorder.documents();
    let descriptors: Vec<_> = docs
        .iter()
        .filter_map(|d| match d {
            Document::Descriptor(desc) => Some(desc),
            _ => None,
        })
        .collect();
    assert_eq!(descriptors.len(), 1);
    assert!(descriptors[0].data_keys.contains_key("stage-x"));
    assert!(descriptors[0].data_keys.contains_key("det-value"));
    assert!(descriptors[0].configuration["det"].contains_key("det-exposure"));

    let seq_nums: Vec<u32> = docs
        .iter()
        .filter_map(|d| match d {
            Document::Event(event) => Some(event.seq_num),
            _ => None,
        })
        .collect();
    assert_eq!(seq_nums, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_pause_resume_abort() {
    let det = soft_signal_r("det", ValueType::Float);
    det.connect(BackendKind::Sim).await.unwrap();

    let engine = Arc::new(RunEngine::new());
    let recorder = DocumentRecorder::attach(&engine);
    let run_uid = engine
        .queue(Box::new(
            Count::new(1000).with_detector(det).with_delay(0.01).unwrap(),
        ))
        .await;

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.pause().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.state().await != EngineState::Paused {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine never paused");
    assert!(engine.last_checkpoint().await.is_some());
    assert_eq!(engine.current_run_uid().await, Some(run_uid));
    assert!(engine.current_progress().await.is_some_and(|n| n >= 1));

    engine.resume().await.unwrap();
    engine.abort("operator stop").await.unwrap();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.exit_status, ExitStatus::Abort);
    assert_eq!(summary.reason, "operator stop");
    assert_eq!(recorder.kinds().last(), Some(&DocumentKind::Stop));
    assert_eq!(engine.state().await, EngineState::Idle);
    assert_eq!(engine.current_run_uid().await, None);
    assert_eq!(engine.current_progress().await, None);
}
