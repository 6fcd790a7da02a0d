//! Integration tests for the sim test utilities
//!
//! These tests drive simulated devices through a run and check both the
//! signal-level values and the emitted document stream.

use daq_core::experiment::document::Document;
use daq_core::{BackendKind, DeviceCollector, DocumentKind, ExitStatus};
use daq_experiment::{Count, DocumentRecorder, LineScan, Plan, PlanCommand, RunEngine};
use daq_sim::*;
use std::collections::{BTreeMap, HashMap};
use tracing_test::traced_test;

/// Plan replaying a fixed list of commands.
struct Scripted {
    commands: Vec<PlanCommand>,
    next: usize,
}

impl Plan for Scripted {
    fn plan_type(&self) -> &str {
        "scripted"
    }

    fn plan_name(&self) -> &str {
        "Scripted"
    }

    fn plan_args(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn movers(&self) -> Vec<String> {
        Vec::new()
    }

    fn detectors(&self) -> Vec<String> {
        Vec::new()
    }

    fn num_points(&self) -> usize {
        self.commands.len()
    }

    fn next_command(&mut self) -> Option<PlanCommand> {
        let cmd = self.commands.get(self.next).cloned();
        self.next += 1;
        cmd
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

#[tokio::test]
async fn test_count_run_with_sim_detector() {
    let mut collector = DeviceCollector::default();
    let det = SimDetector::new("det").unwrap();
    collector.register(det.device().clone());
    collector.finish().await.unwrap();
    det.set_value(3.5).unwrap();

    let engine = RunEngine::new();
    let recorder = DocumentRecorder::attach(&engine);
    let summary = engine
        .run(Box::new(Count::new(3).with_detector(det.clone())))
        .await
        .unwrap();
    assert_eq!(summary.exit_status, ExitStatus::Success);

    assert_emitted(
        &recorder.documents(),
        &[
            (DocumentKind::Start, 1),
            (DocumentKind::Descriptor, 1),
            (DocumentKind::Event, 3),
            (DocumentKind::Stop, 1),
        ],
    );
}

#[tokio::test]
async fn test_line_scan_with_sim_motor() {
    let mut collector = DeviceCollector::default();
    let motor = SimMotor::new("m").unwrap();
    let det = SimDetector::new("det").unwrap();
    collector.register(motor.device().clone());
    collector.register(det.device().clone());
    collector.finish().await.unwrap();

    // Detector reads back twice the motor position.
    let coupled = det.clone();
    set_sim_callback(motor.readback(), move |_old, new| {
        if let Some(pos) = new.as_f64() {
            let _ = coupled.set_value(pos * 2.0);
        }
    })
    .unwrap();

    let engine = RunEngine::new();
    let recorder = DocumentRecorder::attach(&engine);
    let plan = LineScan::new(motor.setpoint().clone(), 0.0, 4.0, 5).with_detector(det.clone());
    engine.run(Box::new(plan)).await.unwrap();

    assert_value(motor.readback(), 4.0);
    assert_reading(&det, [("det-value", 8.0)]);
    assert_emitted(
        &recorder.documents(),
        &[
            (DocumentKind::Start, 1),
            (DocumentKind::Descriptor, 1),
            (DocumentKind::Event, 5),
            (DocumentKind::Stop, 1),
        ],
    );
}

#[tokio::test]
async fn test_held_put_fails_run_on_timeout() {
    let short = daq_core::Signal::builder("gate", daq_core::ValueType::Float)
        .timeout(std::time::Duration::from_millis(20))
        .build()
        .unwrap();
    short.connect(BackendKind::Sim).await.unwrap();
    set_sim_put_proceeds(&short, false).unwrap();

    let engine = RunEngine::new();
    let recorder = DocumentRecorder::attach(&engine);
    let summary = engine
        .run(Box::new(LineScan::new(short, 0.0, 1.0, 2)))
        .await
        .unwrap();
    assert_eq!(summary.exit_status, ExitStatus::Fail);
    assert!(summary.reason.contains("Timed out"));
    assert_emitted(
        &recorder.documents(),
        &[(DocumentKind::Start, 1), (DocumentKind::Stop, 1)],
    );
}

#[tokio::test]
#[traced_test]
async fn test_unconnected_readback_logs_warning() {
    let motor = SimMotor::new("m").unwrap();
    motor.setpoint().connect(BackendKind::Sim).await.unwrap();

    motor.setpoint().write(1.0).unwrap();
    assert!(logs_contain("Readback did not follow setpoint"));
}

#[tokio::test]
async fn test_two_streams_get_own_descriptors_and_sequences() {
    let det = SimDetector::new("det").unwrap();
    det.device().connect_all(BackendKind::Sim).await.unwrap();

    let baseline = || {
        [
            PlanCommand::read(det.exposure().clone()),
            PlanCommand::EmitEvent {
                stream: "baseline".to_string(),
            },
        ]
    };
    let mut commands = baseline().to_vec();
    for i in 0..3 {
        commands.push(PlanCommand::Set {
            signal: det.exposure().clone(),
            value: (0.1 * f64::from(i + 1)).into(),
        });
        commands.push(PlanCommand::read(det.clone()));
        commands.push(PlanCommand::emit_primary());
    }
    commands.extend(baseline());

    let engine = RunEngine::new();
    let recorder = DocumentRecorder::attach(&engine);
    let summary = engine
        .run(Box::new(Scripted { commands, next: 0 }))
        .await
        .unwrap();
    assert_eq!(summary.exit_status, ExitStatus::Success);
    assert_eq!(summary.num_events.get("baseline"), Some(&2));
    assert_eq!(summary.num_events.get("primary"), Some(&3));

    let docs = recorder.documents();
    check_emitted(
        &docs,
        &[
            (DocumentKind::Start, 1),
            (DocumentKind::Descriptor, 2),
            (DocumentKind::Event, 5),
            (DocumentKind::Stop, 1),
        ],
    )
    .unwrap();

    let mut streams = HashMap::new();
    let mut seq_nums: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for doc in &docs {
        match doc {
            Document::Descriptor(desc) => {
                streams.insert(desc.uid.clone(), desc.name.clone());
            }
            Document::Event(event) => seq_nums
                .entry(streams[&event.descriptor_uid].clone())
                .or_default()
                .push(event.seq_num),
            _ => {}
        }
    }
    assert_eq!(seq_nums["baseline"], vec![1, 2]);
    assert_eq!(seq_nums["primary"], vec![1, 2, 3]);
}
