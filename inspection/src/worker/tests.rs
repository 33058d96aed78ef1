use super::*;
use fleetd_app_config::InspectionConfig;
use fleetd_channel::bounded;
use fleetd_types::{BinaryOperator, Condition, ExpressionNode};
use std::collections::BTreeMap;
use std::time::Instant;

fn test_config() -> InspectionConfig {
    InspectionConfig {
        idle_time_ms: 50,
        evaluate_interval_ms: 10,
        ..Default::default()
    }
}

struct Harness {
    controller: InspectionController,
    signal_tx: Sender<SignalSample>,
    can_tx: Sender<CanFrame>,
    dtc_tx: Sender<DtcInfo>,
    output_rx: Receiver<Arc<TriggeredCollectionSchemeData>>,
}

fn start_worker(output_capacity: usize) -> Harness {
    let (signal_tx, signal_rx) = bounded(1_024);
    let (can_tx, can_rx) = bounded(256);
    let (dtc_tx, dtc_rx) = bounded(16);
    let (output_tx, output_rx) = bounded(output_capacity);

    let controller = InspectionService::new(test_config())
        .input_queues(InputQueues {
            signals: signal_rx,
            can_frames: can_rx,
            active_dtcs: dtc_rx,
        })
        .output_queue(output_tx)
        .start()
        .expect("start worker");

    Harness {
        controller,
        signal_tx,
        can_tx,
        dtc_tx,
        output_rx,
    }
}

fn threshold_matrix(signal_id: u32, threshold: f64) -> Arc<InspectionMatrix> {
    let condition = Condition {
        condition_id: 1,
        scheme_id: "scheme-1".to_string(),
        decoder_manifest_id: "dm-1".to_string(),
        nodes: vec![
            ExpressionNode::Binary {
                op: BinaryOperator::Bigger,
                left: 1,
                right: 2,
            },
            ExpressionNode::Signal(signal_id),
            ExpressionNode::Float(threshold),
        ],
        root: 0,
        capture_window_ms: 60_000,
        after_duration_ms: 0,
        min_publish_interval_ms: 0,
        priority: 0,
        include_active_dtcs: false,
        trigger_only_on_rising_edge: true,
        probability_to_send: 1.0,
        collect_signals: vec![signal_id],
        collect_frames: Vec::new(),
        image_capture: Vec::new(),
        persist_needed: false,
        compression_needed: false,
    };
    let mut signal_windows = BTreeMap::new();
    signal_windows.insert(signal_id, 60_000u64);
    Arc::new(InspectionMatrix {
        conditions: vec![condition],
        signal_capture_windows_ms: signal_windows,
        frame_capture_windows_ms: BTreeMap::new(),
    })
}

#[test]
fn start_requires_all_queues() {
    let err = match InspectionService::new(test_config()).start() {
        Ok(_) => panic!("started without queues"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), fleetd_error::ErrorKind::NotConfigured);
}

#[test]
fn end_to_end_trigger_through_queues() {
    let harness = start_worker(16);
    harness
        .controller
        .handle()
        .on_matrix_changed(threshold_matrix(42, 100.0));

    // below threshold first, then the rising edge
    let start = unix_time_as_millis();
    harness
        .signal_tx
        .send(SignalSample::new(42, start, 50.0))
        .unwrap();
    harness
        .signal_tx
        .send(SignalSample::new(42, start + 20, 150.0))
        .unwrap();
    harness.controller.handle().notify_data_available();

    let payload = harness
        .output_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("worker publishes a payload");
    assert_eq!(payload.condition_id, 1);
    assert!(payload.signals.iter().any(|s| s.value == 150.0));

    harness.controller.stop();
}

#[test]
fn dtc_and_frames_reach_the_engine() {
    let harness = start_worker(16);

    // condition on the DTC snapshot: any active code triggers
    let condition = Condition {
        condition_id: 7,
        scheme_id: "scheme-dtc".to_string(),
        decoder_manifest_id: "dm-1".to_string(),
        nodes: vec![ExpressionNode::DtcPresent { code: None }],
        root: 0,
        capture_window_ms: 60_000,
        after_duration_ms: 0,
        min_publish_interval_ms: 0,
        priority: 0,
        include_active_dtcs: true,
        trigger_only_on_rising_edge: true,
        probability_to_send: 1.0,
        collect_signals: Vec::new(),
        collect_frames: vec![(0, 0x100)],
        image_capture: Vec::new(),
        persist_needed: false,
        compression_needed: false,
    };
    let mut frame_windows = BTreeMap::new();
    frame_windows.insert((0u32, 0x100u32), 60_000u64);
    harness
        .controller
        .handle()
        .on_matrix_changed(Arc::new(InspectionMatrix {
            conditions: vec![condition],
            signal_capture_windows_ms: BTreeMap::new(),
            frame_capture_windows_ms: frame_windows,
        }));

    let now = unix_time_as_millis();
    harness
        .can_tx
        .send(CanFrame::new(0, 0x100, now, &[1, 2, 3]))
        .unwrap();
    harness
        .dtc_tx
        .send(DtcInfo {
            receive_time_ms: now + 5,
            active_codes: vec!["P0456".to_string()],
        })
        .unwrap();
    harness.controller.handle().notify_data_available();

    let payload = harness
        .output_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("worker publishes a payload");
    assert_eq!(payload.condition_id, 7);
    assert!(payload.active_dtcs.as_ref().is_some_and(|d| d.has_code("P0456")));
    assert_eq!(payload.can_frames.len(), 1);
    assert_eq!(payload.can_frames[0].bytes(), &[1, 2, 3]);

    harness.controller.stop();
}

#[test]
fn stop_unblocks_an_idle_worker_promptly() {
    let harness = start_worker(16);
    // no matrix: the worker parks on its idle timeout
    let begin = Instant::now();
    harness.controller.stop();
    assert!(begin.elapsed() < Duration::from_secs(2));
}
