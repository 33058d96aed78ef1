use super::*;
use fleetd_types::{BinaryOperator, ExpressionNode, WindowFunction};
use std::collections::BTreeMap;

const CEILING: usize = 4_096;

fn signal_above(signal_id: u32, threshold: f64) -> Vec<ExpressionNode> {
    vec![
        ExpressionNode::Binary {
            op: BinaryOperator::Bigger,
            left: 1,
            right: 2,
        },
        ExpressionNode::Signal(signal_id),
        ExpressionNode::Float(threshold),
    ]
}

fn always_true() -> Vec<ExpressionNode> {
    vec![ExpressionNode::Bool(true)]
}

struct ConditionSpec {
    condition_id: u32,
    nodes: Vec<ExpressionNode>,
    capture_window_ms: u64,
    after_duration_ms: u64,
    min_publish_interval_ms: u64,
    priority: u32,
    trigger_only_on_rising_edge: bool,
    probability_to_send: f64,
    collect_signals: Vec<u32>,
}

impl Default for ConditionSpec {
    fn default() -> Self {
        ConditionSpec {
            condition_id: 1,
            nodes: always_true(),
            capture_window_ms: 1_000,
            after_duration_ms: 0,
            min_publish_interval_ms: 0,
            priority: 0,
            trigger_only_on_rising_edge: false,
            probability_to_send: 1.0,
            collect_signals: Vec::new(),
        }
    }
}

fn make_condition(spec: ConditionSpec) -> Condition {
    Condition {
        condition_id: spec.condition_id,
        scheme_id: format!("scheme-{}", spec.condition_id),
        decoder_manifest_id: "dm-1".to_string(),
        nodes: spec.nodes,
        root: 0,
        capture_window_ms: spec.capture_window_ms,
        after_duration_ms: spec.after_duration_ms,
        min_publish_interval_ms: spec.min_publish_interval_ms,
        priority: spec.priority,
        include_active_dtcs: false,
        trigger_only_on_rising_edge: spec.trigger_only_on_rising_edge,
        probability_to_send: spec.probability_to_send,
        collect_signals: spec.collect_signals,
        collect_frames: Vec::new(),
        image_capture: Vec::new(),
        persist_needed: false,
        compression_needed: false,
    }
}

fn make_matrix(conditions: Vec<Condition>) -> Arc<InspectionMatrix> {
    let mut signal_windows: BTreeMap<u32, u64> = BTreeMap::new();
    for condition in &conditions {
        let mut referenced: Vec<u32> = condition.collect_signals.clone();
        for node in &condition.nodes {
            match node {
                ExpressionNode::Signal(id) => referenced.push(*id),
                ExpressionNode::Window { signal_id, .. } => referenced.push(*signal_id),
                _ => {}
            }
        }
        for id in referenced {
            let entry = signal_windows.entry(id).or_insert(0);
            *entry = (*entry).max(condition.capture_window_ms);
        }
    }
    Arc::new(InspectionMatrix {
        conditions,
        signal_capture_windows_ms: signal_windows,
        frame_capture_windows_ms: BTreeMap::new(),
    })
}

fn engine_with(conditions: Vec<Condition>, reduction_disabled: bool) -> CollectionInspectionEngine {
    let mut engine = CollectionInspectionEngine::new(CEILING, reduction_disabled);
    engine.install_matrix(make_matrix(conditions));
    engine
}

fn drain_one(engine: &mut CollectionInspectionEngine, now: u64) -> Option<Arc<TriggeredCollectionSchemeData>> {
    let (payload, _) = engine.collect_next_data_to_send(now);
    if let Some(payload) = &payload {
        engine.payload_accepted(payload.condition_id);
    }
    payload
}

#[test]
fn rising_edge_with_after_duration() {
    // S1: signal(42) > 100, 1s capture, 500ms after-duration, rising edge
    let mut engine = engine_with(
        vec![make_condition(ConditionSpec {
            condition_id: 9,
            nodes: signal_above(42, 100.0),
            capture_window_ms: 1_000,
            after_duration_ms: 500,
            trigger_only_on_rising_edge: true,
            collect_signals: vec![42],
            ..Default::default()
        })],
        false,
    );

    for (t, v) in [(0u64, 50.0), (200, 90.0), (400, 150.0), (600, 160.0)] {
        engine.add_signal(SignalSample::new(42, t, v));
    }
    engine.evaluate_conditions(400);
    engine.evaluate_conditions(600); // still true, suppressed by rising edge

    // nothing before the after-duration elapses
    let (payload, hint) = engine.collect_next_data_to_send(600);
    assert!(payload.is_none());
    assert_eq!(hint, Some(300));

    let payload = drain_one(&mut engine, 900).expect("payload sealed at 900");
    assert_eq!(payload.condition_id, 9);
    assert_eq!(payload.trigger_time_ms, 400);
    assert_eq!(payload.window_start_ms, -100);
    assert_eq!(payload.window_end_ms, 900);
    let times: Vec<u64> = payload.signals.iter().map(|s| s.receive_time_ms).collect();
    assert_eq!(times, vec![0, 200, 400, 600]);

    // the rising edge fired exactly once
    assert!(drain_one(&mut engine, 2_000).is_none());
}

#[test]
fn probability_zero_drops_everything_unless_reduction_disabled() {
    // S2
    let spec = || ConditionSpec {
        nodes: signal_above(42, 100.0),
        probability_to_send: 0.0,
        collect_signals: vec![42],
        ..Default::default()
    };

    let mut engine = engine_with(vec![make_condition(spec())], false);
    engine.add_signal(SignalSample::new(42, 100, 150.0));
    engine.evaluate_conditions(100);
    assert!(drain_one(&mut engine, 100).is_none());

    let mut engine = engine_with(vec![make_condition(spec())], true);
    engine.add_signal(SignalSample::new(42, 100, 150.0));
    engine.evaluate_conditions(100);
    assert!(drain_one(&mut engine, 100).is_some());
}

#[test]
fn simultaneous_triggers_ordered_by_priority_then_id() {
    // S5
    let mut engine = engine_with(
        vec![
            make_condition(ConditionSpec {
                condition_id: 1,
                priority: 5,
                min_publish_interval_ms: 1_000_000,
                ..Default::default()
            }),
            make_condition(ConditionSpec {
                condition_id: 2,
                priority: 10,
                min_publish_interval_ms: 1_000_000,
                ..Default::default()
            }),
            make_condition(ConditionSpec {
                condition_id: 3,
                priority: 10,
                min_publish_interval_ms: 1_000_000,
                ..Default::default()
            }),
        ],
        false,
    );

    engine.evaluate_conditions(1_000);
    let order: Vec<u32> = std::iter::from_fn(|| drain_one(&mut engine, 1_000))
        .map(|p| p.condition_id)
        .collect();
    assert_eq!(order, vec![2, 3, 1]);
}

#[test]
fn rising_edge_emits_only_on_false_to_true() {
    let mut engine = engine_with(
        vec![make_condition(ConditionSpec {
            nodes: signal_above(1, 10.0),
            trigger_only_on_rising_edge: true,
            ..Default::default()
        })],
        false,
    );

    let mut emitted = 0;
    for (t, v) in [(100u64, 5.0), (200, 20.0), (300, 25.0), (400, 5.0), (500, 30.0)] {
        engine.add_signal(SignalSample::new(1, t, v));
        engine.evaluate_conditions(t);
        if drain_one(&mut engine, t).is_some() {
            emitted += 1;
        }
    }
    // edges at t=200 and t=500 only
    assert_eq!(emitted, 2);
}

#[test]
fn min_publish_interval_spaces_emissions() {
    let mut engine = engine_with(
        vec![make_condition(ConditionSpec {
            min_publish_interval_ms: 1_000,
            ..Default::default()
        })],
        false,
    );

    let mut emissions = Vec::new();
    for t in [0u64, 400, 800, 1_000, 1_500, 2_000] {
        engine.evaluate_conditions(t);
        if let Some(payload) = drain_one(&mut engine, t) {
            emissions.push(payload.trigger_time_ms);
        }
    }
    assert_eq!(emissions, vec![0, 1_000, 2_000]);
}

#[test]
fn unsent_payload_is_retained_until_accepted_or_superseded() {
    let mut engine = engine_with(
        vec![make_condition(ConditionSpec {
            ..Default::default()
        })],
        false,
    );

    engine.evaluate_conditions(100);
    let (first, _) = engine.collect_next_data_to_send(100);
    let first = first.expect("sealed payload");
    // not accepted: the engine hands out the same payload again
    let (again, _) = engine.collect_next_data_to_send(150);
    assert_eq!(again.as_deref(), Some(&*first));

    // a re-trigger supersedes the retained payload
    engine.evaluate_conditions(400);
    let (superseded, _) = engine.collect_next_data_to_send(400);
    let superseded = superseded.expect("fresh payload");
    assert_eq!(superseded.trigger_time_ms, 400);

    engine.payload_accepted(superseded.condition_id);
    assert!(engine.collect_next_data_to_send(500).0.is_none());
}

#[test]
fn install_matrix_reconciles_buffers() {
    let mut engine = engine_with(
        vec![make_condition(ConditionSpec {
            nodes: signal_above(42, 100.0),
            collect_signals: vec![42],
            ..Default::default()
        })],
        false,
    );
    for t in 0..500u64 {
        engine.add_signal(SignalSample::new(42, t, 0.0));
    }
    assert!(engine.store().has_signal_buffer(42));

    // a matrix no longer referencing signal 42 frees its history
    engine.install_matrix(make_matrix(vec![make_condition(ConditionSpec {
        nodes: signal_above(7, 1.0),
        collect_signals: vec![7],
        ..Default::default()
    })]));
    assert!(!engine.store().has_signal_buffer(42));
    assert!(engine.store().has_signal_buffer(7));

    // an empty matrix inspects nothing
    engine.install_matrix(make_matrix(Vec::new()));
    engine.evaluate_conditions(1_000);
    assert!(engine.collect_next_data_to_send(1_000).0.is_none());
}

#[test]
fn no_data_condition_does_not_disturb_others() {
    // S6: an empty window yields no-data and never triggers; the healthy
    // condition next to it still fires
    let mut engine = engine_with(
        vec![
            make_condition(ConditionSpec {
                condition_id: 1,
                nodes: vec![
                    ExpressionNode::Binary {
                        op: BinaryOperator::Bigger,
                        left: 1,
                        right: 2,
                    },
                    ExpressionNode::Window {
                        signal_id: 7,
                        function: WindowFunction::LastWindowAvg,
                        window_ms: 1_000,
                    },
                    ExpressionNode::Float(0.0),
                ],
                ..Default::default()
            }),
            make_condition(ConditionSpec {
                condition_id: 2,
                ..Default::default()
            }),
        ],
        false,
    );

    engine.evaluate_conditions(500);
    let payload = drain_one(&mut engine, 500).expect("healthy condition fires");
    assert_eq!(payload.condition_id, 2);
    assert!(drain_one(&mut engine, 500).is_none());
}

#[test]
fn collected_dtcs_follow_the_condition_flag() {
    let mut with_dtcs = make_condition(ConditionSpec {
        condition_id: 1,
        ..Default::default()
    });
    with_dtcs.include_active_dtcs = true;
    let without_dtcs = make_condition(ConditionSpec {
        condition_id: 2,
        ..Default::default()
    });

    let mut engine = engine_with(vec![with_dtcs, without_dtcs], false);
    engine.set_active_dtcs(DtcInfo {
        receive_time_ms: 50,
        active_codes: vec!["P0123".to_string()],
    });
    engine.evaluate_conditions(100);

    let first = drain_one(&mut engine, 100).expect("payload");
    assert_eq!(first.condition_id, 1);
    assert!(first.active_dtcs.as_ref().is_some_and(|d| d.has_code("P0123")));

    let second = drain_one(&mut engine, 100).expect("payload");
    assert_eq!(second.condition_id, 2);
    assert!(second.active_dtcs.is_none());
}
