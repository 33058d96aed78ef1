use super::*;
use fleetd_types::{DtcInfo, ExpressionNode, SignalSample};
use std::collections::BTreeMap;

fn store_with(samples: &[(u32, u64, f64)]) -> SignalHistoryStore {
    let mut windows: BTreeMap<u32, u64> = BTreeMap::new();
    for &(id, _, _) in samples {
        windows.insert(id, 10_000);
    }
    let mut store = SignalHistoryStore::new();
    store.reconcile(&windows, &BTreeMap::new(), 1_024);
    for &(id, t, v) in samples {
        assert!(store.append_sample(&SignalSample::new(id, t, v)));
    }
    store
}

fn ctx(store: &SignalHistoryStore, now_ms: u64, window_ms: u64) -> EvalContext<'_> {
    EvalContext {
        now_ms,
        window_ms,
        store,
    }
}

#[test]
fn arithmetic_and_comparison() {
    let store = store_with(&[(1, 100, 21.0)]);
    // signal(1) * 2 > 40
    let nodes = vec![
        ExpressionNode::Binary {
            op: BinaryOperator::Bigger,
            left: 1,
            right: 4,
        },
        ExpressionNode::Binary {
            op: BinaryOperator::Multiply,
            left: 2,
            right: 3,
        },
        ExpressionNode::Signal(1),
        ExpressionNode::Float(2.0),
        ExpressionNode::Float(40.0),
    ];
    let result = evaluate(&nodes, 0, &ctx(&store, 200, 1_000)).unwrap();
    assert_eq!(result, EvalValue::Bool(true));
}

#[test]
fn division_by_zero_is_an_error_value() {
    let store = store_with(&[]);
    let nodes = vec![
        ExpressionNode::Binary {
            op: BinaryOperator::Divide,
            left: 1,
            right: 2,
        },
        ExpressionNode::Float(1.0),
        ExpressionNode::Float(0.0),
    ];
    assert_eq!(
        evaluate(&nodes, 0, &ctx(&store, 0, 0)),
        Err(EvalError::DivisionByZero)
    );
}

#[test]
fn nan_comparisons_follow_ieee() {
    let store = store_with(&[]);
    let nodes = vec![
        ExpressionNode::Binary {
            op: BinaryOperator::Smaller,
            left: 1,
            right: 2,
        },
        ExpressionNode::Float(f64::NAN),
        ExpressionNode::Float(1.0),
    ];
    assert_eq!(
        evaluate(&nodes, 0, &ctx(&store, 0, 0)).unwrap(),
        EvalValue::Bool(false)
    );
}

#[test]
fn missing_signal_yields_no_data() {
    let store = store_with(&[]);
    let nodes = vec![ExpressionNode::Signal(99)];
    assert_eq!(
        evaluate(&nodes, 0, &ctx(&store, 0, 0)),
        Err(EvalError::NoData)
    );
}

#[test]
fn window_avg_over_empty_window_is_no_data() {
    // samples exist, but outside the queried window
    let store = store_with(&[(7, 100, 5.0)]);
    let nodes = vec![
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
    ];
    let context = ctx(&store, 5_000, 1_000);
    assert_eq!(evaluate(&nodes, 0, &context), Err(EvalError::NoData));
}

#[test]
fn window_functions_cover_current_and_previous_window() {
    // previous window [0, 1000): 1.0, 3.0 — current window [1000, 2000): 10.0, 20.0
    let store = store_with(&[(3, 100, 1.0), (3, 900, 3.0), (3, 1_100, 10.0), (3, 1_500, 20.0)]);
    let context = ctx(&store, 2_000, 1_000);

    let cases = [
        (WindowFunction::LastWindowMin, 10.0),
        (WindowFunction::LastWindowMax, 20.0),
        (WindowFunction::LastWindowAvg, 15.0),
        (WindowFunction::PrevLastWindowMin, 1.0),
        (WindowFunction::PrevLastWindowMax, 3.0),
        (WindowFunction::PrevLastWindowAvg, 2.0),
    ];
    for (function, expected) in cases {
        let nodes = vec![ExpressionNode::Window {
            signal_id: 3,
            function,
            window_ms: 1_000,
        }];
        assert_eq!(
            evaluate(&nodes, 0, &context).unwrap(),
            EvalValue::Double(expected),
            "{function:?}"
        );
    }
}

#[test]
fn logical_short_circuit_skips_erroring_operand() {
    let store = store_with(&[]);
    // false AND signal(1): the missing signal is never read
    let nodes = vec![
        ExpressionNode::Binary {
            op: BinaryOperator::And,
            left: 1,
            right: 2,
        },
        ExpressionNode::Bool(false),
        ExpressionNode::Signal(1),
    ];
    assert_eq!(
        evaluate(&nodes, 0, &ctx(&store, 0, 0)).unwrap(),
        EvalValue::Bool(false)
    );

    // true AND signal(1) must surface the error
    let nodes = vec![
        ExpressionNode::Binary {
            op: BinaryOperator::And,
            left: 1,
            right: 2,
        },
        ExpressionNode::Bool(true),
        ExpressionNode::Signal(1),
    ];
    assert_eq!(
        evaluate(&nodes, 0, &ctx(&store, 0, 0)),
        Err(EvalError::NoData)
    );
}

#[test]
fn type_mismatch_is_reported() {
    let store = store_with(&[]);
    // NOT of a double
    let nodes = vec![
        ExpressionNode::Unary {
            op: UnaryOperator::Not,
            operand: 1,
        },
        ExpressionNode::Float(1.0),
    ];
    assert_eq!(
        evaluate(&nodes, 0, &ctx(&store, 0, 0)),
        Err(EvalError::TypeMismatch)
    );
}

#[test]
fn geofence_inside_and_outside() {
    // latitude on signal 10, longitude on signal 11; vehicle ~157m away
    // from the fence center
    let store = store_with(&[(10, 100, 52.5200), (11, 100, 13.4050)]);
    let context = ctx(&store, 200, 1_000);

    let fence = |test, radius_meters| {
        vec![ExpressionNode::Geofence {
            test,
            latitude_signal: 10,
            longitude_signal: 11,
            latitude: 52.5214,
            longitude: 13.4050,
            radius_meters,
        }]
    };

    assert_eq!(
        evaluate(&fence(GeofenceTest::Inside, 500.0), 0, &context).unwrap(),
        EvalValue::Bool(true)
    );
    assert_eq!(
        evaluate(&fence(GeofenceTest::Inside, 50.0), 0, &context).unwrap(),
        EvalValue::Bool(false)
    );
    assert_eq!(
        evaluate(&fence(GeofenceTest::Outside, 50.0), 0, &context).unwrap(),
        EvalValue::Bool(true)
    );
}

#[test]
fn dtc_present_with_and_without_code() {
    let mut store = store_with(&[]);
    let nodes_any = vec![ExpressionNode::DtcPresent { code: None }];
    let nodes_named = vec![ExpressionNode::DtcPresent {
        code: Some("P0143".to_string()),
    }];

    // no snapshot yet: no data
    assert_eq!(
        evaluate(&nodes_any, 0, &ctx(&store, 0, 0)),
        Err(EvalError::NoData)
    );

    store.set_active_dtcs(DtcInfo {
        receive_time_ms: 10,
        active_codes: vec!["P0143".to_string()],
    });
    assert_eq!(
        evaluate(&nodes_any, 0, &ctx(&store, 20, 0)).unwrap(),
        EvalValue::Bool(true)
    );
    assert_eq!(
        evaluate(&nodes_named, 0, &ctx(&store, 20, 0)).unwrap(),
        EvalValue::Bool(true)
    );

    store.set_active_dtcs(DtcInfo {
        receive_time_ms: 30,
        active_codes: vec![],
    });
    assert_eq!(
        evaluate(&nodes_any, 0, &ctx(&store, 40, 0)).unwrap(),
        EvalValue::Bool(false)
    );
}

#[test]
fn malformed_child_index_is_invalid_not_panic() {
    let store = store_with(&[]);
    let nodes = vec![ExpressionNode::Unary {
        op: UnaryOperator::Not,
        operand: 5,
    }];
    assert_eq!(
        evaluate(&nodes, 0, &ctx(&store, 0, 0)),
        Err(EvalError::InvalidExpression)
    );

    // self-referencing node terminates via the depth guard
    let cyclic = vec![ExpressionNode::Unary {
        op: UnaryOperator::Not,
        operand: 0,
    }];
    assert_eq!(
        evaluate(&cyclic, 0, &ctx(&store, 0, 0)),
        Err(EvalError::InvalidExpression)
    );
}

#[test]
fn evaluation_is_repeatable() {
    let store = store_with(&[(1, 100, 50.0), (1, 200, 150.0)]);
    let nodes = vec![
        ExpressionNode::Binary {
            op: BinaryOperator::Bigger,
            left: 1,
            right: 2,
        },
        ExpressionNode::Signal(1),
        ExpressionNode::Float(100.0),
    ];
    let context = ctx(&store, 300, 1_000);
    let first = evaluate(&nodes, 0, &context);
    let second = evaluate(&nodes, 0, &context);
    assert_eq!(first, second);
    assert_eq!(first.unwrap(), EvalValue::Bool(true));
}
