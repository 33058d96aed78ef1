//! Turns enabled schemes plus the current manifest into the inspection
//! matrix the worker runs against.

use fleetd_error::{Error, Result};
use fleetd_logger::warn;
use fleetd_types::{
    CollectionScheme, Condition, DecoderManifest, ExpressionNode, ExpressionTree,
    InspectionMatrix, SignalId,
};
use std::collections::{BTreeMap, BTreeSet};

/// Compiles `schemes` against `manifest`.
///
/// A scheme that fails to compile (unresolved signal, expression too deep,
/// wrong manifest generation) is dropped with a warning; the remaining
/// schemes still make it into the matrix.
pub fn build_inspection_matrix<'a>(
    schemes: impl IntoIterator<Item = &'a CollectionScheme>,
    manifest: &DecoderManifest,
    max_expression_depth: u32,
) -> InspectionMatrix {
    let mut matrix = InspectionMatrix::default();

    for scheme in schemes {
        match compile_scheme(scheme, manifest, max_expression_depth) {
            Ok(condition) => {
                let mut referenced: BTreeSet<SignalId> =
                    condition.collect_signals.iter().copied().collect();
                scheme.condition.expression.referenced_signals(&mut referenced);
                for signal_id in referenced {
                    let entry = matrix.signal_capture_windows_ms.entry(signal_id).or_insert(0);
                    *entry = (*entry).max(condition.capture_window_ms);
                }
                for &key in &condition.collect_frames {
                    let entry = matrix.frame_capture_windows_ms.entry(key).or_insert(0);
                    *entry = (*entry).max(condition.capture_window_ms);
                }
                matrix.conditions.push(condition);
            }
            Err(err) => {
                warn!("dropping scheme `{}`: {}", scheme.scheme_id, err);
            }
        }
    }

    matrix
}

fn compile_scheme(
    scheme: &CollectionScheme,
    manifest: &DecoderManifest,
    max_expression_depth: u32,
) -> Result<Condition> {
    if scheme.decoder_manifest_id != manifest.manifest_id {
        return Err(Error::invalid_schema(format!(
            "scheme was authored against manifest `{}`, installed is `{}`",
            scheme.decoder_manifest_id, manifest.manifest_id
        )));
    }

    let source = &scheme.condition;
    if source.expression.depth() > max_expression_depth {
        return Err(Error::ExpressionTooDeep {
            max_depth: max_expression_depth,
        });
    }

    let mut referenced = BTreeSet::new();
    source.expression.referenced_signals(&mut referenced);
    referenced.extend(source.collect_signals.iter().copied());
    for &signal_id in &referenced {
        if !manifest.resolves(signal_id) {
            return Err(Error::UnresolvedSignal {
                signal_id,
                manifest_id: manifest.manifest_id.clone(),
            });
        }
    }

    let mut nodes = Vec::new();
    let root = flatten(&source.expression, &mut nodes);

    // the window functions may need more history than the base window
    let capture_window_ms = source.capture_window_ms.max(source.expression.max_window_ms());

    Ok(Condition {
        condition_id: source.condition_id,
        scheme_id: scheme.scheme_id.clone(),
        decoder_manifest_id: scheme.decoder_manifest_id.clone(),
        nodes,
        root,
        capture_window_ms,
        after_duration_ms: source.after_duration_ms,
        min_publish_interval_ms: source.min_publish_interval_ms,
        priority: source.priority,
        include_active_dtcs: source.include_active_dtcs,
        trigger_only_on_rising_edge: source.trigger_only_on_rising_edge,
        probability_to_send: source.probability_to_send.clamp(0.0, 1.0),
        collect_signals: source.collect_signals.clone(),
        collect_frames: source.collect_frames.clone(),
        image_capture: source.image_capture.clone(),
        persist_needed: source.persist_needed,
        compression_needed: source.compression_needed,
    })
}

/// Pre-order flattening: every node lands before its children and records
/// their indices.
fn flatten(tree: &ExpressionTree, nodes: &mut Vec<ExpressionNode>) -> usize {
    let index = nodes.len();
    match tree {
        ExpressionTree::Float(value) => nodes.push(ExpressionNode::Float(*value)),
        ExpressionTree::Bool(value) => nodes.push(ExpressionNode::Bool(*value)),
        ExpressionTree::Signal(signal_id) => nodes.push(ExpressionNode::Signal(*signal_id)),
        ExpressionTree::Window {
            signal_id,
            function,
            window_ms,
        } => nodes.push(ExpressionNode::Window {
            signal_id: *signal_id,
            function: *function,
            window_ms: *window_ms,
        }),
        ExpressionTree::Geofence {
            test,
            latitude_signal,
            longitude_signal,
            latitude,
            longitude,
            radius_meters,
        } => nodes.push(ExpressionNode::Geofence {
            test: *test,
            latitude_signal: *latitude_signal,
            longitude_signal: *longitude_signal,
            latitude: *latitude,
            longitude: *longitude,
            radius_meters: *radius_meters,
        }),
        ExpressionTree::DtcPresent { code } => {
            nodes.push(ExpressionNode::DtcPresent { code: code.clone() })
        }
        ExpressionTree::Unary { op, operand } => {
            nodes.push(ExpressionNode::Unary {
                op: *op,
                operand: 0,
            });
            let operand = flatten(operand, nodes);
            if let ExpressionNode::Unary { operand: slot, .. } = &mut nodes[index] {
                *slot = operand;
            }
        }
        ExpressionTree::Binary { op, left, right } => {
            nodes.push(ExpressionNode::Binary {
                op: *op,
                left: 0,
                right: 0,
            });
            let left = flatten(left, nodes);
            let right = flatten(right, nodes);
            if let ExpressionNode::Binary {
                left: left_slot,
                right: right_slot,
                ..
            } = &mut nodes[index]
            {
                *left_slot = left;
                *right_slot = right;
            }
        }
    }
    index
}
