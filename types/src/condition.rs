use crate::expression::ExpressionNode;
use crate::signal::{ChannelId, FrameId, SignalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies a condition within the schemes distributed to this vehicle.
pub type ConditionId = u32;

/// Metadata describing an image capture requested on trigger.
///
/// Capture itself is performed by a collaborator; the engine only carries
/// the request through into the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCapture {
    pub device_id: u32,
    pub image_type: u32,
    pub before_duration_ms: u64,
}

/// One compiled trigger predicate with its emission policy and collect
/// lists. Produced by the rule compiler from an enabled scheme.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub condition_id: ConditionId,
    pub scheme_id: String,
    pub decoder_manifest_id: String,
    /// Flat expression array; children referenced by index.
    pub nodes: Vec<ExpressionNode>,
    /// Index of the root node within `nodes`.
    pub root: usize,
    pub capture_window_ms: u64,
    pub after_duration_ms: u64,
    pub min_publish_interval_ms: u64,
    pub priority: u32,
    pub include_active_dtcs: bool,
    pub trigger_only_on_rising_edge: bool,
    /// Probability in `[0, 1]` that a trigger actually emits a payload.
    pub probability_to_send: f64,
    pub collect_signals: Vec<SignalId>,
    pub collect_frames: Vec<(ChannelId, FrameId)>,
    pub image_capture: Vec<ImageCapture>,
    pub persist_needed: bool,
    pub compression_needed: bool,
}

/// The compiled, immutable rule set driving the inspection worker.
///
/// Published as an `Arc` snapshot; a new generation always replaces the
/// whole matrix.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InspectionMatrix {
    pub conditions: Vec<Condition>,
    /// Largest capture window of any condition referencing each signal.
    /// Drives per-signal history buffer allocation.
    pub signal_capture_windows_ms: BTreeMap<SignalId, u64>,
    /// Same, for raw frame capture.
    pub frame_capture_windows_ms: BTreeMap<(ChannelId, FrameId), u64>,
}

impl InspectionMatrix {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
