use crate::condition::{ConditionId, ImageCapture};
use crate::signal::{CanFrame, DtcInfo, SignalSample, Timestamp};
use serde::{Deserialize, Serialize};

/// One triggered collection, ready for the upstream transport.
///
/// `window_start_ms`/`window_end_ms` are the nominal collection window
/// `[trigger − capture + after, trigger + after]`; the start may be
/// negative when a condition triggers shortly after boot. The sample and
/// frame lists hold whatever the history store had inside that window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggeredCollectionSchemeData {
    pub scheme_id: String,
    pub decoder_manifest_id: String,
    pub condition_id: ConditionId,
    pub priority: u32,
    pub trigger_time_ms: Timestamp,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub signals: Vec<SignalSample>,
    pub can_frames: Vec<CanFrame>,
    /// Snapshot of active trouble codes, present iff the condition asked
    /// for them.
    pub active_dtcs: Option<DtcInfo>,
    pub image_capture: Vec<ImageCapture>,
    pub persist_needed: bool,
    pub compression_needed: bool,
}
