use crate::condition::{ConditionId, ImageCapture};
use crate::expression::ExpressionTree;
use crate::signal::{ChannelId, FrameId, SignalId, Timestamp};
use serde::{Deserialize, Serialize};

/// The trigger predicate and emission policy a scheme asks for, in the form
/// scheme ingestion delivers it: expression still a tree, nothing resolved
/// against the manifest yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemeCondition {
    pub condition_id: ConditionId,
    pub expression: ExpressionTree,
    /// Base collection window; the compiler widens it to cover every window
    /// function the expression uses.
    pub capture_window_ms: u64,
    pub after_duration_ms: u64,
    pub min_publish_interval_ms: u64,
    pub priority: u32,
    pub include_active_dtcs: bool,
    pub trigger_only_on_rising_edge: bool,
    pub probability_to_send: f64,
    pub collect_signals: Vec<SignalId>,
    pub collect_frames: Vec<(ChannelId, FrameId)>,
    pub image_capture: Vec<ImageCapture>,
    pub persist_needed: bool,
    pub compression_needed: bool,
}

/// A declarative collection scheme as distributed by the cloud.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionScheme {
    pub scheme_id: String,
    /// The manifest generation this scheme was authored against. A scheme
    /// only survives while this matches the installed manifest.
    pub decoder_manifest_id: String,
    pub start_time_ms: Timestamp,
    pub expiry_time_ms: Timestamp,
    pub condition: SchemeCondition,
}

impl CollectionScheme {
    pub fn is_expired_at(&self, now_ms: Timestamp) -> bool {
        self.expiry_time_ms <= now_ms
    }
}

/// A full scheme list update, together with the bytes it was parsed from.
///
/// The bytes are persisted verbatim so a restart can replay the update
/// exactly as received; they are carried out of band of the wire format.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchemeList {
    pub schemes: Vec<CollectionScheme>,
    #[serde(skip)]
    pub source_bytes: Vec<u8>,
}
