use crate::signal::{ChannelId, FrameId, SignalId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How to extract one signal out of a CAN frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalDecoderMethod {
    pub signal_id: SignalId,
    pub channel_id: ChannelId,
    pub frame_id: FrameId,
    pub start_bit: u16,
    pub length_bits: u16,
    pub factor: f64,
    pub offset: f64,
    pub is_big_endian: bool,
    pub is_signed: bool,
}

/// Layout of one CAN message, restricted to the signals of interest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CanMessageFormat {
    pub frame_id: FrameId,
    pub size_bytes: u8,
    pub signals: Vec<SignalDecoderMethod>,
}

/// Whether a frame is wanted decoded, raw, or both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanCollectType {
    Decode,
    Raw,
    RawAndDecode,
}

/// Decoder rule for one (channel, frame) pair in the published dictionary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanMessageDecoderMethod {
    pub collect_type: CanCollectType,
    pub format: CanMessageFormat,
}

/// The full decoding knowledge for one manifest generation: every signal
/// the cloud may reference, and every frame layout needed to decode them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecoderManifest {
    pub manifest_id: String,
    pub signals: BTreeMap<SignalId, SignalDecoderMethod>,
    /// channel id -> frame id -> message layout.
    pub frames: BTreeMap<ChannelId, BTreeMap<FrameId, CanMessageFormat>>,
    /// Bytes this manifest was parsed from, persisted verbatim; carried out
    /// of band of the wire format.
    #[serde(skip)]
    pub source_bytes: Vec<u8>,
}

impl DecoderManifest {
    /// Whether `signal_id` is defined in this manifest generation.
    pub fn resolves(&self, signal_id: SignalId) -> bool {
        self.signals.contains_key(&signal_id)
    }

    /// The message layout registered for `(channel_id, frame_id)`, if any.
    pub fn frame_format(&self, channel_id: ChannelId, frame_id: FrameId) -> Option<&CanMessageFormat> {
        self.frames.get(&channel_id).and_then(|frames| frames.get(&frame_id))
    }
}

/// What the bus decoders actually need right now: the manifest filtered
/// down to the signals and frames referenced by enabled schemes.
///
/// Published as an immutable snapshot whenever the manifest or the enabled
/// set changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecoderDictionary {
    pub signal_ids_to_collect: BTreeSet<SignalId>,
    /// channel id -> frame id -> decoder method.
    pub can_decoder_method: BTreeMap<ChannelId, BTreeMap<FrameId, CanMessageDecoderMethod>>,
}

impl DecoderDictionary {
    pub fn is_empty(&self) -> bool {
        self.signal_ids_to_collect.is_empty() && self.can_decoder_method.is_empty()
    }
}
