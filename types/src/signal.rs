use serde::{Deserialize, Serialize};

/// Identifies a signal within one decoder manifest generation.
pub type SignalId = u32;
/// Numeric id of a physical bus channel.
pub type ChannelId = u32;
/// CAN arbitration id of a frame.
pub type FrameId = u32;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Largest payload of a classic CAN frame.
pub const MAX_CAN_FRAME_BYTES: usize = 8;

/// One decoded signal value as produced by a bus decoder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub signal_id: SignalId,
    pub receive_time_ms: Timestamp,
    pub value: f64,
}

impl SignalSample {
    pub fn new(signal_id: SignalId, receive_time_ms: Timestamp, value: f64) -> Self {
        SignalSample {
            signal_id,
            receive_time_ms,
            value,
        }
    }
}

/// A raw CAN frame, retained only for schemes that request raw capture of
/// its (channel, frame id) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    pub channel_id: ChannelId,
    pub frame_id: FrameId,
    pub receive_time_ms: Timestamp,
    pub data: [u8; MAX_CAN_FRAME_BYTES],
    /// Number of valid bytes in `data`.
    pub len: u8,
}

impl CanFrame {
    pub fn new(
        channel_id: ChannelId,
        frame_id: FrameId,
        receive_time_ms: Timestamp,
        bytes: &[u8],
    ) -> Self {
        let mut data = [0u8; MAX_CAN_FRAME_BYTES];
        let len = bytes.len().min(MAX_CAN_FRAME_BYTES);
        data[..len].copy_from_slice(&bytes[..len]);
        CanFrame {
            channel_id,
            frame_id,
            receive_time_ms,
            data,
            len: len as u8,
        }
    }

    /// The valid prefix of the frame payload.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }
}

/// The set of diagnostic trouble codes currently active across all ECUs.
///
/// The OBD module aggregates the whole network into one snapshot, so a new
/// `DtcInfo` always replaces the previous one atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcInfo {
    pub receive_time_ms: Timestamp,
    pub active_codes: Vec<String>,
}

impl DtcInfo {
    pub fn has_code(&self, code: &str) -> bool {
        self.active_codes.iter().any(|c| c == code)
    }

    pub fn has_any(&self) -> bool {
        !self.active_codes.is_empty()
    }
}
