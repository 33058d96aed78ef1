//! Rolling history of decoded signals, raw frames, and trouble codes.
//!
//! Owned exclusively by the inspection worker. Buffers are fixed-capacity
//! rings allocated when a matrix is installed and never reallocated within
//! one matrix generation; overflow drops the oldest entry.

mod ring;

use fleetd_logger::debug;
use fleetd_types::{CanFrame, ChannelId, DtcInfo, FrameId, SignalId, SignalSample, Timestamp};
use ring::{FrameBuffer, SampleBuffer};
use std::collections::BTreeMap;

/// Assumed inter-sample gap for a signal never seen before; refined by
/// observation and used to size the ring at the next matrix install.
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 10;

/// History store: per-signal sample rings, per-frame raw rings, and the
/// latest trouble-code snapshot.
#[derive(Default)]
pub struct SignalHistoryStore {
    signals: BTreeMap<SignalId, SampleBuffer>,
    frames: BTreeMap<(ChannelId, FrameId), FrameBuffer>,
    dtc: Option<DtcInfo>,
}

impl SignalHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aligns the buffer set with a new matrix generation.
    ///
    /// Buffers for ids absent from `signal_windows_ms`/`frame_windows_ms`
    /// are dropped. New buffers are sized as
    /// `ceil(window / min observed sample interval)` clamped to
    /// `ceiling_samples`; existing buffers only ever grow, keeping their
    /// newest samples.
    pub fn reconcile(
        &mut self,
        signal_windows_ms: &BTreeMap<SignalId, u64>,
        frame_windows_ms: &BTreeMap<(ChannelId, FrameId), u64>,
        ceiling_samples: usize,
    ) {
        self.signals.retain(|id, _| signal_windows_ms.contains_key(id));
        self.frames.retain(|key, _| frame_windows_ms.contains_key(key));

        for (&signal_id, &window_ms) in signal_windows_ms {
            let interval = self
                .signals
                .get(&signal_id)
                .and_then(SampleBuffer::min_interval_ms)
                .unwrap_or(DEFAULT_SAMPLE_INTERVAL_MS);
            let capacity = Self::capacity_for(window_ms, interval, ceiling_samples);
            match self.signals.get_mut(&signal_id) {
                Some(buffer) => buffer.grow_to(capacity),
                None => {
                    self.signals.insert(signal_id, SampleBuffer::new(capacity));
                }
            }
        }

        for (&key, &window_ms) in frame_windows_ms {
            let capacity = Self::capacity_for(window_ms, DEFAULT_SAMPLE_INTERVAL_MS, ceiling_samples);
            match self.frames.get_mut(&key) {
                Some(buffer) => buffer.grow_to(capacity),
                None => {
                    self.frames.insert(key, FrameBuffer::new(capacity));
                }
            }
        }

        debug!(
            "history store reconciled: {} signal buffers, {} frame buffers",
            self.signals.len(),
            self.frames.len()
        );
    }

    fn capacity_for(window_ms: u64, interval_ms: u64, ceiling: usize) -> usize {
        let interval = interval_ms.max(1);
        let wanted = window_ms.div_ceil(interval).max(1);
        usize::try_from(wanted).unwrap_or(ceiling).min(ceiling).max(1)
    }

    /// Appends one sample. Returns false when the signal is not referenced
    /// by the installed matrix or the sample arrived out of order.
    pub fn append_sample(&mut self, sample: &SignalSample) -> bool {
        match self.signals.get_mut(&sample.signal_id) {
            Some(buffer) => buffer.push(sample.receive_time_ms, sample.value),
            None => false,
        }
    }

    /// Appends one raw frame; false when the (channel, frame) pair is not
    /// under raw capture or the frame arrived out of order.
    pub fn append_frame(&mut self, frame: &CanFrame) -> bool {
        match self.frames.get_mut(&(frame.channel_id, frame.frame_id)) {
            Some(buffer) => buffer.push(frame),
            None => false,
        }
    }

    /// Replaces the trouble-code snapshot.
    pub fn set_active_dtcs(&mut self, info: DtcInfo) {
        self.dtc = Some(info);
    }

    pub fn active_dtcs(&self) -> Option<&DtcInfo> {
        self.dtc.as_ref()
    }

    pub fn has_signal_buffer(&self, signal_id: SignalId) -> bool {
        self.signals.contains_key(&signal_id)
    }

    /// Newest sample of `signal_id`, if any.
    pub fn latest(&self, signal_id: SignalId) -> Option<(Timestamp, f64)> {
        self.signals.get(&signal_id).and_then(SampleBuffer::latest)
    }

    /// Samples of `signal_id` with `start_ms <= t < end_ms`, in append
    /// order. Bounds are signed so a window reaching before the epoch is
    /// simply clipped.
    pub fn samples_in_range(
        &self,
        signal_id: SignalId,
        start_ms: i64,
        end_ms: i64,
    ) -> impl Iterator<Item = (Timestamp, f64)> + '_ {
        self.signals
            .get(&signal_id)
            .into_iter()
            .flat_map(move |buffer| buffer.range(start_ms, end_ms))
    }

    /// Raw frames of `(channel_id, frame_id)` with `start_ms <= t < end_ms`.
    pub fn frames_in_range(
        &self,
        channel_id: ChannelId,
        frame_id: FrameId,
        start_ms: i64,
        end_ms: i64,
    ) -> impl Iterator<Item = &CanFrame> + '_ {
        self.frames
            .get(&(channel_id, frame_id))
            .into_iter()
            .flat_map(move |buffer| buffer.range(start_ms, end_ms))
    }

    /// Total samples discarded because they arrived with a timestamp older
    /// than the newest buffered one.
    pub fn discarded_late_samples(&self) -> u64 {
        self.signals.values().map(SampleBuffer::discarded_late).sum()
    }

    /// Total entries overwritten by ring overflow, samples and frames.
    pub fn overwritten_entries(&self) -> u64 {
        self.signals.values().map(SampleBuffer::overwritten).sum::<u64>()
            + self.frames.values().map(FrameBuffer::overwritten).sum::<u64>()
    }
}
