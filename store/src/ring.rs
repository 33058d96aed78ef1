use fleetd_types::{CanFrame, Timestamp};
use std::collections::VecDeque;

/// Fixed-capacity ring of timestamped samples for one signal.
///
/// Timestamps are monotonically non-decreasing within the ring; a late
/// sample is discarded and counted instead of reordering the buffer.
pub(crate) struct SampleBuffer {
    samples: VecDeque<(Timestamp, f64)>,
    capacity: usize,
    min_interval_ms: u64,
    discarded_late: u64,
    overwritten: u64,
}

impl SampleBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        SampleBuffer {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_interval_ms: u64::MAX,
            discarded_late: 0,
            overwritten: 0,
        }
    }

    /// Smallest observed inter-sample gap; `None` before two distinct
    /// timestamps have been seen.
    pub(crate) fn min_interval_ms(&self) -> Option<u64> {
        (self.min_interval_ms != u64::MAX).then_some(self.min_interval_ms)
    }

    pub(crate) fn grow_to(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.capacity = capacity;
            self.samples.reserve(capacity - self.samples.len());
        }
    }

    pub(crate) fn push(&mut self, time_ms: Timestamp, value: f64) -> bool {
        if let Some(&(newest, _)) = self.samples.back() {
            if time_ms < newest {
                self.discarded_late += 1;
                return false;
            }
            let gap = time_ms - newest;
            if gap > 0 && gap < self.min_interval_ms {
                self.min_interval_ms = gap;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.overwritten += 1;
        }
        self.samples.push_back((time_ms, value));
        true
    }

    pub(crate) fn latest(&self) -> Option<(Timestamp, f64)> {
        self.samples.back().copied()
    }

    /// Samples with `start_ms <= t < end_ms`, in append order.
    pub(crate) fn range(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> impl Iterator<Item = (Timestamp, f64)> + '_ {
        self.samples
            .iter()
            .skip_while(move |&&(t, _)| (t as i64) < start_ms)
            .take_while(move |&&(t, _)| (t as i64) < end_ms)
            .copied()
    }

    pub(crate) fn discarded_late(&self) -> u64 {
        self.discarded_late
    }

    pub(crate) fn overwritten(&self) -> u64 {
        self.overwritten
    }
}

/// Fixed-capacity ring of raw frames for one (channel, frame id) pair.
pub(crate) struct FrameBuffer {
    frames: VecDeque<CanFrame>,
    capacity: usize,
    discarded_late: u64,
    overwritten: u64,
}

impl FrameBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        FrameBuffer {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            discarded_late: 0,
            overwritten: 0,
        }
    }

    pub(crate) fn grow_to(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.capacity = capacity;
            self.frames.reserve(capacity - self.frames.len());
        }
    }

    pub(crate) fn push(&mut self, frame: &CanFrame) -> bool {
        if let Some(newest) = self.frames.back() {
            if frame.receive_time_ms < newest.receive_time_ms {
                self.discarded_late += 1;
                return false;
            }
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
            self.overwritten += 1;
        }
        self.frames.push_back(*frame);
        true
    }

    pub(crate) fn range(&self, start_ms: i64, end_ms: i64) -> impl Iterator<Item = &CanFrame> + '_ {
        self.frames
            .iter()
            .skip_while(move |f| (f.receive_time_ms as i64) < start_ms)
            .take_while(move |f| (f.receive_time_ms as i64) < end_ms)
    }

    pub(crate) fn overwritten(&self) -> u64 {
        self.overwritten
    }
}
