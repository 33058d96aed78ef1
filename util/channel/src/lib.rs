//! Reexports `crossbeam_channel` so every fleetd crate shares one version.

pub use crossbeam_channel::{
    after, bounded, select, tick, unbounded, Receiver, RecvError, RecvTimeoutError, SendError,
    Sender, TryRecvError, TrySendError,
};

/// Capacity used for one-message signal channels, e.g. stop and wake channels.
///
/// A single slot is enough: pending notifications are coalesced, one is
/// sufficient to unblock the receiver.
pub const SIGNAL_CHANNEL_SIZE: usize = 1;
