//! Millisecond timestamps since the Unix epoch.
//!
//! With the `enable_faketime` feature, tests can pin the clock to an
//! arbitrary value through a [`faketime`] guard; the guard serializes tests
//! that manipulate the clock and restores real time when dropped.

use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "enable_faketime")]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
#[cfg(feature = "enable_faketime")]
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Reads the real system clock, in milliseconds since the Unix epoch.
pub fn system_time_as_millis() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock is set before the Unix epoch");
    duration.as_secs() * 1000 + u64::from(duration.subsec_millis())
}

#[cfg(not(feature = "enable_faketime"))]
/// Current time in milliseconds since the Unix epoch.
pub fn unix_time_as_millis() -> u64 {
    system_time_as_millis()
}

#[cfg(feature = "enable_faketime")]
static FAKETIME_ENABLED: AtomicBool = AtomicBool::new(false);
#[cfg(feature = "enable_faketime")]
static FAKETIME: AtomicU64 = AtomicU64::new(0);
#[cfg(feature = "enable_faketime")]
static FAKETIME_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

#[cfg(feature = "enable_faketime")]
/// Current time in milliseconds since the Unix epoch, honoring faketime.
pub fn unix_time_as_millis() -> u64 {
    if FAKETIME_ENABLED.load(Ordering::SeqCst) {
        FAKETIME.load(Ordering::SeqCst)
    } else {
        system_time_as_millis()
    }
}

#[cfg(feature = "enable_faketime")]
/// Exclusive handle on the fake clock.
pub struct FaketimeGuard {
    _guard: MutexGuard<'static, ()>,
}

#[cfg(feature = "enable_faketime")]
/// Acquires the fake clock; other callers block until the guard is dropped.
pub fn faketime() -> FaketimeGuard {
    let guard = FAKETIME_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    FaketimeGuard { _guard: guard }
}

#[cfg(feature = "enable_faketime")]
impl FaketimeGuard {
    /// Pins `unix_time_as_millis` to `millis` until changed or disabled.
    pub fn set_faketime(&self, millis: u64) {
        FAKETIME.store(millis, Ordering::SeqCst);
        FAKETIME_ENABLED.store(true, Ordering::SeqCst);
    }

    /// Switches back to the real clock without releasing the guard.
    pub fn disable_faketime(&self) {
        FAKETIME_ENABLED.store(false, Ordering::SeqCst);
    }
}

#[cfg(feature = "enable_faketime")]
impl Drop for FaketimeGuard {
    fn drop(&mut self) {
        FAKETIME_ENABLED.store(false, Ordering::SeqCst);
    }
}

#[cfg(not(feature = "enable_faketime"))]
mod test_realtime;
