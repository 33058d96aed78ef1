//! fleetd utilities.
//!
//! Re-exports the `parking_lot` lock types so every crate agrees on one
//! implementation and the `deadlock_detection` feature can be switched on
//! in a single place.

pub use parking_lot::{
    self, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
