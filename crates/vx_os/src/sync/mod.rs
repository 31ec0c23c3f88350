//! Synchronization primitives.

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
