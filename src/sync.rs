//! Poison-tolerant locking.
//!
//! A pump worker that panics while holding a mutex must not take the
//! control loop down with it; the guarded state (pin levels, experiment
//! buffers) stays valid because every writer restores invariants before
//! unwinding.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
