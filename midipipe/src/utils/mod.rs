//! Common utils.

pub mod signal;
mod unique_id;


#[doc(inline)]
pub use signal::{wait_any, Outcome, Signal, Wait};
pub use unique_id::UniqueId;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
