//! # Cancellable waits
//!
//! This module provides a manual-reset [`Signal`] and [`wait_any`], a function which races a
//! completion signal against a stop signal.
//!
//! A [`Signal`] plays two roles:
//!
//! * a completion notifier, when some resource becomes available (for example, a device buffer
//!   slot is recycled);
//! * a broadcast "stop" request shared by all threads which work on the same resource.
//!
//! Every blocking operation in MidiPipe is expressed as "try immediately, otherwise wait for
//! completion or stop, whatever comes first".
//!
//! ```rust
//! use std::thread;
//! use midipipe::utils::{wait_any, Signal, Wait};
//!
//! let done = Signal::new();
//! let stop = Signal::new();
//!
//! let handle = {
//!     let (done, stop) = (done.clone(), stop.clone());
//!     thread::spawn(move || wait_any(&done, &stop))
//! };
//!
//! stop.set();
//! assert_eq!(handle.join().unwrap(), Wait::Cancelled);
//! ```

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::utils::lock;

/// Outcome of [`wait_any`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Completion signal was set.
    Completed,
    /// Stop signal was set.
    Cancelled,
}

/// Outcome of an operation which races a stop signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Operation finished with the provided value.
    Done(T),
    /// Operation was interrupted by a stop signal and left no work pending.
    Cancelled,
}

impl<T> Outcome<T> {
    /// Returns `true` if operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

/// Manual-reset signal.
///
/// Once [`set`](Signal::set), the signal stays set until explicitly [`reset`](Signal::reset).
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    state: Mutex<SignalState>,
    cond: Condvar,
}

#[derive(Default)]
struct SignalState {
    set: bool,
    watchers: Vec<Weak<Doorbell>>,
}

/// Wakes a thread which waits for several signals at once.
#[derive(Default)]
struct Doorbell {
    rung: Mutex<bool>,
    cond: Condvar,
}

impl Doorbell {
    fn ring(&self) {
        *lock(&self.rung) = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut rung = lock(&self.rung);
        while !*rung {
            rung = self
                .cond
                .wait(rung)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *rung = false;
    }
}

impl Signal {
    /// Creates a signal in reset state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes up all waiters.
    pub fn set(&self) {
        let mut state = lock(&self.inner.state);
        state.set = true;
        for watcher in state.watchers.drain(..) {
            if let Some(doorbell) = watcher.upgrade() {
                doorbell.ring();
            }
        }
        self.inner.cond.notify_all();
    }

    /// Returns signal to reset state.
    pub fn reset(&self) {
        lock(&self.inner.state).set = false;
    }

    /// Returns `true` if signal is set.
    pub fn is_set(&self) -> bool {
        lock(&self.inner.state).set
    }

    /// Blocks until signal is set.
    pub fn wait(&self) {
        let mut state = lock(&self.inner.state);
        while !state.set {
            state = self
                .inner
                .cond
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Blocks until signal is set or `timeout` elapses.
    ///
    /// Returns `true` if signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);
        while !state.set {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Returns `true` if both handles refer to the same signal.
    pub fn same(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn watch(&self, doorbell: &Arc<Doorbell>) {
        let doorbell = Arc::downgrade(doorbell);
        let mut state = lock(&self.inner.state);
        state.watchers.retain(|watcher| watcher.strong_count() > 0);
        if !state.watchers.iter().any(|watcher| watcher.ptr_eq(&doorbell)) {
            state.watchers.push(doorbell);
        }
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Waits until either `completion` or `stop` is set.
///
/// If both are set, completion takes precedence. A caller which receives [`Wait::Cancelled`] must
/// cancel whatever operation it was about to finish before releasing the underlying resource.
pub fn wait_any(completion: &Signal, stop: &Signal) -> Wait {
    if completion.is_set() {
        return Wait::Completed;
    }
    if stop.is_set() {
        return Wait::Cancelled;
    }

    let doorbell = Arc::new(Doorbell::default());

    loop {
        // `set` drains watchers, so the doorbell is registered again before every check
        completion.watch(&doorbell);
        stop.watch(&doorbell);

        if completion.is_set() {
            return Wait::Completed;
        }
        if stop.is_set() {
            return Wait::Cancelled;
        }
        doorbell.wait();
    }
}
