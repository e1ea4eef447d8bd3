use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;

use crate::utils::lock;

/// Unit of work posted to a [`TaskQueue`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Consumer-supplied executor for error notifications.
///
/// The bridge never invokes consumer callbacks on its own threads. Instead, it posts them as
/// tasks. Implementations must not run tasks inline within [`post`](TaskQueue::post): a task may
/// call back into the bridge.
pub trait TaskQueue: Send + Sync + 'static {
    /// Enqueues a task.
    ///
    /// Returns `false` if the queue no longer accepts tasks.
    fn post(&self, task: Task) -> bool;
}

impl<Q: TaskQueue> TaskQueue for Arc<Q> {
    fn post(&self, task: Task) -> bool {
        self.as_ref().post(task)
    }
}

/// Task queue which runs tasks on a dedicated thread, in posting order.
pub struct ThreadDispatcher {
    tx: Mutex<Option<mpsc::Sender<Task>>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadDispatcher {
    /// Spawns the dispatcher thread.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = thread::spawn(move || {
            for task in rx {
                task();
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Some(handle),
        }
    }
}

impl Default for ThreadDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for ThreadDispatcher {
    fn post(&self, task: Task) -> bool {
        match lock(&self.tx).as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for ThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadDispatcher").finish_non_exhaustive()
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        lock(&self.tx).take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("dispatched task panicked");
            }
        }
    }
}

/// Task queue which accumulates tasks until the owner runs them.
///
/// Suits consumers with their own event loop: call [`run_pending`](Self::run_pending) on every
/// iteration.
#[derive(Default)]
pub struct PendingTasks {
    tasks: Mutex<VecDeque<Task>>,
}

impl PendingTasks {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to be run.
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Returns `true` if there are no tasks waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs tasks posted so far and returns their number.
    ///
    /// Tasks posted by running tasks are left for the next call.
    pub fn run_pending(&self) -> usize {
        let tasks: Vec<Task> = lock(&self.tasks).drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }
}

impl TaskQueue for PendingTasks {
    fn post(&self, task: Task) -> bool {
        lock(&self.tasks).push_back(task);
        true
    }
}

impl std::fmt::Debug for PendingTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTasks")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn dispatcher_runs_tasks_off_thread() {
        let dispatcher = ThreadDispatcher::new();
        let (tx, rx) = mpsc::channel();

        let caller = thread::current().id();
        assert!(dispatcher.post(Box::new(move || {
            tx.send(thread::current().id() != caller).unwrap();
        })));

        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn dispatcher_drains_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = ThreadDispatcher::new();
        for _ in 0..10 {
            let counter = counter.clone();
            dispatcher.post(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        drop(dispatcher);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn pending_tasks_run_on_demand() {
        let queue = Arc::new(PendingTasks::new());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            queue.post(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }
}
