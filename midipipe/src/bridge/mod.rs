//! # Bridge facade
//!
//! [`Bridge`] is the entry point of the library. It owns the input and output devices and both
//! pumps, runs at most one session at a time, and reports errors through callbacks posted to a
//! [`TaskQueue`].
//!
//! All control operations (device selection, start, stop, and reactions to faults) are executed
//! by a single control thread in the order they were requested. Public methods block until their
//! request is processed.

mod conf;
mod controller;
mod dispatch;
mod latch;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;

use crate::device::{Backend, DeviceId, DeviceInfo, DeviceSink, DeviceSource, Direction};
use crate::errors::{ChannelError, DeviceError, Error, Result, SessionError};
use crate::pump::{ChannelToSink, SourceToChannel};
use crate::session::{LinkState, Pumps, SessionState, StatusCell};
use crate::utils::{lock, Signal};

use controller::{fault_handler, Callbacks, Command, Controller, Notifier};

pub use conf::SessionConf;
pub use controller::ErrorCallback;
pub use dispatch::{PendingTasks, Task, TaskQueue, ThreadDispatcher};
pub use latch::ErrorLatch;

/// Bridge between device ports and a duplex channel.
///
/// Created by [`BridgeBuilder`]:
///
/// ```rust
/// use midipipe::prelude::*;
///
/// let backend = VirtualBackend::new();
/// let output = backend.add_output("Synth");
///
/// let bridge = Bridge::builder().backend(backend).build();
///
/// bridge.set_output_device(output.id()).unwrap();
/// assert_eq!(bridge.output_device(), output.id());
/// assert!(!bridge.is_running());
/// ```
///
/// Dropping the bridge disables callbacks which are not yet run, stops the session and closes
/// devices.
pub struct Bridge {
    tx: Mutex<mpsc::Sender<Command>>,
    handle: Option<JoinHandle<()>>,
    backend: Arc<dyn Backend>,
    pumps: Pumps,
    status: StatusCell,
    latch: Arc<Mutex<ErrorLatch>>,
    enabled: Arc<AtomicBool>,
    cancel: Signal,
}

impl Bridge {
    /// Creates a builder with default settings.
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Available input devices headed by the "(none)" entry.
    pub fn inputs(&self) -> Vec<DeviceInfo> {
        std::iter::once(DeviceInfo::none())
            .chain(self.backend.inputs())
            .collect()
    }

    /// Available output devices headed by the "(none)" entry.
    pub fn outputs(&self) -> Vec<DeviceInfo> {
        std::iter::once(DeviceInfo::none())
            .chain(self.backend.outputs())
            .collect()
    }

    /// Currently open input device.
    pub fn input_device(&self) -> DeviceId {
        lock(&self.pumps.to_channel).device()
    }

    /// Currently open output device.
    pub fn output_device(&self) -> DeviceId {
        lock(&self.pumps.to_sink).device()
    }

    /// Switches input device.
    ///
    /// Selecting the open device is a no-op. [`DeviceId::None`] closes the device. A running
    /// session is not interrupted. On failure, the error is also reported to the input error
    /// callback and no input device stays open.
    pub fn set_input_device(&self, id: DeviceId) -> Result<()> {
        self.call(|reply| Command::SetDevice {
            direction: Direction::Input,
            id,
            reply,
        })?
    }

    /// Switches output device.
    ///
    /// Same rules as for [`set_input_device`](Self::set_input_device) apply.
    pub fn set_output_device(&self, id: DeviceId) -> Result<()> {
        self.call(|reply| Command::SetDevice {
            direction: Direction::Output,
            id,
            reply,
        })?
    }

    /// Starts a session, stopping the current one.
    ///
    /// Clears latched channel and session errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the channel can't be created (server) or connected (client).
    /// The error is also reported to the session error callback. A client start interrupted by
    /// [`stop`](Self::stop) returns [`SessionError::Cancelled`], which is not reported.
    pub fn start(&self, conf: SessionConf) -> Result<()> {
        self.cancel.reset();
        self.call(|reply| Command::Start { conf, reply })?
    }

    /// Stops the session.
    ///
    /// A client still connecting gives up. Blocks until pumps are detached and the channel is
    /// closed. Calling it when there is no session is a no-op.
    pub fn stop(&self) {
        self.cancel.set();
        if let Err(err) = self.call(|reply| Command::Stop { reply }) {
            log::debug!("stop requested after shutdown: {err}");
        }
    }

    /// Returns `true` if a session is running.
    pub fn is_running(&self) -> bool {
        matches!(
            self.status.get().state,
            SessionState::Starting | SessionState::Running
        )
    }

    /// Lifecycle state of the session.
    pub fn session_state(&self) -> SessionState {
        self.status.get().state
    }

    /// Connection state of a running session.
    pub fn link_state(&self) -> Option<LinkState> {
        self.status.get().link
    }

    /// Errors latched so far.
    pub fn errors(&self) -> ErrorLatch {
        lock(&self.latch).clone()
    }

    /// Forgets the latched input device error.
    pub fn reset_input_error(&self) {
        lock(&self.latch).reset_input();
    }

    /// Forgets the latched output device error.
    pub fn reset_output_error(&self) {
        lock(&self.latch).reset_output();
    }

    /// Forgets the latched channel error.
    pub fn reset_channel_error(&self) {
        lock(&self.latch).reset_channel();
    }

    /// Forgets the latched session error.
    pub fn reset_session_error(&self) {
        lock(&self.latch).reset_session();
    }

    fn call<T>(&self, command: impl FnOnce(mpsc::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = mpsc::channel();
        lock(&self.tx)
            .send(command(reply))
            .map_err(|_| Error::Shutdown)?;
        response.recv().map_err(|_| Error::Shutdown)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("backend", &self.backend.name())
            .field("status", &self.status.get())
            .finish_non_exhaustive()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.enabled.store(false, Ordering::Release);
        self.cancel.set();
        let _ = lock(&self.tx).send(Command::Shutdown);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("controller panicked");
            }
        }
    }
}

/// Builder for [`Bridge`].
///
/// Without an explicit backend, the bridge uses `MidirBackend` when the `midir` feature is enabled,
/// and an empty [`VirtualBackend`](crate::device::VirtualBackend) otherwise. Without an explicit task queue, callbacks run on a [`ThreadDispatcher`].
#[derive(Default)]
pub struct BridgeBuilder {
    backend: Option<Arc<dyn Backend>>,
    queue: Option<Arc<dyn TaskQueue>>,
    callbacks: Callbacks,
}

impl BridgeBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets device backend.
    pub fn backend(self, backend: impl Backend) -> Self {
        Self {
            backend: Some(Arc::new(backend)),
            ..self
        }
    }

    /// Sets task queue for error callbacks.
    pub fn task_queue(self, queue: impl TaskQueue) -> Self {
        Self {
            queue: Some(Arc::new(queue)),
            ..self
        }
    }

    /// Sets callback for input device errors.
    pub fn on_input_error(mut self, f: impl Fn(DeviceError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_input_error = Some(Arc::new(f));
        self
    }

    /// Sets callback for output device errors.
    pub fn on_output_error(mut self, f: impl Fn(DeviceError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_output_error = Some(Arc::new(f));
        self
    }

    /// Sets callback for channel errors.
    pub fn on_channel_error(mut self, f: impl Fn(ChannelError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_channel_error = Some(Arc::new(f));
        self
    }

    /// Sets callback for session errors.
    pub fn on_session_error(mut self, f: impl Fn(SessionError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_session_error = Some(Arc::new(f));
        self
    }

    /// Builds the bridge and spawns its control thread.
    pub fn build(self) -> Bridge {
        let backend = self.backend.unwrap_or_else(default_backend);
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(ThreadDispatcher::new()) as Arc<dyn TaskQueue>);

        let (tx, rx) = mpsc::channel();
        let pumps = Pumps::new(
            ChannelToSink::new(DeviceSink::new(backend.clone()), fault_handler(tx.clone())),
            SourceToChannel::new(DeviceSource::new(backend.clone()), fault_handler(tx.clone())),
        );
        let status = StatusCell::default();
        let latch = Arc::new(Mutex::new(ErrorLatch::default()));
        let enabled = Arc::new(AtomicBool::new(true));
        let cancel = Signal::new();

        let controller = Controller {
            pumps: pumps.clone(),
            status: status.clone(),
            latch: latch.clone(),
            notifier: Notifier {
                queue,
                callbacks: self.callbacks,
                enabled: enabled.clone(),
            },
            tx: tx.clone(),
            cancel: cancel.clone(),
            session: None,
        };
        let handle = thread::spawn(move || controller.run(rx));

        Bridge {
            tx: Mutex::new(tx),
            handle: Some(handle),
            backend,
            pumps,
            status,
            latch,
            enabled,
            cancel,
        }
    }
}

impl std::fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("backend", &self.backend.as_ref().map(|backend| backend.name()))
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "midir")]
fn default_backend() -> Arc<dyn Backend> {
    Arc::new(crate::device::MidirBackend::default())
}

#[cfg(not(feature = "midir"))]
fn default_backend() -> Arc<dyn Backend> {
    Arc::new(crate::device::VirtualBackend::new())
}
