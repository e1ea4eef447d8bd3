use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use crate::bridge::{ErrorLatch, SessionConf, Task, TaskQueue};
use crate::channel::Role;
use crate::device::{DeviceId, Direction};
use crate::errors::{ChannelError, DeviceError, Error, Fault, Result, SessionError};
use crate::pump::FaultHandler;
use crate::session::{self, Pumps, Session, StatusCell};
use crate::utils::{lock, Signal};

/// Consumer callback for errors of one category.
pub type ErrorCallback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Request to the control thread.
pub(super) enum Command {
    SetDevice {
        direction: Direction,
        id: DeviceId,
        reply: mpsc::Sender<Result<()>>,
    },
    Start {
        conf: SessionConf,
        reply: mpsc::Sender<Result<()>>,
    },
    Stop {
        reply: mpsc::Sender<()>,
    },
    Fault(Fault),
    Shutdown,
}

#[derive(Clone, Default)]
pub(super) struct Callbacks {
    pub(super) on_input_error: Option<ErrorCallback<DeviceError>>,
    pub(super) on_output_error: Option<ErrorCallback<DeviceError>>,
    pub(super) on_channel_error: Option<ErrorCallback<ChannelError>>,
    pub(super) on_session_error: Option<ErrorCallback<SessionError>>,
}

/// Posts error callbacks to the consumer's task queue.
pub(super) struct Notifier {
    pub(super) queue: Arc<dyn TaskQueue>,
    pub(super) callbacks: Callbacks,
    pub(super) enabled: Arc<AtomicBool>,
}

impl Notifier {
    fn notify(&self, fault: Fault) {
        let task = match fault {
            Fault::InputDevice(err) => self.task(&self.callbacks.on_input_error, err),
            Fault::OutputDevice(err) => self.task(&self.callbacks.on_output_error, err),
            Fault::Channel(err) => self.task(&self.callbacks.on_channel_error, err),
            Fault::Session(err) => self.task(&self.callbacks.on_session_error, err),
        };

        if let Some(task) = task {
            if !self.queue.post(task) {
                log::warn!("task queue rejected error notification");
            }
        }
    }

    fn task<E: Send + 'static>(&self, callback: &Option<ErrorCallback<E>>, err: E) -> Option<Task> {
        let callback = callback.clone()?;
        let enabled = self.enabled.clone();
        Some(Box::new(move || {
            if enabled.load(Ordering::Acquire) {
                callback(err);
            }
        }))
    }
}

/// Creates a fault handler which forwards faults to the control thread.
pub(super) fn fault_handler(tx: mpsc::Sender<Command>) -> FaultHandler {
    let tx = Mutex::new(tx);
    Arc::new(move |fault| {
        if lock(&tx).send(Command::Fault(fault)).is_err() {
            log::debug!("fault reported after shutdown");
        }
    })
}

/// Serializes all changes of devices and sessions.
///
/// Runs on its own thread and processes [`Command`]s one by one, so concurrent calls from
/// consumers and fault reports from pumps never interleave.
pub(super) struct Controller {
    pub(super) pumps: Pumps,
    pub(super) status: StatusCell,
    pub(super) latch: Arc<Mutex<ErrorLatch>>,
    pub(super) notifier: Notifier,
    pub(super) tx: mpsc::Sender<Command>,
    pub(super) cancel: Signal,
    pub(super) session: Option<Box<dyn Session>>,
}

impl Controller {
    pub(super) fn run(mut self, rx: mpsc::Receiver<Command>) {
        log::trace!("controller started");

        for command in rx {
            match command {
                Command::SetDevice {
                    direction,
                    id,
                    reply,
                } => {
                    let _ = reply.send(self.set_device(direction, id));
                }
                Command::Start { conf, reply } => {
                    let _ = reply.send(self.start(conf));
                }
                Command::Stop { reply } => {
                    self.stop();
                    let _ = reply.send(());
                }
                Command::Fault(fault) => self.handle_fault(fault),
                Command::Shutdown => break,
            }
        }

        self.stop();
        for direction in [Direction::Input, Direction::Output] {
            if let Err(err) = self.open_device(direction, DeviceId::None) {
                log::debug!("failed to close {direction:?} device: {err}");
            }
        }
        log::trace!("controller stopped");
    }

    fn set_device(&mut self, direction: Direction, id: DeviceId) -> Result<()> {
        let current = match direction {
            Direction::Input => lock(&self.pumps.to_channel).device(),
            Direction::Output => lock(&self.pumps.to_sink).device(),
        };
        if current == id {
            return Ok(());
        }

        {
            let mut latch = lock(&self.latch);
            match direction {
                Direction::Input => latch.reset_input(),
                Direction::Output => latch.reset_output(),
            }
        }

        self.open_device(direction, id).map_err(|err| {
            let fault = match direction {
                Direction::Input => Fault::InputDevice(err.clone()),
                Direction::Output => Fault::OutputDevice(err.clone()),
            };
            self.report(fault);
            Error::Device(err)
        })
    }

    fn open_device(&self, direction: Direction, id: DeviceId) -> crate::errors::DeviceResult<()> {
        match direction {
            Direction::Input => lock(&self.pumps.to_channel).set_device(id),
            Direction::Output => lock(&self.pumps.to_sink).set_device(id),
        }
    }

    fn start(&mut self, conf: SessionConf) -> Result<()> {
        self.stop();

        {
            let mut latch = lock(&self.latch);
            latch.reset_channel();
            latch.reset_session();
        }

        let on_fault = fault_handler(self.tx.clone());
        let started = session::start(
            &conf.addr,
            conf.role,
            &self.pumps,
            &self.status,
            on_fault,
            &self.cancel,
        );
        match started {
            Ok(session) => {
                self.session = Some(session);
                Ok(())
            }
            Err(SessionError::Cancelled) => {
                log::debug!("[{}] start cancelled by stop", conf.addr.name());
                Err(Error::Session(SessionError::Cancelled))
            }
            Err(err) => {
                self.report(Fault::Session(err.clone()));
                Err(Error::Session(err))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
    }

    fn handle_fault(&mut self, fault: Fault) {
        let stop = match &fault {
            Fault::Session(_) => true,
            _ => {
                let role = self.session.as_ref().map(|session| session.role());
                role == Some(Role::Client) && self.pumps.has_failed()
            }
        };

        self.report(fault);
        if stop {
            self.stop();
        }
    }

    fn report(&self, fault: Fault) {
        log::debug!("fault: {fault}");
        lock(&self.latch).latch(&fault);
        self.notifier.notify(fault);
    }
}
