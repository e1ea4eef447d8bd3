use std::thread;
use std::thread::JoinHandle;

use crate::channel::{ChannelAddr, ChannelInfo, Listener};
use crate::errors::{Fault, SessionError};
use crate::pump::FaultHandler;
use crate::session::{LinkState, Pumps, Session, SessionState, StatusCell};
use crate::utils::{wait_any, Outcome, Signal};

/// Session which accepts clients one at a time.
pub struct ServerSession {
    info: ChannelInfo,
    pumps: Pumps,
    status: StatusCell,
    quit: Signal,
    handle: Option<JoinHandle<()>>,
}

struct Serve {
    listener: Listener,
    pumps: Pumps,
    status: StatusCell,
    quit: Signal,
    on_fault: FaultHandler,
}

impl ServerSession {
    /// Creates the listening endpoint and starts the accept loop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listen`] if the endpoint can't be created.
    pub fn start(
        addr: &ChannelAddr,
        pumps: Pumps,
        status: StatusCell,
        on_fault: FaultHandler,
    ) -> Result<Self, SessionError> {
        let listener = Listener::bind(addr).map_err(|err| SessionError::Listen {
            name: addr.name(),
            source: err,
        })?;
        let info = listener.info().clone();
        let quit = Signal::new();

        let serve = Serve {
            listener,
            pumps: pumps.clone(),
            status: status.clone(),
            quit: quit.clone(),
            on_fault,
        };
        let handle = thread::spawn(move || serve.run());

        Ok(Self {
            info,
            pumps,
            status,
            quit,
            handle: Some(handle),
        })
    }
}

impl Session for ServerSession {
    fn info(&self) -> &ChannelInfo {
        &self.info
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.status.set_state(SessionState::Stopping);
        self.quit.set();
        if handle.join().is_err() {
            log::error!("[{:?}] server thread panicked", self.info);
            self.pumps.detach();
        }

        self.status.set_state(SessionState::Idle);
        log::debug!("[{:?}] session stopped", self.info);
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("info", &self.info)
            .field("status", &self.status.get())
            .finish()
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Serve {
    fn run(self) {
        let info = self.listener.info().clone();
        log::trace!("[{info:?}] accept loop started");

        loop {
            self.status.set_link(LinkState::Listening);

            let channel = match self.listener.accept(&self.quit) {
                Ok(Outcome::Done(channel)) => channel,
                Ok(Outcome::Cancelled) => break,
                Err(err) => {
                    (self.on_fault)(Fault::Session(SessionError::Accept {
                        name: info.addr().name(),
                        source: err,
                    }));
                    break;
                }
            };

            let peer = channel.info().clone();
            let attention = Signal::new();
            if let Err(err) = self.pumps.attach(channel, &attention) {
                log::debug!("[{peer:?}] can't attach pumps: {err}");
                (self.on_fault)(Fault::Channel(err));
                continue;
            }
            self.status.set_link(LinkState::Connected);

            loop {
                attention.reset();
                if self.quit.is_set() || self.pumps.has_failed() {
                    break;
                }
                wait_any(&attention, &self.quit);
            }

            self.status.set_link(LinkState::Disconnecting);
            self.pumps.detach();
            log::debug!("[{peer:?}] client disconnected");
        }

        log::trace!("[{info:?}] accept loop stopped");
    }
}
