use crate::channel::{Channel, ChannelAddr, ChannelInfo};
use crate::errors::SessionError;
use crate::session::{LinkState, Pumps, Session, SessionState, StatusCell};
use crate::utils::{Outcome, Signal};

/// Session which connects to a server once.
///
/// There is no thread of its own: failures are reported by pumps, and the owner is expected to
/// stop the session in response.
pub struct ClientSession {
    info: ChannelInfo,
    pumps: Pumps,
    status: StatusCell,
    running: bool,
}

impl ClientSession {
    /// Connects to a server and attaches pumps.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] if the server is not reachable, or
    /// [`SessionError::Cancelled`] if `cancel` is set before the connection is established.
    pub fn start(
        addr: &ChannelAddr,
        pumps: Pumps,
        status: StatusCell,
        cancel: &Signal,
    ) -> Result<Self, SessionError> {
        let connect_error = |err| SessionError::Connect {
            name: addr.name(),
            source: err,
        };

        let channel = match Channel::connect_with(addr, cancel).map_err(connect_error)? {
            Outcome::Done(channel) => channel,
            Outcome::Cancelled => return Err(SessionError::Cancelled),
        };
        let info = channel.info().clone();
        pumps
            .attach(channel, &Signal::new())
            .map_err(connect_error)?;
        status.set_link(LinkState::Connected);

        Ok(Self {
            info,
            pumps,
            status,
            running: true,
        })
    }

    /// Returns `true` if any pump failed.
    pub fn has_failed(&self) -> bool {
        self.pumps.has_failed()
    }
}

impl Session for ClientSession {
    fn info(&self) -> &ChannelInfo {
        &self.info
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        self.status.set_state(SessionState::Stopping);
        self.status.set_link(LinkState::Disconnecting);
        self.pumps.detach();
        self.status.set_state(SessionState::Idle);
        log::debug!("[{:?}] session stopped", self.info);
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("info", &self.info)
            .field("status", &self.status.get())
            .finish()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.stop();
    }
}
