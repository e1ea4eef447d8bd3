//! # Sessions
//!
//! A session owns the channel and attaches both pumps to it.
//!
//! ```text
//!          start                                  stop
//! Idle ───────────▶ Starting ──▶ Running ─────────────▶ Stopping ──▶ Idle
//!                      │           │
//!                      │ failure   └─ server: Listening ─▶ Connected ─▶ Disconnecting ─┐
//!                      ▼                          ▲                                    │
//!                     Idle                        └────────────────────────────────────┘
//! ```
//!
//! A [`ServerSession`] listens for clients and serves them one at a time: when either pump fails
//! or the peer leaves, it detaches pumps, drops the connection and accepts the next client. A
//! [`ClientSession`] connects once; failures of its pumps end the whole session.

mod client;
mod server;

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, ChannelAddr, ChannelInfo, Role};
use crate::errors::{ChannelResult, SessionError};
use crate::pump::{ChannelToSink, FaultHandler, SourceToChannel};
use crate::utils::{lock, Signal};

pub use client::ClientSession;
pub use server::ServerSession;

/// Lifecycle state of a session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Channel is being created.
    Starting,
    /// Channel is created, pumps are attached whenever a peer is connected.
    Running,
    /// Session is being torn down.
    Stopping,
}

/// State of the connection within a running session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Server waits for a client.
    Listening,
    /// Peer is connected and pumps are attached.
    Connected,
    /// Pumps are being detached and the connection dropped.
    Disconnecting,
}

/// Observable status of a session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: SessionState,
    /// Connection state, if session is running.
    pub link: Option<LinkState>,
}

/// Status shared between a session, its threads and observers.
#[derive(Clone, Debug, Default)]
pub struct StatusCell(Arc<Mutex<SessionStatus>>);

impl StatusCell {
    /// Current status.
    pub fn get(&self) -> SessionStatus {
        *lock(&self.0)
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let mut status = lock(&self.0);
        status.state = state;
        if matches!(state, SessionState::Idle | SessionState::Starting) {
            status.link = None;
        }
    }

    pub(crate) fn set_link(&self, link: LinkState) {
        lock(&self.0).link = Some(link);
    }
}

/// Both pumps of a bridge.
///
/// Pumps outlive sessions: the same pair is attached to every channel a session establishes.
#[derive(Clone)]
pub struct Pumps {
    /// Channel to output device.
    pub to_sink: Arc<Mutex<ChannelToSink>>,
    /// Input device to channel.
    pub to_channel: Arc<Mutex<SourceToChannel>>,
}

impl Pumps {
    /// Wraps pumps for sharing.
    pub fn new(to_sink: ChannelToSink, to_channel: SourceToChannel) -> Self {
        Self {
            to_sink: Arc::new(Mutex::new(to_sink)),
            to_channel: Arc::new(Mutex::new(to_channel)),
        }
    }

    /// Attaches both pumps to a channel.
    pub(crate) fn attach(&self, channel: Channel, attention: &Signal) -> ChannelResult<()> {
        let reader = channel.try_clone()?;
        lock(&self.to_sink).attach(reader, attention.clone());
        lock(&self.to_channel).attach(channel, attention.clone());
        Ok(())
    }

    /// Detaches both pumps and drops the channel.
    pub(crate) fn detach(&self) {
        lock(&self.to_channel).detach();
        lock(&self.to_sink).detach();
    }

    /// Returns `true` if any pump failed since attached.
    pub(crate) fn has_failed(&self) -> bool {
        lock(&self.to_sink).has_failed() || lock(&self.to_channel).has_failed()
    }
}

impl Debug for Pumps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pumps")
            .field("to_sink", &*lock(&self.to_sink))
            .field("to_channel", &*lock(&self.to_channel))
            .finish()
    }
}

/// Running session.
pub trait Session: Send + Debug {
    /// Information about the listening endpoint (server) or the connection (client).
    fn info(&self) -> &ChannelInfo;

    /// Session role.
    fn role(&self) -> Role {
        self.info().role()
    }

    /// Stops the session.
    ///
    /// Blocks until pumps are detached and all session threads exit. Calling it again is a
    /// no-op.
    fn stop(&mut self);
}

/// Starts a session in the specified role.
///
/// A client gives up connecting once `cancel` is set and returns [`SessionError::Cancelled`]. On
/// failure the status returns to [`SessionState::Idle`].
pub fn start(
    addr: &ChannelAddr,
    role: Role,
    pumps: &Pumps,
    status: &StatusCell,
    on_fault: FaultHandler,
    cancel: &Signal,
) -> Result<Box<dyn Session>, SessionError> {
    status.set_state(SessionState::Starting);

    let session: Result<Box<dyn Session>, SessionError> = match role {
        Role::Server => {
            ServerSession::start(addr, pumps.clone(), status.clone(), on_fault)
                .map(|session| Box::new(session) as Box<dyn Session>)
        }
        Role::Client => ClientSession::start(addr, pumps.clone(), status.clone(), cancel)
            .map(|session| Box::new(session) as Box<dyn Session>),
    };

    match &session {
        Ok(session) => {
            log::debug!("[{:?}] session started", session.info());
            status.set_state(SessionState::Running);
        }
        Err(err) => {
            log::debug!("session failed to start: {err}");
            status.set_state(SessionState::Idle);
        }
    }
    session
}
