//! # Errors
//!
//! Errors fall into three independent categories:
//!
//! * [`DeviceError`] is raised by a device port which failed to open, transmit, or receive.
//! * [`ChannelError`] is raised by I/O on an established channel.
//! * [`SessionError`] is raised when the channel itself can't be established.
//!
//! All errors are [`Clone`], since they are latched by the [`Bridge`](crate::bridge::Bridge) and
//! posted to a task queue. A [`Fault`] is an error tagged with the place where it happened.

use std::io::ErrorKind;
use std::sync::Arc;

use crate::device::DeviceId;

/// Common result type returned by MidiPipe functions.
pub type Result<T> = core::result::Result<T, Error>;

/// Result of device operations.
pub type DeviceResult<T> = core::result::Result<T, DeviceError>;

/// Result of channel operations.
pub type ChannelResult<T> = core::result::Result<T, ChannelError>;

/// Common error type for MidiPipe.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// Device error.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    /// Channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    /// The bridge was shut down and no longer accepts commands.
    #[error("bridge is shut down")]
    Shutdown,
}

/// Error of a device port.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DeviceError {
    /// Operation requires an open device.
    #[error("device is not open")]
    NotOpen,
    /// Requested device is not known to the backend.
    #[error("no such device: {0}")]
    NoSuchDevice(DeviceId),
    /// Failure reported by the device driver.
    #[error("{backend} driver failure: {message}")]
    Backend {
        /// Name of the backend.
        backend: &'static str,
        /// Driver-specific description.
        message: String,
    },
}

impl DeviceError {
    /// Creates a driver failure for the specified backend.
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        DeviceError::Backend {
            backend,
            message: message.into(),
        }
    }
}

/// Error of a duplex channel.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChannelError {
    /// Remote side closed the channel.
    #[error("peer closed the channel")]
    PeerClosed,
    /// Write was cancelled after part of the message was sent, the stream is out of sync.
    #[error("write interrupted mid-message")]
    Interrupted,
    /// Channel name can't be used on this platform.
    #[error("invalid channel name: {0}")]
    InvalidName(String),
    /// Another server already listens on this name.
    #[error("channel is already served: {0}")]
    AddrInUse(String),
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl ChannelError {
    /// Returns `true` if the remote side has gone.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, ChannelError::PeerClosed)
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => ChannelError::PeerClosed,
            _ => ChannelError::Io(Arc::new(value)),
        }
    }
}

/// Error of establishing a session.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    /// Server failed to create a listening endpoint.
    #[error("failed to listen on `{name}`: {source}")]
    Listen {
        /// Channel name.
        name: String,
        /// Cause.
        source: ChannelError,
    },
    /// Server failed while waiting for a client.
    #[error("failed to accept a client on `{name}`: {source}")]
    Accept {
        /// Channel name.
        name: String,
        /// Cause.
        source: ChannelError,
    },
    /// Client failed to connect.
    #[error("failed to connect to `{name}`: {source}")]
    Connect {
        /// Channel name.
        name: String,
        /// Cause.
        source: ChannelError,
    },
    /// Session was stopped before it was established.
    #[error("session start was cancelled")]
    Cancelled,
}

/// An error event tagged with its origin.
///
/// Faults are produced by pumps and sessions and delivered to the callbacks registered on
/// [`BridgeBuilder`](crate::bridge::BridgeBuilder).
#[derive(Clone, Debug, thiserror::Error)]
pub enum Fault {
    /// Input device failed.
    #[error("input device: {0}")]
    InputDevice(DeviceError),
    /// Output device failed.
    #[error("output device: {0}")]
    OutputDevice(DeviceError),
    /// Channel I/O failed.
    #[error("channel: {0}")]
    Channel(ChannelError),
    /// Session could not be established.
    #[error("session: {0}")]
    Session(SessionError),
}

impl From<Fault> for Error {
    fn from(value: Fault) -> Self {
        match value {
            Fault::InputDevice(err) | Fault::OutputDevice(err) => Error::Device(err),
            Fault::Channel(err) => Error::Channel(err),
            Fault::Session(err) => Error::Session(err),
        }
    }
}
