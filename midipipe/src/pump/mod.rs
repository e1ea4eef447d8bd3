//! # Transfer pumps
//!
//! Pumps move bytes between a [`Channel`](crate::channel::Channel) and device ports:
//!
//! * [`ChannelToSink`] owns a thread which reads the channel and transmits to a
//!   [`DeviceSink`](crate::device::DeviceSink).
//! * [`SourceToChannel`] has no thread of its own: it writes to the channel from the
//!   [`DeviceSource`](crate::device::DeviceSource) delivery thread.
//!
//! A pump is attached to a channel for the duration of a connection and can switch devices while
//! attached. Failures during transfer are reported as [`Fault`]s, raise the pump's failed flag and
//! set the attention signal passed on attach, so the session can tear the connection down.

mod channel_to_sink;
mod source_to_channel;

use std::sync::Arc;

use crate::channel::Role;
use crate::errors::{ChannelError, Fault};

pub use channel_to_sink::ChannelToSink;
pub use source_to_channel::SourceToChannel;

/// Receives faults detected by pumps and sessions.
///
/// Invoked on pump, session or driver threads.
pub type FaultHandler = Arc<dyn Fn(Fault) + Send + Sync>;

/// Returns `true` if a channel error must be reported.
///
/// A server is expected to lose its clients, so [`ChannelError::PeerClosed`] is not a failure in
/// [`Role::Server`]. Neither is [`ChannelError::Interrupted`]: the server drops the out of sync
/// connection and waits for the next client.
pub fn need_to_report(err: &ChannelError, role: Role) -> bool {
    !(role == Role::Server && matches!(err, ChannelError::PeerClosed | ChannelError::Interrupted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_closed_is_suppressed_for_server() {
        assert!(!need_to_report(&ChannelError::PeerClosed, Role::Server));
        assert!(need_to_report(&ChannelError::PeerClosed, Role::Client));
        assert!(!need_to_report(&ChannelError::Interrupted, Role::Server));
        assert!(need_to_report(&ChannelError::Interrupted, Role::Client));

        let err = ChannelError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(need_to_report(&err, Role::Server));
        assert!(need_to_report(&err, Role::Client));
    }
}
