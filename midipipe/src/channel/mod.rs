//! # Duplex channel
//!
//! A channel is a byte stream shared by two processes and identified by a name unique within the
//! host. The [`Role::Server`] side creates a [`Listener`] and accepts clients one by one, the
//! [`Role::Client`] side calls [`Channel::connect`].
//!
//! Channels are backed by Unix sockets or, on any platform, by loopback TCP sockets. See
//! [`ChannelAddr`] for naming rules.
//!
//! All blocking operations race a stop [`Signal`](crate::utils::Signal).

mod addr;
mod listener;
mod stream;

pub use addr::{ChannelAddr, ChannelInfo, Role};
pub use listener::Listener;
pub use stream::Channel;
