//! # Common constants

use std::time::Duration;

/// Number of buffer slots allocated for each opened device.
pub const DEVICE_BUFFER_COUNT: usize = 16;
/// Capacity of a single buffer slot in bytes.
///
/// Transmitted data is split into chunks of at most this size.
pub const DEVICE_BUFFER_SIZE: usize = 256;

/// Channel name used when no other name is configured.
#[cfg(unix)]
pub const DEFAULT_CHANNEL_NAME: &str = "/tmp/midipipe.sock";
/// Channel name used when no other name is configured.
#[cfg(not(unix))]
pub const DEFAULT_CHANNEL_NAME: &str = "tcp://127.0.0.1:52100";

/// Prefix that marks a loopback TCP channel name.
pub const TCP_CHANNEL_PREFIX: &str = "tcp://";

/// Upper bound for a single blocking read or write on a channel.
///
/// Between attempts the stop signal is checked, so this is also the worst-case latency of
/// cancelling channel I/O.
pub(crate) const CHANNEL_IO_POOLING_INTERVAL: Duration = Duration::from_millis(20);

/// Pooling interval of a non-blocking listener waiting for clients.
pub(crate) const ACCEPT_POOLING_INTERVAL: Duration = Duration::from_millis(10);
