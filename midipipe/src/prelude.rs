//! # Basic imports
//!
//! ```rust
//! use midipipe::prelude::*;
//! ```

pub use crate::errors::{ChannelError, DeviceError, Error, Fault, Result, SessionError};

pub use crate::bridge::{Bridge, BridgeBuilder, ErrorLatch, PendingTasks, SessionConf, TaskQueue};
pub use crate::channel::{ChannelAddr, Role};
pub use crate::device::{DeviceId, DeviceInfo, VirtualBackend};
pub use crate::session::{LinkState, SessionState};

#[cfg(feature = "midir")]
pub use crate::device::MidirBackend;
