//! # Device ports
//!
//! A device is either a [`DeviceSink`] (transmit side) or a [`DeviceSource`] (receive side). Both
//! are thin owners of a port opened by a [`Backend`].
//!
//! The sink keeps a [`SlotPool`] of transmit buffers. A slot travels from the pool to the producer,
//! then to the driver, and is returned by the driver's completion handler. The number of slots in
//! flight is bounded by the pool capacity, so a producer that outruns the device blocks.
//!
//! The source has no buffering: every received message is handed to the registered handler on
//! the driver's delivery thread.

mod backend;
mod info;
mod message;
#[cfg(feature = "midir")]
mod midir_port;
mod pool;
mod sink;
mod source;
mod virtual_port;

pub use backend::{
    Backend, CompletionHandler, DeliveryHandler, Incoming, InputPort, OutputPort, Rejected,
};
pub use info::{resolve_device, DeviceId, DeviceInfo, Direction};
pub use message::{short_message_len, unpack_short_message};
#[cfg(feature = "midir")]
pub use midir_port::MidirBackend;
pub use pool::{Slot, SlotPool};
pub use sink::DeviceSink;
pub use source::{DeviceSource, MessageHandler};
pub use virtual_port::{CompletionMode, VirtualBackend, VirtualInput, VirtualOutput};
