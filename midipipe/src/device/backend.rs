use std::sync::Arc;

use crate::device::{DeviceId, DeviceInfo, Slot};
use crate::errors::{DeviceError, DeviceResult};

/// Handler invoked by a driver when a submitted [`Slot`] is transmitted.
///
/// The driver returns slot ownership through this handler. It may be called from any thread,
/// including the one that submitted the slot.
pub type CompletionHandler = Arc<dyn Fn(Slot) + Send + Sync>;

/// Handler invoked by a driver for every received message.
///
/// Called on the driver's delivery thread, once per message, in arrival order. The next message
/// is not delivered until the handler returns.
pub type DeliveryHandler = Arc<dyn Fn(Incoming<'_>) + Send + Sync>;

/// Message received by an input port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Incoming<'a> {
    /// Short message packed into a word, status byte first (least significant).
    ///
    /// The number of meaningful bytes is defined by the status byte, see
    /// [`short_message_len`](super::short_message_len).
    Short(u32),
    /// Contents of a receive buffer holding (a part of) a long message.
    Long(&'a [u8]),
}

/// Device driver.
///
/// A backend enumerates available ports and opens them. Opened ports are represented by
/// [`OutputPort`] and [`InputPort`] trait objects. A port is closed when dropped.
///
/// Implementors:
///
/// * [`VirtualBackend`](super::VirtualBackend): in-process ports controlled by the caller.
/// * [`MidirBackend`](super::MidirBackend): hardware ports (requires `midir` feature).
pub trait Backend: Send + Sync + 'static {
    /// Backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Lists available input ports.
    fn inputs(&self) -> Vec<DeviceInfo>;

    /// Lists available output ports.
    fn outputs(&self) -> Vec<DeviceInfo>;

    /// Opens an output port.
    ///
    /// Every slot passed to [`OutputPort::submit`] must be eventually returned via `on_done`.
    fn open_output(
        &self,
        id: DeviceId,
        on_done: CompletionHandler,
    ) -> DeviceResult<Box<dyn OutputPort>>;

    /// Opens an input port.
    ///
    /// The port should not invoke `deliver` until [`InputPort::start`] is called.
    fn open_input(&self, id: DeviceId, deliver: DeliveryHandler)
        -> DeviceResult<Box<dyn InputPort>>;
}

/// Opened output port.
pub trait OutputPort: Send {
    /// Registers a slot with the driver before it can be submitted.
    fn prepare(&mut self, slot: &Slot) -> DeviceResult<()>;

    /// Hands slot over to the driver for transmission.
    ///
    /// On success the driver owns the slot until it is passed to the completion handler. On
    /// failure the slot is returned within [`Rejected`].
    fn submit(&mut self, slot: Slot) -> Result<(), Rejected>;

    /// Aborts pending transmissions and returns all submitted slots through the completion
    /// handler.
    fn reset(&mut self);

    /// Releases driver resources associated with a slot.
    fn unprepare(&mut self, slot: &Slot);
}

/// Opened input port.
pub trait InputPort: Send {
    /// Starts delivering messages.
    fn start(&mut self) -> DeviceResult<()>;

    /// Stops delivering messages.
    ///
    /// Once this method returns, no message is delivered until the port is started again.
    fn stop(&mut self) -> DeviceResult<()>;
}

/// Slot rejected by [`OutputPort::submit`].
#[derive(Debug)]
pub struct Rejected {
    /// Returned slot.
    pub slot: Slot,
    /// Cause of rejection.
    pub error: DeviceError,
}
