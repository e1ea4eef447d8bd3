use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, Weak};

use crate::consts::{DEVICE_BUFFER_COUNT, DEVICE_BUFFER_SIZE};
use crate::device::{Backend, CompletionHandler, DeviceId, OutputPort, Rejected, SlotPool};
use crate::errors::{DeviceError, DeviceResult};
use crate::utils::{lock, Outcome, Signal};

/// Transmit side of a device.
///
/// Wraps an [`OutputPort`] and a [`SlotPool`]. Turns the asynchronous, completion-driven driver
/// interface into a synchronous [`send`](DeviceSink::send) which blocks when all slots are in
/// flight.
pub struct DeviceSink {
    backend: Arc<dyn Backend>,
    capacity: usize,
    slot_size: usize,
    state: Mutex<Option<OpenedSink>>,
}

#[derive(Clone)]
struct OpenedSink {
    id: DeviceId,
    port: Arc<Mutex<Box<dyn OutputPort>>>,
    pool: Arc<SlotPool>,
}

impl DeviceSink {
    /// Creates a closed sink with default pool dimensions.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_pool(backend, DEVICE_BUFFER_COUNT, DEVICE_BUFFER_SIZE)
    }

    /// Creates a closed sink with `capacity` slots of `slot_size` bytes each.
    pub fn with_pool(backend: Arc<dyn Backend>, capacity: usize, slot_size: usize) -> Self {
        Self {
            backend,
            capacity: capacity.max(1),
            slot_size: slot_size.max(1),
            state: Mutex::new(None),
        }
    }

    /// Opens a device, closing the current one.
    ///
    /// Opening [`DeviceId::None`] just closes the sink. If any slot can't be prepared, the port is
    /// closed and the sink stays closed.
    pub fn open(&self, id: DeviceId) -> DeviceResult<()> {
        let mut state = lock(&self.state);
        if let Some(opened) = state.take() {
            Self::shutdown(opened);
        }
        if id.is_none() {
            return Ok(());
        }

        let pool = Arc::new(SlotPool::new(self.capacity, self.slot_size));
        let on_done: CompletionHandler = {
            let pool: Weak<SlotPool> = Arc::downgrade(&pool);
            Arc::new(move |slot| {
                if let Some(pool) = pool.upgrade() {
                    pool.recycle(slot);
                }
            })
        };

        let mut port = self.backend.open_output(id, on_done)?;
        pool.prepare(port.as_mut())?;

        log::debug!("[{id}] output opened with {pool:?}");
        *state = Some(OpenedSink {
            id,
            port: Arc::new(Mutex::new(port)),
            pool,
        });
        Ok(())
    }

    /// Closes the device.
    ///
    /// Pending transmissions are aborted by the driver. Does nothing if the sink is closed.
    pub fn close(&self) {
        if let Some(opened) = lock(&self.state).take() {
            Self::shutdown(opened);
        }
    }

    /// Returns `true` if a device is open.
    pub fn is_open(&self) -> bool {
        lock(&self.state).is_some()
    }

    /// Identifier of the opened device or [`DeviceId::None`].
    pub fn id(&self) -> DeviceId {
        lock(&self.state)
            .as_ref()
            .map(|opened| opened.id)
            .unwrap_or_default()
    }

    /// Maximum number of bytes submitted to the driver at once.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots currently submitted to the driver.
    pub fn in_flight(&self) -> usize {
        lock(&self.state)
            .as_ref()
            .map(|opened| opened.pool.in_flight())
            .unwrap_or(0)
    }

    /// Transmits `bytes`.
    ///
    /// Data is split into chunks of at most [`slot_size`](Self::slot_size) bytes which are
    /// submitted in order. Each chunk waits for a free slot, racing `stop`. Chunks submitted
    /// before cancellation stay submitted.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotOpen`] if the sink is (or becomes) closed, or the driver error if
    /// a chunk was rejected. Failed submissions are not retried.
    pub fn send(&self, bytes: &[u8], stop: &Signal) -> DeviceResult<Outcome<()>> {
        let opened = lock(&self.state).clone().ok_or(DeviceError::NotOpen)?;

        for chunk in bytes.chunks(self.slot_size) {
            let slot = match opened.pool.acquire(chunk, stop)? {
                Outcome::Done(slot) => slot,
                Outcome::Cancelled => return Ok(Outcome::Cancelled),
            };

            let mut port = lock(&opened.port);
            if !opened.pool.is_open() {
                return Err(DeviceError::NotOpen);
            }
            if let Err(Rejected { slot, error }) = port.submit(slot) {
                opened.pool.recycle(slot);
                return Err(error);
            }
        }

        Ok(Outcome::Done(()))
    }

    fn shutdown(opened: OpenedSink) {
        let mut port = lock(&opened.port);
        port.reset();

        let lost = opened.pool.close(port.as_mut());
        if lost > 0 {
            log::warn!("[{}] {lost} slots were not returned by driver", opened.id);
        }
        log::debug!("[{}] output closed", opened.id);
    }
}

impl Debug for DeviceSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSink")
            .field("backend", &self.backend.name())
            .field("id", &self.id())
            .field("capacity", &self.capacity)
            .field("slot_size", &self.slot_size)
            .finish()
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.close();
    }
}
