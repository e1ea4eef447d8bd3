use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use crate::device::{unpack_short_message, Backend, DeliveryHandler, DeviceId, Incoming, InputPort};
use crate::errors::{DeviceError, DeviceResult};
use crate::utils::lock;

/// Handler of messages received by a [`DeviceSource`].
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Receive side of a device.
///
/// Messages are not buffered: each one is passed to the handler on the driver's delivery thread,
/// and the next one waits until the handler returns.
pub struct DeviceSource {
    backend: Arc<dyn Backend>,
    state: Mutex<Option<OpenedSource>>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
}

struct OpenedSource {
    id: DeviceId,
    port: Box<dyn InputPort>,
    started: bool,
}

impl DeviceSource {
    /// Creates a closed source.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Mutex::new(None),
            handler: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens a device, closing the current one.
    ///
    /// The opened device does not deliver messages until [`start`](Self::start) is called.
    /// Opening [`DeviceId::None`] just closes the source.
    pub fn open(&self, id: DeviceId) -> DeviceResult<()> {
        let mut state = lock(&self.state);
        if let Some(opened) = state.take() {
            Self::shutdown(opened);
        }
        if id.is_none() {
            return Ok(());
        }

        let deliver: DeliveryHandler = {
            let handler = self.handler.clone();
            Arc::new(move |incoming| {
                let Some(handler) = lock(&handler).clone() else {
                    return;
                };
                match incoming {
                    Incoming::Short(packed) => {
                        let (bytes, len) = unpack_short_message(packed);
                        handler(&bytes[..len]);
                    }
                    Incoming::Long(bytes) => handler(bytes),
                }
            })
        };

        let port = self.backend.open_input(id, deliver)?;
        log::debug!("[{id}] input opened");
        *state = Some(OpenedSource {
            id,
            port,
            started: false,
        });
        Ok(())
    }

    /// Closes the device. Does nothing if the source is closed.
    pub fn close(&self) {
        if let Some(opened) = lock(&self.state).take() {
            Self::shutdown(opened);
        }
    }

    /// Returns `true` if a device is open.
    pub fn is_open(&self) -> bool {
        lock(&self.state).is_some()
    }

    /// Returns `true` if the opened device delivers messages.
    pub fn is_started(&self) -> bool {
        lock(&self.state)
            .as_ref()
            .map(|opened| opened.started)
            .unwrap_or(false)
    }

    /// Identifier of the opened device or [`DeviceId::None`].
    pub fn id(&self) -> DeviceId {
        lock(&self.state)
            .as_ref()
            .map(|opened| opened.id)
            .unwrap_or_default()
    }

    /// Starts delivering messages to the handler.
    pub fn start(&self) -> DeviceResult<()> {
        let mut state = lock(&self.state);
        let opened = state.as_mut().ok_or(DeviceError::NotOpen)?;
        if !opened.started {
            opened.port.start()?;
            opened.started = true;
        }
        Ok(())
    }

    /// Stops delivering messages.
    ///
    /// Once this method returns, the handler is not invoked until the source is started again.
    pub fn stop(&self) -> DeviceResult<()> {
        let mut state = lock(&self.state);
        match state.as_mut() {
            Some(opened) if opened.started => {
                opened.started = false;
                opened.port.stop()
            }
            _ => Ok(()),
        }
    }

    /// Sets message handler.
    pub fn set_on_message(&self, handler: impl Fn(&[u8]) + Send + Sync + 'static) {
        *lock(&self.handler) = Some(Arc::new(handler));
    }

    /// Removes message handler. Messages received afterwards are discarded.
    pub fn clear_on_message(&self) {
        *lock(&self.handler) = None;
    }

    fn shutdown(mut opened: OpenedSource) {
        if opened.started {
            if let Err(err) = opened.port.stop() {
                log::debug!("[{}] failed to stop input: {err}", opened.id);
            }
        }
        drop(opened.port);
        log::debug!("[{}] input closed", opened.id);
    }
}

impl Debug for DeviceSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSource")
            .field("backend", &self.backend.name())
            .field("id", &self.id())
            .field("started", &self.is_started())
            .finish()
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VirtualBackend;
    use std::sync::mpsc;
    use std::time::Duration;

    fn collecting(source: &DeviceSource) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        source.set_on_message(move |bytes| {
            let _ = lock(&tx).send(bytes.to_vec());
        });
        rx
    }

    #[test]
    fn short_messages_are_trimmed_by_status() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("Keys");
        let source = DeviceSource::new(Arc::new(backend));
        let rx = collecting(&source);

        source.open(input.id()).unwrap();
        source.start().unwrap();

        input.send_short([0x90, 0x40, 0x7f]);
        input.send_short([0xc0, 0x05, 0x00]);
        input.send_short([0xf8, 0x00, 0x00]);

        let timeout = Duration::from_secs(1);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), vec![0x90, 0x40, 0x7f]);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), vec![0xc0, 0x05]);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), vec![0xf8]);
    }

    #[test]
    fn long_messages_arrive_in_order() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("Keys");
        let source = DeviceSource::new(Arc::new(backend));
        let rx = collecting(&source);

        source.open(input.id()).unwrap();
        source.start().unwrap();

        let sysex: Vec<u8> = [0xf0]
            .into_iter()
            .chain((0..600).map(|i| (i % 0x80) as u8))
            .chain([0xf7])
            .collect();
        input.send_long(&sysex);

        let mut received = Vec::new();
        while received.len() < sysex.len() {
            received.extend(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        }
        assert_eq!(received, sysex);
    }

    #[test]
    fn nothing_is_delivered_after_stop() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("Keys");
        let source = DeviceSource::new(Arc::new(backend));
        let rx = collecting(&source);

        source.open(input.id()).unwrap();
        source.start().unwrap();
        source.stop().unwrap();
        assert!(!source.is_started());

        assert!(!input.send_short([0x90, 0x40, 0x7f]));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn start_requires_open_device() {
        let source = DeviceSource::new(Arc::new(VirtualBackend::new()));
        assert!(matches!(source.start(), Err(DeviceError::NotOpen)));
        assert!(source.stop().is_ok());
    }

    #[test]
    fn failed_open_leaves_source_closed() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("Keys");
        input.fail_open(true);

        let source = DeviceSource::new(Arc::new(backend));
        assert!(source.open(input.id()).is_err());
        assert!(!source.is_open());
        assert_eq!(source.id(), DeviceId::None);
    }
}
